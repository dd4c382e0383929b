//! Process-wide server metrics.

use metriken::{Counter, Gauge, metric};

#[metric(
    name = "grpc_server_listeners_bound",
    description = "Total listening sockets bound"
)]
pub static LISTENERS_BOUND: Counter = Counter::new();

#[metric(
    name = "grpc_server_sessions_accepted",
    description = "Total sessions accepted"
)]
pub static SESSIONS_ACCEPTED: Counter = Counter::new();

#[metric(
    name = "grpc_server_sessions_active",
    description = "Number of currently open sessions"
)]
pub static SESSIONS_ACTIVE: Gauge = Gauge::new();

#[metric(name = "grpc_server_calls_started", description = "Total calls started")]
pub static CALLS_STARTED: Counter = Counter::new();

#[metric(
    name = "grpc_server_calls_succeeded",
    description = "Total calls completed with status OK"
)]
pub static CALLS_SUCCEEDED: Counter = Counter::new();

#[metric(
    name = "grpc_server_calls_failed",
    description = "Total calls completed with a non-OK status"
)]
pub static CALLS_FAILED: Counter = Counter::new();
