//! grpc-server - gRPC server runtime.
//!
//! This crate implements the server-side runtime of a gRPC stack: it
//! accepts HTTP/2 sessions, demultiplexes incoming streams into RPC
//! calls, dispatches each call to a registered method handler according
//! to its streaming shape, and manages the lifecycles of listeners,
//! sessions, and streams with observable telemetry.
//!
//! The wire-level HTTP/2 implementation, the per-call I/O helper, and
//! the name resolver are external collaborators consumed through the
//! traits in [`transport`], [`call`], and [`resolver`]. Message
//! serialization is provided per method by the user; payloads cross the
//! core as raw bytes.
//!
//! # Architecture
//!
//! ```text
//! bind_async(target) -> resolver -> addresses -> bind engine
//!     -> listening sockets -> sessions -> streams -> dispatch
//!     -> handler -> CallStream I/O
//! ```
//!
//! Every server, listener, and session registers with the process-wide
//! channelz registry and can be inspected by id at any time.

mod bind;
pub mod call;
pub mod channelz;
mod config;
mod credentials;
mod dispatch;
mod error;
pub mod handler;
mod metadata;
pub mod metrics;
pub mod resolver;
mod server;
mod session;
mod status;
pub mod transport;
pub mod uri;

pub use call::{
    BoxFuture, CallEventObserver, CallStream, ServerDuplexStream, ServerReadableStream,
    ServerUnaryCall, ServerWritableStream, UnaryReply,
};
pub use config::{ChannelOptions, Http2ServerSettings};
pub use credentials::{ServerCredentials, TlsServerSettings};
pub use error::ServerError;
pub use handler::{
    HandlerFn, HandlerRegistry, MethodDefinition, MethodHandler, MethodKind, ServiceDefinition,
    ServiceImplementation, identity_codec,
};
pub use metadata::Metadata;
pub use server::{Server, ServerBuilder};
pub use status::{Code, Status};
pub use transport::{
    BoundSocket, CallStreamProvider, FlowControlWindows, HTTP2_CANCEL, HTTP2_NO_ERROR,
    Http2Session, Http2Transport, IncomingStream, ResolvedTarget, TlsSessionInfo,
};
