//! Server-scope errors.
//!
//! Per-call failures are [`Status`](crate::Status) values and never surface
//! here; `ServerError` covers user-programming errors raised synchronously
//! and the aggregate outcomes of the bind pipeline.

use thiserror::Error;

/// Errors produced by [`Server`](crate::Server) operations.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The server has already been started.
    #[error("server is already started")]
    AlreadyStarted,

    /// `start` was called with no bound, listening socket.
    #[error("server must be bound in order to start")]
    NotBound,

    /// The bind target string could not be parsed.
    #[error("Could not parse target \"{0}\"")]
    InvalidTarget(String),

    /// `add_service` was called with an empty service definition.
    #[error("Cannot add an empty service to a server")]
    EmptyService,

    /// A method path was already registered.
    #[error("Method handler for {0} already provided.")]
    DuplicateMethod(String),

    /// The resolver produced an empty address list. Carries the bind
    /// target string.
    #[error("No addresses resolved for port {0}")]
    NoAddressesResolved(String),

    /// Every resolved address failed to bind.
    #[error("No address added out of total {0} resolved")]
    NoAddressBound(usize),

    /// Addresses resolved from one target bound to different ports.
    #[error("multiple port numbers added from single address")]
    PortMismatch,

    /// Name resolution failed; carries the resolver's derived message.
    #[error("{0}")]
    ResolutionFailed(String),

    /// Legacy synchronous bind entry point.
    #[error("Not implemented. Use bindAsync() instead")]
    UseBindAsync,

    /// Legacy proto service entry point.
    #[error("Not implemented. Use addService() instead")]
    UseAddService,

    /// Legacy HTTP/2 port entry point.
    #[error("Not yet implemented")]
    NotYetImplemented,
}
