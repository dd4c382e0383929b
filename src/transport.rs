//! Consumed HTTP/2 transport boundary.
//!
//! The wire-level HTTP/2 implementation (framing, flow control, HPACK)
//! lives outside this crate. The server core consumes it through these
//! traits: a transport binds listening sockets, a bound socket yields
//! sessions, a session yields streams, and each stream arrives with its
//! raw headers plus a provider that constructs the per-call I/O helper.

use crate::call::{BoxFuture, CallStream};
use crate::config::{ChannelOptions, Http2ServerSettings};
use crate::credentials::TlsServerSettings;
use crate::handler::MethodHandler;
use crate::metadata::Metadata;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

/// HTTP/2 NO_ERROR code, used when discarding sessions before start.
pub const HTTP2_NO_ERROR: u32 = 0x0;
/// HTTP/2 CANCEL code, used by forced shutdown.
pub const HTTP2_CANCEL: u32 = 0x8;

/// A concrete address produced by a resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedTarget {
    Tcp(SocketAddr),
    Unix(PathBuf),
}

impl ResolvedTarget {
    /// TCP port, if this is a TCP address.
    pub fn port(&self) -> Option<u16> {
        match self {
            ResolvedTarget::Tcp(addr) => Some(addr.port()),
            ResolvedTarget::Unix(_) => None,
        }
    }

    pub fn is_tcp(&self) -> bool {
        matches!(self, ResolvedTarget::Tcp(_))
    }

    /// Copy of this address with the port replaced. Unix targets are
    /// returned unchanged.
    pub fn with_port(&self, port: u16) -> Self {
        match self {
            ResolvedTarget::Tcp(addr) => {
                let mut addr = *addr;
                addr.set_port(port);
                ResolvedTarget::Tcp(addr)
            }
            ResolvedTarget::Unix(path) => ResolvedTarget::Unix(path.clone()),
        }
    }
}

impl fmt::Display for ResolvedTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedTarget::Tcp(addr) => write!(f, "{}", addr),
            ResolvedTarget::Unix(path) => write!(f, "{}", path.display()),
        }
    }
}

/// TLS parameters of a live session, read for telemetry snapshots.
///
/// Absent values (no negotiated standard name, no peer certificate) are
/// `None`, never an error.
#[derive(Debug, Clone, Default)]
pub struct TlsSessionInfo {
    /// IANA cipher suite name, when the transport knows it.
    pub cipher_suite_standard_name: Option<String>,
    /// Implementation-specific cipher name, as a fallback.
    pub cipher_suite_other_name: Option<String>,
    /// Local certificate, DER bytes.
    pub local_certificate: Option<Vec<u8>>,
    /// Peer certificate, DER bytes.
    pub remote_certificate: Option<Vec<u8>>,
}

/// Flow-control window sizes of a live session.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlowControlWindows {
    pub local_window: Option<i64>,
    pub remote_window: Option<i64>,
}

/// Constructs listening sockets for the server core.
pub trait Http2Transport: Send + Sync {
    /// Bind a listening socket at `target`. A TCP port of 0 requests an
    /// OS-assigned port, reflected in the socket's `local_target`.
    fn bind(
        &self,
        target: &ResolvedTarget,
        settings: &Http2ServerSettings,
        tls: Option<TlsServerSettings>,
    ) -> BoxFuture<'static, io::Result<Box<dyn BoundSocket>>>;
}

/// A listening socket owned by the server.
pub trait BoundSocket: Send + Sync {
    /// The actual bound address, including any OS-assigned port.
    fn local_target(&self) -> ResolvedTarget;

    /// Whether the socket is still accepting sessions.
    fn is_listening(&self) -> bool;

    /// Await the next accepted session; `None` once the socket closes.
    fn accept(&self) -> BoxFuture<'_, Option<Box<dyn Http2Session>>>;

    /// Stop accepting new sessions and drain. Resolves when the socket
    /// has fully closed.
    fn close(&self) -> BoxFuture<'static, ()>;
}

/// One HTTP/2 connection from a peer.
///
/// Destroying or gracefully closing a session must eventually terminate
/// its stream source (`accept_stream` returns `None`) and resolve
/// `closed`.
pub trait Http2Session: Send + Sync {
    fn local_target(&self) -> Option<ResolvedTarget>;
    fn remote_target(&self) -> Option<ResolvedTarget>;

    /// TLS parameters; `None` on plaintext sessions.
    fn tls_info(&self) -> Option<TlsSessionInfo>;

    /// Current flow-control windows.
    fn flow_control(&self) -> FlowControlWindows;

    /// Await the next stream opened by the peer; `None` once the session
    /// closes.
    fn accept_stream(&self) -> BoxFuture<'_, Option<IncomingStream>>;

    /// Request a graceful close: no new streams, existing streams drain.
    fn graceful_close(&self);

    /// Tear the session down immediately with an HTTP/2 error code.
    fn destroy(&self, code: u32);

    fn is_closed(&self) -> bool;

    /// Resolves when the session has fully closed.
    fn closed(&self) -> BoxFuture<'static, ()>;
}

/// A stream delivered by a session, before dispatch.
pub struct IncomingStream {
    /// Raw HTTP/2 request headers.
    pub headers: Metadata,
    /// Constructor for the per-call I/O helper.
    pub provider: Box<dyn CallStreamProvider>,
}

/// Late-bound constructor for a [`CallStream`].
///
/// Dispatch resolves the method handler first, then binds the stream:
/// the handler's codecs drive message framing inside the CallStream. A
/// degenerate call bound to no handler carries error responses for
/// streams that never matched a method.
pub trait CallStreamProvider: Send {
    /// Bind the HTTP/2 stream into a CallStream.
    fn into_call(
        self: Box<Self>,
        handler: Option<Arc<MethodHandler>>,
        options: Arc<ChannelOptions>,
    ) -> Arc<dyn CallStream>;

    /// Refuse the stream with a bare HTTP status and end it, bypassing
    /// gRPC framing entirely.
    fn reject(self: Box<Self>, http_status: u16);
}
