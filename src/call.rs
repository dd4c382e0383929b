//! Per-call I/O contract.
//!
//! A [`CallStream`] owns a single HTTP/2 stream and mediates message
//! framing between the dispatcher and the transport. The implementation
//! lives with the transport; the dispatch core consumes this interface
//! and wraps it in one of the four shape-specific call types handed to
//! user handlers.

use crate::metadata::Metadata;
use crate::status::{Code, Status};
use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future used across the consumed-contract traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Observer for call lifecycle events, installed by the dispatcher.
///
/// Implementations of [`CallStream`] must deliver exactly one
/// `on_call_end` per stream lifetime and exactly one `on_stream_end`
/// after it.
pub trait CallEventObserver: Send + Sync {
    /// The call reached its terminal gRPC status.
    fn on_call_end(&self, code: Code);
    /// The underlying HTTP/2 stream finished, cleanly or not.
    fn on_stream_end(&self, success: bool);
    /// A message was written to the stream.
    fn on_message_sent(&self);
    /// A message was received from the stream.
    fn on_message_received(&self);
}

/// A successful unary response.
#[derive(Debug, Clone)]
pub struct UnaryReply {
    /// Serialized response payload.
    pub payload: Bytes,
    /// Trailer metadata appended to the OK status.
    pub trailer: Option<Metadata>,
    /// Transport write flags.
    pub flags: u32,
}

impl UnaryReply {
    pub fn new(payload: Bytes) -> Self {
        Self {
            payload,
            trailer: None,
            flags: 0,
        }
    }

    pub fn with_trailer(mut self, trailer: Metadata) -> Self {
        self.trailer = Some(trailer);
        self
    }
}

/// The per-stream I/O helper consumed by the dispatch core.
pub trait CallStream: Send + Sync {
    /// Whether the peer cancelled the stream.
    fn cancelled(&self) -> bool;

    /// Parse request metadata out of the raw HTTP/2 headers, stripping
    /// reserved transport headers.
    fn receive_metadata(&self, headers: Metadata) -> Metadata;

    /// Await the single request message of a unary or server-streaming
    /// call. `None` when the stream was cancelled or the message was
    /// malformed.
    fn receive_unary_message(&self) -> BoxFuture<'_, Option<Bytes>>;

    /// Package a unary outcome into a reply: payload plus OK trailers on
    /// success, a status-only response on error.
    fn send_unary_message(&self, reply: Result<UnaryReply, Status>) -> BoxFuture<'_, ()>;

    /// Terminate the call with an error status.
    fn send_error(&self, status: Status);

    /// Await the next request message of a streaming call. `None` once
    /// the peer half-closes; `Err` on a malformed frame.
    fn next_message(&self) -> BoxFuture<'_, Option<Result<Bytes, Status>>>;

    /// Write one response message of a streaming call.
    fn write_message(&self, payload: Bytes) -> BoxFuture<'_, Result<(), Status>>;

    /// Terminate the call with the given trailer status.
    fn end(&self, status: Status);

    /// Install the dispatcher's event observer.
    fn set_observer(&self, observer: Arc<dyn CallEventObserver>);
}

/// A unary call as seen by a user handler.
pub struct ServerUnaryCall {
    /// Request metadata.
    pub metadata: Metadata,
    /// The decoded request message.
    pub request: Bytes,
    call: Arc<dyn CallStream>,
}

impl ServerUnaryCall {
    pub(crate) fn new(metadata: Metadata, request: Bytes, call: Arc<dyn CallStream>) -> Self {
        Self {
            metadata,
            request,
            call,
        }
    }

    pub fn cancelled(&self) -> bool {
        self.call.cancelled()
    }
}

/// A client-streaming call: the handler reads a sequence of requests and
/// produces one reply.
pub struct ServerReadableStream {
    pub metadata: Metadata,
    call: Arc<dyn CallStream>,
}

impl ServerReadableStream {
    pub(crate) fn new(metadata: Metadata, call: Arc<dyn CallStream>) -> Self {
        Self { metadata, call }
    }

    /// Next request message; `None` once the client half-closes.
    pub async fn next(&self) -> Option<Result<Bytes, Status>> {
        self.call.next_message().await
    }

    pub fn cancelled(&self) -> bool {
        self.call.cancelled()
    }
}

/// A server-streaming call: one request in, a sequence of responses out.
pub struct ServerWritableStream {
    pub metadata: Metadata,
    /// The decoded request message.
    pub request: Bytes,
    call: Arc<dyn CallStream>,
}

impl ServerWritableStream {
    pub(crate) fn new(metadata: Metadata, request: Bytes, call: Arc<dyn CallStream>) -> Self {
        Self {
            metadata,
            request,
            call,
        }
    }

    /// Write one response message.
    pub async fn write(&self, payload: Bytes) -> Result<(), Status> {
        self.call.write_message(payload).await
    }

    pub fn cancelled(&self) -> bool {
        self.call.cancelled()
    }
}

/// A bidirectional call: both sides may send a sequence of messages.
pub struct ServerDuplexStream {
    pub metadata: Metadata,
    call: Arc<dyn CallStream>,
}

impl ServerDuplexStream {
    pub(crate) fn new(metadata: Metadata, call: Arc<dyn CallStream>) -> Self {
        Self { metadata, call }
    }

    /// Next request message; `None` once the client half-closes.
    pub async fn next(&self) -> Option<Result<Bytes, Status>> {
        self.call.next_message().await
    }

    /// Write one response message.
    pub async fn write(&self, payload: Bytes) -> Result<(), Status> {
        self.call.write_message(payload).await
    }

    pub fn cancelled(&self) -> bool {
        self.call.cancelled()
    }
}
