//! Per-stream dispatch.
//!
//! Translates one incoming HTTP/2 stream into one RPC call: validates
//! the request surface, resolves the handler, and drives the shape-
//! specific control flow. Every failure is contained on its own stream.

use crate::call::{
    CallEventObserver, CallStream, ServerDuplexStream, ServerReadableStream, ServerUnaryCall,
    ServerWritableStream,
};
use crate::channelz::TraceSeverity;
use crate::handler::{self, HandlerFn};
use crate::metadata::Metadata;
use crate::metrics;
use crate::server::ServerShared;
use crate::session::{SessionEntry, SessionRecord};
use crate::status::{Code, Status};
use crate::transport::IncomingStream;
use std::sync::Arc;
use tracing::{debug, trace};

const HTTP_STATUS_UNSUPPORTED_MEDIA_TYPE: u16 = 415;
const GRPC_CONTENT_TYPE_PREFIX: &str = "application/grpc";

/// Observer wired into each CallStream; keeps server and session
/// counters consistent from the stream's terminal events.
struct DispatchObserver {
    shared: Arc<ServerShared>,
    record: Arc<SessionRecord>,
}

impl CallEventObserver for DispatchObserver {
    fn on_call_end(&self, code: Code) {
        if code.is_ok() {
            self.shared.call_tracker.add_call_succeeded();
            metrics::CALLS_SUCCEEDED.increment();
        } else {
            self.shared.call_tracker.add_call_failed();
            metrics::CALLS_FAILED.increment();
        }
    }

    fn on_stream_end(&self, success: bool) {
        if success {
            self.record.streams.add_call_succeeded();
        } else {
            self.record.streams.add_call_failed();
        }
    }

    fn on_message_sent(&self) {
        self.record.message_sent();
    }

    fn on_message_received(&self) {
        self.record.message_received();
    }
}

/// Handle one new stream on a live session.
pub(crate) async fn dispatch_stream(
    shared: Arc<ServerShared>,
    entry: Arc<SessionEntry>,
    incoming: IncomingStream,
) {
    shared.call_tracker.add_call_started();
    entry.record.streams.add_call_started();
    metrics::CALLS_STARTED.increment();

    let IncomingStream { headers, provider } = incoming;

    let content_type_ok = headers
        .get("content-type")
        .is_some_and(|value| value.starts_with(GRPC_CONTENT_TYPE_PREFIX));
    if !content_type_ok {
        debug!("refusing stream with unsupported content-type");
        shared.call_tracker.add_call_failed();
        entry.record.streams.add_call_failed();
        metrics::CALLS_FAILED.increment();
        provider.reject(HTTP_STATUS_UNSUPPORTED_MEDIA_TYPE);
        return;
    }

    let path = headers.get(":path").unwrap_or_default().to_string();
    let Some(method) = ({
        let state = shared.state.lock();
        state.handlers.lookup(&path)
    }) else {
        // No real call is ever constructed for an unregistered method;
        // a degenerate CallStream carries the error response.
        let status = handler::unimplemented_method_status(&path);
        shared.trace.add_trace(
            TraceSeverity::Warning,
            format!("Received call to unregistered method {path}"),
        );
        debug!(%path, "call to unregistered method");
        let call = provider.into_call(None, shared.options.clone());
        shared.call_tracker.add_call_failed();
        entry.record.streams.add_call_failed();
        metrics::CALLS_FAILED.increment();
        call.send_error(status);
        return;
    };

    trace!(%path, "dispatching call");
    let call = provider.into_call(Some(method.clone()), shared.options.clone());
    call.set_observer(Arc::new(DispatchObserver {
        shared: shared.clone(),
        record: entry.record.clone(),
    }));

    let metadata = call.receive_metadata(headers);

    if call.cancelled() {
        return;
    }
    match method.func.clone() {
        HandlerFn::Unary(func) => handle_unary(call, metadata, func).await,
        HandlerFn::ClientStream(func) => handle_client_stream(call, metadata, func).await,
        HandlerFn::ServerStream(func) => handle_server_stream(call, metadata, func).await,
        HandlerFn::Bidi(func) => handle_bidi(call, metadata, func).await,
    }
}

/// Unary: await the single request, invoke the handler, package the
/// outcome into one reply.
async fn handle_unary(call: Arc<dyn CallStream>, metadata: Metadata, func: handler::UnaryFn) {
    let Some(request) = call.receive_unary_message().await else {
        // Cancelled or malformed: abort silently.
        return;
    };
    if call.cancelled() {
        return;
    }
    let reply = func(ServerUnaryCall::new(metadata, request, call.clone())).await;
    call.send_unary_message(reply).await;
}

/// Client-streaming: hand the handler a readable stream of requests; the
/// resolved outcome becomes a unary reply.
async fn handle_client_stream(
    call: Arc<dyn CallStream>,
    metadata: Metadata,
    func: handler::ClientStreamFn,
) {
    let reply = func(ServerReadableStream::new(metadata, call.clone())).await;
    call.send_unary_message(reply).await;
}

/// Server-streaming: await the single request, hand the handler a
/// writable stream, terminate with the handler's status.
async fn handle_server_stream(
    call: Arc<dyn CallStream>,
    metadata: Metadata,
    func: handler::ServerStreamFn,
) {
    let Some(request) = call.receive_unary_message().await else {
        return;
    };
    if call.cancelled() {
        return;
    }
    match func(ServerWritableStream::new(metadata, request, call.clone())).await {
        Ok(()) => call.end(Status::ok()),
        Err(status) => call.send_error(status),
    }
}

/// Bidirectional: hand the handler a duplex stream, terminate with the
/// handler's status.
async fn handle_bidi(call: Arc<dyn CallStream>, metadata: Metadata, func: handler::BidiFn) {
    match func(ServerDuplexStream::new(metadata, call.clone())).await {
        Ok(()) => call.end(Status::ok()),
        Err(status) => call.send_error(status),
    }
}
