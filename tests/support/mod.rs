//! In-process mock implementations of the consumed contracts: HTTP/2
//! transport, sessions, per-call streams, and resolvers. Tests drive the
//! server end-to-end through these without a real network.

use bytes::Bytes;
use grpc_server::call::{BoxFuture, CallEventObserver, CallStream, UnaryReply};
use grpc_server::handler::MethodHandler;
use grpc_server::resolver::{ResolutionListener, Resolver, ResolverFactory};
use grpc_server::transport::{
    BoundSocket, CallStreamProvider, FlowControlWindows, Http2Session, Http2Transport,
    IncomingStream, ResolvedTarget, TlsSessionInfo,
};
use grpc_server::uri::Target;
use grpc_server::{ChannelOptions, Http2ServerSettings, Metadata, Status, TlsServerSettings};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use tokio::sync::{mpsc, watch};

// ---------------------------------------------------------------------
// Transport and sockets
// ---------------------------------------------------------------------

enum SocketCmd {
    Session(Box<dyn Http2Session>),
    Close,
}

struct SocketShared {
    local: ResolvedTarget,
    listening: AtomicBool,
    tx: mpsc::UnboundedSender<SocketCmd>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<SocketCmd>>,
}

/// Transport stub assigning wildcard ports from a counter. Hosts can be
/// marked refused to exercise partial binds.
pub struct MockTransport {
    refused_hosts: Mutex<HashSet<String>>,
    next_port: AtomicU16,
    sockets: Mutex<Vec<Arc<SocketShared>>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            refused_hosts: Mutex::new(HashSet::new()),
            next_port: AtomicU16::new(50000),
            sockets: Mutex::new(Vec::new()),
        })
    }

    /// Refuse all future binds on this host.
    pub fn refuse_host(&self, host: &str) {
        self.refused_hosts.lock().insert(host.to_string());
    }

    pub fn socket_count(&self) -> usize {
        self.sockets.lock().len()
    }

    /// Handle to the `index`-th bound socket, in bind order.
    pub fn socket(&self, index: usize) -> SocketHandle {
        SocketHandle {
            shared: self.sockets.lock()[index].clone(),
        }
    }
}

impl Http2Transport for MockTransport {
    fn bind(
        &self,
        target: &ResolvedTarget,
        _settings: &Http2ServerSettings,
        _tls: Option<TlsServerSettings>,
    ) -> BoxFuture<'static, io::Result<Box<dyn BoundSocket>>> {
        let host = match target {
            ResolvedTarget::Tcp(addr) => addr.ip().to_string(),
            ResolvedTarget::Unix(path) => path.display().to_string(),
        };
        if self.refused_hosts.lock().contains(&host) {
            return Box::pin(async { Err(io::Error::new(io::ErrorKind::AddrInUse, "refused")) });
        }
        let local = match target {
            ResolvedTarget::Tcp(addr) if addr.port() == 0 => {
                target.with_port(self.next_port.fetch_add(1, Ordering::Relaxed))
            }
            other => other.clone(),
        };
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(SocketShared {
            local,
            listening: AtomicBool::new(true),
            tx,
            rx: tokio::sync::Mutex::new(rx),
        });
        self.sockets.lock().push(shared.clone());
        Box::pin(async move { Ok(Box::new(MockSocket { shared }) as Box<dyn BoundSocket>) })
    }
}

struct MockSocket {
    shared: Arc<SocketShared>,
}

impl BoundSocket for MockSocket {
    fn local_target(&self) -> ResolvedTarget {
        self.shared.local.clone()
    }

    fn is_listening(&self) -> bool {
        self.shared.listening.load(Ordering::SeqCst)
    }

    fn accept(&self) -> BoxFuture<'_, Option<Box<dyn Http2Session>>> {
        Box::pin(async move {
            let mut rx = self.shared.rx.lock().await;
            match rx.recv().await {
                Some(SocketCmd::Session(session)) => Some(session),
                Some(SocketCmd::Close) | None => None,
            }
        })
    }

    fn close(&self) -> BoxFuture<'static, ()> {
        self.shared.listening.store(false, Ordering::SeqCst);
        let _ = self.shared.tx.send(SocketCmd::Close);
        Box::pin(async {})
    }
}

/// Test-side handle to one bound socket.
pub struct SocketHandle {
    shared: Arc<SocketShared>,
}

impl SocketHandle {
    pub fn is_listening(&self) -> bool {
        self.shared.listening.load(Ordering::SeqCst)
    }

    /// Open a new plaintext session, as a connecting peer would.
    /// Fails when the socket no longer listens.
    pub fn connect(&self) -> Result<SessionHandle, ()> {
        self.connect_with_tls(None)
    }

    pub fn connect_with_tls(&self, tls: Option<TlsSessionInfo>) -> Result<SessionHandle, ()> {
        if !self.is_listening() {
            return Err(());
        }
        let (session, handle) = MockSession::new(self.shared.local.clone(), tls);
        self.shared
            .tx
            .send(SocketCmd::Session(Box::new(session)))
            .map_err(|_| ())?;
        Ok(handle)
    }
}

// ---------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------

enum StreamCmd {
    Stream(IncomingStream),
    GoAway,
}

struct SessionShared {
    local: ResolvedTarget,
    remote: ResolvedTarget,
    tls: Option<TlsSessionInfo>,
    draining: AtomicBool,
    active_calls: AtomicUsize,
    destroy_code: Mutex<Option<u32>>,
    closed_tx: watch::Sender<bool>,
    closed_rx: watch::Receiver<bool>,
    stream_tx: mpsc::UnboundedSender<StreamCmd>,
    stream_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<StreamCmd>>,
}

impl SessionShared {
    fn call_started(&self) {
        self.active_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn call_finished(&self) {
        self.active_calls.fetch_sub(1, Ordering::SeqCst);
        self.maybe_finish_close();
    }

    fn maybe_finish_close(&self) {
        if self.draining.load(Ordering::SeqCst) && self.active_calls.load(Ordering::SeqCst) == 0 {
            let _ = self.closed_tx.send(true);
        }
    }
}

struct MockSession {
    shared: Arc<SessionShared>,
}

impl MockSession {
    fn new(local: ResolvedTarget, tls: Option<TlsSessionInfo>) -> (Self, SessionHandle) {
        let (closed_tx, closed_rx) = watch::channel(false);
        let (stream_tx, stream_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(SessionShared {
            local,
            remote: ResolvedTarget::Tcp("127.0.0.1:55555".parse().unwrap()),
            tls,
            draining: AtomicBool::new(false),
            active_calls: AtomicUsize::new(0),
            destroy_code: Mutex::new(None),
            closed_tx,
            closed_rx,
            stream_tx,
            stream_rx: tokio::sync::Mutex::new(stream_rx),
        });
        (
            Self {
                shared: shared.clone(),
            },
            SessionHandle { shared },
        )
    }
}

impl Http2Session for MockSession {
    fn local_target(&self) -> Option<ResolvedTarget> {
        Some(self.shared.local.clone())
    }

    fn remote_target(&self) -> Option<ResolvedTarget> {
        Some(self.shared.remote.clone())
    }

    fn tls_info(&self) -> Option<TlsSessionInfo> {
        self.shared.tls.clone()
    }

    fn flow_control(&self) -> FlowControlWindows {
        FlowControlWindows {
            local_window: Some(65535),
            remote_window: Some(65535),
        }
    }

    fn accept_stream(&self) -> BoxFuture<'_, Option<IncomingStream>> {
        Box::pin(async move {
            let mut rx = self.shared.stream_rx.lock().await;
            match rx.recv().await {
                Some(StreamCmd::Stream(stream)) => Some(stream),
                Some(StreamCmd::GoAway) | None => {
                    // No new streams, but the session is not closed until
                    // in-flight calls drain.
                    let mut closed = self.shared.closed_rx.clone();
                    while !*closed.borrow() {
                        if closed.changed().await.is_err() {
                            break;
                        }
                    }
                    None
                }
            }
        })
    }

    fn graceful_close(&self) {
        self.shared.draining.store(true, Ordering::SeqCst);
        let _ = self.shared.stream_tx.send(StreamCmd::GoAway);
        self.shared.maybe_finish_close();
    }

    fn destroy(&self, code: u32) {
        *self.shared.destroy_code.lock() = Some(code);
        let _ = self.shared.stream_tx.send(StreamCmd::GoAway);
        let _ = self.shared.closed_tx.send(true);
    }

    fn is_closed(&self) -> bool {
        *self.shared.closed_rx.borrow()
    }

    fn closed(&self) -> BoxFuture<'static, ()> {
        let mut rx = self.shared.closed_rx.clone();
        Box::pin(async move {
            while !*rx.borrow() {
                if rx.changed().await.is_err() {
                    return;
                }
            }
        })
    }
}

/// Test-side handle to one session: opens calls, observes teardown.
pub struct SessionHandle {
    shared: Arc<SessionShared>,
}

impl SessionHandle {
    /// Open a well-formed gRPC call stream.
    pub fn start_call(&self, path: &str) -> CallHandle {
        self.start_call_with_content_type(path, "application/grpc")
    }

    pub fn start_call_with_content_type(&self, path: &str, content_type: &str) -> CallHandle {
        let mut headers = Metadata::new();
        headers.add(":method", "POST");
        headers.add(":path", path);
        headers.add("content-type", content_type);
        headers.add("te", "trailers");
        self.start_call_with_headers(headers)
    }

    pub fn start_call_with_headers(&self, headers: Metadata) -> CallHandle {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = watch::channel(false);
        let record = Arc::new(CallRecord {
            responses: Mutex::new(Vec::new()),
            status: Mutex::new(None),
            trailer: Mutex::new(None),
            http_reject: Mutex::new(None),
            done_tx,
            done_rx,
        });
        let cancelled = Arc::new(AtomicBool::new(false));
        let provider = MockStreamProvider {
            session: self.shared.clone(),
            record: record.clone(),
            request_rx,
            cancelled: cancelled.clone(),
        };
        let _ = self.shared.stream_tx.send(StreamCmd::Stream(IncomingStream {
            headers,
            provider: Box::new(provider),
        }));
        CallHandle {
            record,
            request_tx: Mutex::new(Some(request_tx)),
            cancelled,
        }
    }

    /// The HTTP/2 error code the server destroyed this session with.
    pub fn destroyed_with(&self) -> Option<u32> {
        *self.shared.destroy_code.lock()
    }

    pub fn is_closed(&self) -> bool {
        *self.shared.closed_rx.borrow()
    }

    pub async fn wait_closed(&self) {
        let mut rx = self.shared.closed_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

// ---------------------------------------------------------------------
// Call streams
// ---------------------------------------------------------------------

struct CallRecord {
    responses: Mutex<Vec<Bytes>>,
    status: Mutex<Option<Status>>,
    trailer: Mutex<Option<Metadata>>,
    http_reject: Mutex<Option<u16>>,
    done_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
}

/// Terminal state of one mock call, as the peer would observe it.
#[derive(Debug, Clone)]
pub struct CallOutcome {
    pub responses: Vec<Bytes>,
    pub status: Option<Status>,
    pub trailer: Option<Metadata>,
    pub http_reject: Option<u16>,
}

/// Test-side handle to one call: sends requests, awaits the outcome.
pub struct CallHandle {
    record: Arc<CallRecord>,
    request_tx: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    cancelled: Arc<AtomicBool>,
}

impl CallHandle {
    pub fn send_message(&self, payload: impl Into<Bytes>) {
        if let Some(tx) = &*self.request_tx.lock() {
            let _ = tx.send(payload.into());
        }
    }

    /// Half-close: no more request messages.
    pub fn half_close(&self) {
        self.request_tx.lock().take();
    }

    /// Reset the stream from the peer side.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.half_close();
    }

    /// Await the terminal state of the call.
    pub async fn done(&self) -> CallOutcome {
        let mut rx = self.record.done_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
        self.outcome_now()
    }

    pub fn outcome_now(&self) -> CallOutcome {
        CallOutcome {
            responses: self.record.responses.lock().clone(),
            status: self.record.status.lock().clone(),
            trailer: self.record.trailer.lock().clone(),
            http_reject: *self.record.http_reject.lock(),
        }
    }

    /// Await at least `count` response messages, for mid-call assertions.
    pub async fn responses_at_least(&self, count: usize) {
        loop {
            if self.record.responses.lock().len() >= count {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
    }
}

struct MockStreamProvider {
    session: Arc<SessionShared>,
    record: Arc<CallRecord>,
    request_rx: mpsc::UnboundedReceiver<Bytes>,
    cancelled: Arc<AtomicBool>,
}

impl CallStreamProvider for MockStreamProvider {
    fn into_call(
        self: Box<Self>,
        handler: Option<Arc<MethodHandler>>,
        _options: Arc<ChannelOptions>,
    ) -> Arc<dyn CallStream> {
        self.session.call_started();
        Arc::new(MockCallStream {
            handler,
            session: self.session,
            record: self.record,
            incoming: tokio::sync::Mutex::new(self.request_rx),
            cancelled: self.cancelled,
            observer: Mutex::new(None),
            ended: AtomicBool::new(false),
        })
    }

    fn reject(self: Box<Self>, http_status: u16) {
        *self.record.http_reject.lock() = Some(http_status);
        let _ = self.record.done_tx.send(true);
    }
}

const RESERVED_HEADERS: &[&str] = &[":method", ":path", ":scheme", ":authority", "content-type", "te"];

struct MockCallStream {
    handler: Option<Arc<MethodHandler>>,
    session: Arc<SessionShared>,
    record: Arc<CallRecord>,
    incoming: tokio::sync::Mutex<mpsc::UnboundedReceiver<Bytes>>,
    cancelled: Arc<AtomicBool>,
    observer: Mutex<Option<Arc<dyn CallEventObserver>>>,
    ended: AtomicBool,
}

impl MockCallStream {
    fn serialize(&self, payload: Bytes) -> Result<Bytes, Status> {
        match &self.handler {
            Some(handler) => (handler.serialize)(payload),
            None => Ok(payload),
        }
    }

    fn deserialize(&self, payload: Bytes) -> Result<Bytes, Status> {
        match &self.handler {
            Some(handler) => (handler.deserialize)(payload),
            None => Ok(payload),
        }
    }

    fn observer(&self) -> Option<Arc<dyn CallEventObserver>> {
        self.observer.lock().clone()
    }

    fn finish(&self, status: Status) {
        if self.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.record.status.lock() = Some(status.clone());
        if let Some(observer) = self.observer() {
            observer.on_call_end(status.code());
            observer.on_stream_end(status.is_ok());
        }
        self.session.call_finished();
        let _ = self.record.done_tx.send(true);
    }
}

impl Drop for MockCallStream {
    fn drop(&mut self) {
        // A dispatch that aborted silently never reached a terminal
        // state; the stream closing underneath counts as cancellation.
        if !self.ended.load(Ordering::SeqCst) {
            self.finish(Status::cancelled("stream closed"));
        }
    }
}

impl CallStream for MockCallStream {
    fn cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn receive_metadata(&self, headers: Metadata) -> Metadata {
        let mut metadata = Metadata::new();
        for (key, value) in headers.iter() {
            if !RESERVED_HEADERS.contains(&key) {
                metadata.add(key, value);
            }
        }
        metadata
    }

    fn receive_unary_message(&self) -> BoxFuture<'_, Option<Bytes>> {
        Box::pin(async move {
            let message = {
                let mut rx = self.incoming.lock().await;
                rx.recv().await
            };
            if self.cancelled() {
                self.finish(Status::cancelled("stream cancelled by peer"));
                return None;
            }
            let message = message?;
            if let Some(observer) = self.observer() {
                observer.on_message_received();
            }
            match self.deserialize(message) {
                Ok(message) => Some(message),
                Err(status) => {
                    self.finish(status);
                    None
                }
            }
        })
    }

    fn send_unary_message(&self, reply: Result<UnaryReply, Status>) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            match reply {
                Ok(reply) => match self.serialize(reply.payload) {
                    Ok(payload) => {
                        self.record.responses.lock().push(payload);
                        if let Some(observer) = self.observer() {
                            observer.on_message_sent();
                        }
                        *self.record.trailer.lock() = reply.trailer;
                        self.finish(Status::ok());
                    }
                    Err(status) => self.finish(status),
                },
                Err(status) => self.finish(status),
            }
        })
    }

    fn send_error(&self, status: Status) {
        self.finish(status);
    }

    fn next_message(&self) -> BoxFuture<'_, Option<Result<Bytes, Status>>> {
        Box::pin(async move {
            let message = {
                let mut rx = self.incoming.lock().await;
                rx.recv().await
            };
            if self.cancelled() {
                self.finish(Status::cancelled("stream cancelled by peer"));
                return None;
            }
            let message = message?;
            if let Some(observer) = self.observer() {
                observer.on_message_received();
            }
            Some(self.deserialize(message))
        })
    }

    fn write_message(&self, payload: Bytes) -> BoxFuture<'_, Result<(), Status>> {
        Box::pin(async move {
            if self.cancelled() {
                return Err(Status::cancelled("stream cancelled by peer"));
            }
            let payload = self.serialize(payload)?;
            self.record.responses.lock().push(payload);
            if let Some(observer) = self.observer() {
                observer.on_message_sent();
            }
            Ok(())
        })
    }

    fn end(&self, status: Status) {
        self.finish(status);
    }

    fn set_observer(&self, observer: Arc<dyn CallEventObserver>) {
        *self.observer.lock() = Some(observer);
    }
}

// ---------------------------------------------------------------------
// Resolvers
// ---------------------------------------------------------------------

/// Resolver factory answering every target with a fixed address list.
pub struct StaticResolverFactory {
    addresses: Vec<ResolvedTarget>,
    /// Deliver the result this many times; the bind engine must accept
    /// only the first.
    deliveries: usize,
}

impl StaticResolverFactory {
    pub fn new(addresses: Vec<ResolvedTarget>) -> Arc<Self> {
        Arc::new(Self {
            addresses,
            deliveries: 1,
        })
    }

    pub fn with_repeated_delivery(addresses: Vec<ResolvedTarget>, deliveries: usize) -> Arc<Self> {
        Arc::new(Self {
            addresses,
            deliveries,
        })
    }
}

impl ResolverFactory for StaticResolverFactory {
    fn create(&self, _target: &Target, listener: ResolutionListener) -> Box<dyn Resolver> {
        Box::new(StaticResolver {
            addresses: self.addresses.clone(),
            deliveries: self.deliveries,
            listener,
        })
    }
}

struct StaticResolver {
    addresses: Vec<ResolvedTarget>,
    deliveries: usize,
    listener: ResolutionListener,
}

impl Resolver for StaticResolver {
    fn update_resolution(&mut self) {
        for _ in 0..self.deliveries {
            self.listener.resolved(self.addresses.clone());
        }
    }
}

/// Resolver factory that fails every resolution with the given status.
pub struct FailingResolverFactory {
    status: Status,
}

impl FailingResolverFactory {
    pub fn new(status: Status) -> Arc<Self> {
        Arc::new(Self { status })
    }
}

impl ResolverFactory for FailingResolverFactory {
    fn create(&self, _target: &Target, listener: ResolutionListener) -> Box<dyn Resolver> {
        Box::new(FailingResolver {
            status: self.status.clone(),
            listener,
        })
    }
}

struct FailingResolver {
    status: Status,
    listener: ResolutionListener,
}

impl Resolver for FailingResolver {
    fn update_resolution(&mut self) {
        self.listener.failed(self.status.clone());
    }
}
