//! Server facade and lifecycle.
//!
//! Owns the handler registry, the listener list, and the session map,
//! and drives the bind pipeline, stream dispatch, and shutdown. All
//! shared state lives behind one mutex; counters are atomics updated
//! from dispatch tasks.

use crate::bind;
use crate::channelz::{
    self, CallTracker, ChannelzRef, ChannelzTrace, ChildrenTracker, EntityInfo, ServerInfo,
    SocketInfo, TraceSeverity,
};
use crate::config::ChannelOptions;
use crate::credentials::ServerCredentials;
use crate::dispatch;
use crate::error::ServerError;
use crate::handler::{self, HandlerRegistry, MethodHandler, ServiceDefinition, ServiceImplementation};
use crate::metrics;
use crate::resolver::{self, ResolutionListener, ResolverFactory};
use crate::session::{SessionEntry, SessionRecord, session_snapshot};
use crate::status::Status;
use crate::transport::{
    BoundSocket, HTTP2_CANCEL, HTTP2_NO_ERROR, Http2Session, Http2Transport, ResolvedTarget,
};
use crate::uri;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::oneshot;
use tracing::{debug, info};

/// A bound listening socket owned by the server.
pub(crate) struct ListenerEntry {
    pub socket: Arc<dyn BoundSocket>,
    pub channelz_ref: ChannelzRef,
}

/// State guarded by the server mutex.
pub(crate) struct ServerState {
    pub started: bool,
    pub handlers: HandlerRegistry,
    pub listeners: Vec<ListenerEntry>,
    pub sessions: HashMap<u64, Arc<SessionEntry>>,
    next_session_id: u64,
}

/// Shared core behind the [`Server`] facade.
pub(crate) struct ServerShared {
    pub options: Arc<ChannelOptions>,
    pub transport: Arc<dyn Http2Transport>,
    pub resolver_factory: Arc<dyn ResolverFactory>,
    pub call_tracker: CallTracker,
    pub trace: ChannelzTrace,
    pub listener_children: ChildrenTracker,
    pub session_children: ChildrenTracker,
    pub channelz_ref: ChannelzRef,
    pub state: Mutex<ServerState>,
    unregistered: AtomicBool,
}

impl ServerShared {
    fn server_info(&self) -> ServerInfo {
        ServerInfo {
            call_tracker: self.call_tracker.snapshot(),
            trace: self.trace.snapshot(),
            listen_sockets: self.listener_children.child_lists().sockets,
            sessions: self.session_children.child_lists().sockets,
        }
    }

    /// Unregister the server's channelz ref. At most once, even under
    /// concurrent shutdown paths.
    fn unregister_server_ref(&self) {
        if self
            .unregistered
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            channelz::registry().unregister(&self.channelz_ref);
        }
    }

    /// Register newly bound sockets: channelz entity, child ref, listener
    /// list entry, and an accept loop each.
    fn install_listeners(self: &Arc<Self>, sockets: Vec<Box<dyn BoundSocket>>) {
        for socket in sockets {
            let socket: Arc<dyn BoundSocket> = Arc::from(socket);
            let local = socket.local_target();
            let snapshot_local = local.clone();
            let channelz_ref = channelz::registry().register_socket(
                local.to_string(),
                Arc::new(move || {
                    EntityInfo::Socket(SocketInfo {
                        local_target: Some(snapshot_local.clone()),
                        ..Default::default()
                    })
                }),
            );
            self.listener_children.ref_child(&channelz_ref);
            metrics::LISTENERS_BOUND.increment();
            info!(address = %local, "listening");
            self.state.lock().listeners.push(ListenerEntry {
                socket: socket.clone(),
                channelz_ref,
            });
            self.spawn_accept_loop(socket);
        }
    }

    fn spawn_accept_loop(self: &Arc<Self>, socket: Arc<dyn BoundSocket>) {
        let shared = self.clone();
        tokio::spawn(async move {
            while let Some(session) = socket.accept().await {
                shared.accept_session(Arc::from(session));
            }
        });
    }

    /// Admit one accepted session, or discard it when the server is not
    /// started.
    fn accept_session(self: &Arc<Self>, session: Arc<dyn Http2Session>) {
        metrics::SESSIONS_ACCEPTED.increment();
        let entry = {
            let mut state = self.state.lock();
            if !state.started {
                drop(state);
                debug!("discarding session accepted before start");
                session.destroy(HTTP2_NO_ERROR);
                return;
            }
            let id = state.next_session_id;
            state.next_session_id += 1;
            let record = Arc::new(SessionRecord::new());
            let name = session
                .remote_target()
                .map(|t| t.to_string())
                .unwrap_or_default();
            let channelz_ref = channelz::registry()
                .register_socket(name, session_snapshot(&session, &record));
            let entry = Arc::new(SessionEntry {
                id,
                session: session.clone(),
                record,
                channelz_ref,
            });
            state.sessions.insert(id, entry.clone());
            entry
        };
        self.session_children.ref_child(&entry.channelz_ref);
        metrics::SESSIONS_ACTIVE.increment();

        let shared = self.clone();
        tokio::spawn(async move {
            while let Some(incoming) = entry.session.accept_stream().await {
                tokio::spawn(dispatch::dispatch_stream(
                    shared.clone(),
                    entry.clone(),
                    incoming,
                ));
            }
            shared.remove_session(&entry);
        });
    }

    /// Session close handler: drop tracking and telemetry for the entry.
    fn remove_session(&self, entry: &Arc<SessionEntry>) {
        let removed = self.state.lock().sessions.remove(&entry.id);
        self.session_children.unref_child(&entry.channelz_ref);
        channelz::registry().unregister(&entry.channelz_ref);
        if removed.is_some() {
            metrics::SESSIONS_ACTIVE.decrement();
        }
    }
}

/// gRPC server runtime.
///
/// Construct with [`Server::builder`], register services, bind with
/// [`Server::bind_async`], then [`Server::start`]. All async paths
/// require a running Tokio runtime.
pub struct Server {
    shared: Arc<ServerShared>,
}

/// Builder for [`Server`].
pub struct ServerBuilder {
    transport: Arc<dyn Http2Transport>,
    options: ChannelOptions,
    resolver_factory: Arc<dyn ResolverFactory>,
}

impl ServerBuilder {
    pub fn new(transport: Arc<dyn Http2Transport>) -> Self {
        Self {
            transport,
            options: ChannelOptions::default(),
            resolver_factory: Arc::new(resolver::DefaultResolverFactory),
        }
    }

    pub fn options(mut self, options: ChannelOptions) -> Self {
        self.options = options;
        self
    }

    pub fn resolver_factory(mut self, factory: Arc<dyn ResolverFactory>) -> Self {
        self.resolver_factory = factory;
        self
    }

    pub fn build(self) -> Server {
        let shared = Arc::new_cyclic(|weak: &Weak<ServerShared>| {
            let snapshot_weak = weak.clone();
            let channelz_ref = channelz::registry().register_server(Arc::new(move || {
                let info = snapshot_weak
                    .upgrade()
                    .map(|shared| shared.server_info())
                    .unwrap_or_default();
                EntityInfo::Server(info)
            }));
            ServerShared {
                options: Arc::new(self.options),
                transport: self.transport,
                resolver_factory: self.resolver_factory,
                call_tracker: CallTracker::new(),
                trace: ChannelzTrace::new(),
                listener_children: ChildrenTracker::new(),
                session_children: ChildrenTracker::new(),
                channelz_ref,
                state: Mutex::new(ServerState {
                    started: false,
                    handlers: HandlerRegistry::new(),
                    listeners: Vec::new(),
                    sessions: HashMap::new(),
                    next_session_id: 1,
                }),
                unregistered: AtomicBool::new(false),
            }
        });
        Server { shared }
    }
}

impl Server {
    pub fn builder(transport: Arc<dyn Http2Transport>) -> ServerBuilder {
        ServerBuilder::new(transport)
    }

    /// Construct a server with default options.
    pub fn new(transport: Arc<dyn Http2Transport>) -> Self {
        Self::builder(transport).build()
    }

    /// Register every method of a service definition.
    ///
    /// Methods missing from the implementation get a default handler
    /// answering UNIMPLEMENTED. A path collision fails the call; methods
    /// registered before the collision stay registered.
    pub fn add_service(
        &self,
        definition: &ServiceDefinition,
        implementation: &ServiceImplementation,
    ) -> Result<(), ServerError> {
        let handlers = handler::build_service_handlers(definition, implementation)?;
        let mut state = self.shared.state.lock();
        for method in handlers {
            let path = method.path.clone();
            if !state.handlers.register(method) {
                return Err(ServerError::DuplicateMethod(path));
            }
        }
        Ok(())
    }

    /// Unregister every path of a service definition. Paths that are not
    /// registered are skipped silently.
    pub fn remove_service(&self, definition: &ServiceDefinition) {
        let mut state = self.shared.state.lock();
        for method in definition.values() {
            state.handlers.unregister(&method.path);
        }
    }

    /// Register a single handler. Returns false iff the path is taken.
    pub fn register(&self, handler: MethodHandler) -> bool {
        self.shared.state.lock().handlers.register(handler)
    }

    /// Unregister a single path.
    pub fn unregister(&self, path: &str) -> bool {
        self.shared.state.lock().handlers.unregister(path)
    }

    /// Legacy synchronous bind. Always fails; use [`Server::bind_async`].
    pub fn bind(
        &self,
        _target: &str,
        _credentials: &ServerCredentials,
    ) -> Result<u16, ServerError> {
        Err(ServerError::UseBindAsync)
    }

    /// Legacy proto-service registration. Always fails; use
    /// [`Server::add_service`].
    pub fn add_proto_service(&self) -> Result<(), ServerError> {
        Err(ServerError::UseAddService)
    }

    /// Legacy HTTP/2 port registration. Always fails.
    pub fn add_http2_port(&self) -> Result<(), ServerError> {
        Err(ServerError::NotYetImplemented)
    }

    /// Resolve `target` and bind a listening socket per resolved address.
    ///
    /// Synchronous failures (unparsable target, server already started)
    /// return `Err` immediately. The operational outcome arrives on
    /// `callback`, always invoked from a spawned task: the common bound
    /// port on success, or the aggregated bind error. Partial binds
    /// succeed with an informational log.
    pub fn bind_async(
        &self,
        target: &str,
        credentials: ServerCredentials,
        callback: impl FnOnce(Result<u16, ServerError>) + Send + 'static,
    ) -> Result<(), ServerError> {
        if self.shared.state.lock().started {
            return Err(ServerError::AlreadyStarted);
        }
        let parsed = uri::parse_target(target)
            .ok_or_else(|| ServerError::InvalidTarget(target.to_string()))?;
        let parsed = uri::map_default_scheme(parsed, resolver::KNOWN_SCHEMES);
        debug!(bind_target = %parsed, "binding");

        // The resolver may deliver results more than once; only the
        // first one is accepted, by consuming the channel sender.
        let (tx, rx) = oneshot::channel::<Result<Vec<ResolvedTarget>, Status>>();
        let tx = Arc::new(Mutex::new(Some(tx)));
        let err_tx = tx.clone();
        let listener = ResolutionListener::new(
            move |addresses| {
                if let Some(tx) = tx.lock().take() {
                    let _ = tx.send(Ok(addresses));
                }
            },
            move |status| {
                if let Some(tx) = err_tx.lock().take() {
                    let _ = tx.send(Err(status));
                }
            },
        );
        let mut target_resolver = self.shared.resolver_factory.create(&parsed, listener);
        target_resolver.update_resolution();

        let shared = self.shared.clone();
        let target_string = target.to_string();
        tokio::spawn(async move {
            // The resolver owns the listener; keep it alive until the
            // first outcome lands.
            let _resolver = target_resolver;
            let result = match rx.await {
                Ok(Ok(addresses)) => {
                    if addresses.is_empty() {
                        Err(ServerError::NoAddressesResolved(target_string))
                    } else {
                        let settings = shared.options.http2_settings();
                        let tls = credentials.tls_settings().cloned();
                        bind::bind_addresses(shared.transport.as_ref(), addresses, &settings, tls)
                            .await
                            .map(|outcome| {
                                let port = outcome.port;
                                shared.install_listeners(outcome.sockets);
                                port
                            })
                    }
                }
                Ok(Err(status)) => Err(ServerError::ResolutionFailed(
                    status
                        .details()
                        .unwrap_or("Name resolution failed")
                        .to_string(),
                )),
                Err(_) => Err(ServerError::ResolutionFailed(
                    "resolver terminated without a result".to_string(),
                )),
            };
            callback(result);
        });
        Ok(())
    }

    /// Start admitting sessions. Fails when nothing is bound and
    /// listening, or when already started.
    pub fn start(&self) -> Result<(), ServerError> {
        {
            let mut state = self.shared.state.lock();
            if state.listeners.is_empty()
                || state.listeners.iter().all(|l| !l.socket.is_listening())
            {
                return Err(ServerError::NotBound);
            }
            if state.started {
                return Err(ServerError::AlreadyStarted);
            }
            state.started = true;
        }
        self.shared.trace.add_trace(TraceSeverity::Info, "Starting");
        info!("Starting gRPC server");
        Ok(())
    }

    /// Graceful shutdown: stop admitting sessions, close listeners, let
    /// in-flight streams drain, then invoke `callback`.
    ///
    /// The server's channelz ref is unregistered at most once across
    /// concurrent shutdown calls. With no pending work the callback
    /// fires on the next tick.
    pub fn try_shutdown(&self, callback: impl FnOnce() + Send + 'static) {
        let shared = self.shared.clone();
        tokio::spawn(async move {
            let (listeners, sessions) = {
                let mut state = shared.state.lock();
                state.started = false;
                let listeners: Vec<ListenerEntry> = state.listeners.drain(..).collect();
                let sessions: Vec<Arc<SessionEntry>> = state.sessions.values().cloned().collect();
                (listeners, sessions)
            };

            let mut pending = Vec::new();
            for listener in listeners {
                let shared = shared.clone();
                pending.push(tokio::spawn(async move {
                    listener.socket.close().await;
                    shared.listener_children.unref_child(&listener.channelz_ref);
                    channelz::registry().unregister(&listener.channelz_ref);
                }));
            }
            for entry in sessions {
                if !entry.session.is_closed() {
                    entry.session.graceful_close();
                }
                pending.push(tokio::spawn(entry.session.closed()));
            }
            for handle in pending {
                let _ = handle.await;
            }

            shared.unregister_server_ref();
            callback();
        });
    }

    /// Forced shutdown: close listeners, destroy every session with the
    /// HTTP/2 CANCEL code, clear the session map, unregister telemetry.
    pub fn force_shutdown(&self) {
        let shared = &self.shared;
        let (listeners, sessions) = {
            let mut state = shared.state.lock();
            state.started = false;
            let listeners: Vec<ListenerEntry> = state.listeners.drain(..).collect();
            let sessions: Vec<Arc<SessionEntry>> =
                state.sessions.drain().map(|(_, entry)| entry).collect();
            (listeners, sessions)
        };
        for listener in listeners {
            let shared = shared.clone();
            tokio::spawn(async move {
                listener.socket.close().await;
                shared.listener_children.unref_child(&listener.channelz_ref);
                channelz::registry().unregister(&listener.channelz_ref);
            });
        }
        for entry in sessions {
            entry.session.destroy(HTTP2_CANCEL);
            metrics::SESSIONS_ACTIVE.decrement();
        }
        shared.unregister_server_ref();
    }

    /// The server's channelz reference, for external inspection.
    pub fn get_channelz_ref(&self) -> ChannelzRef {
        self.shared.channelz_ref.clone()
    }

    /// Whether the server is admitting sessions.
    pub fn is_started(&self) -> bool {
        self.shared.state.lock().started
    }

    /// Ports of the currently bound TCP listeners.
    pub fn bound_ports(&self) -> Vec<u16> {
        self.shared
            .state
            .lock()
            .listeners
            .iter()
            .filter_map(|l| l.socket.local_target().port())
            .collect()
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.shared.state.lock().sessions.len()
    }
}
