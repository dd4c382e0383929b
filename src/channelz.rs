//! Process-wide telemetry registry.
//!
//! Servers, listening sockets, and sessions register themselves here with
//! a snapshot function; consumers pull point-in-time state by entity id.
//! Ids are globally monotonic for the life of the process. Snapshot
//! functions read live state on demand and never cache.

use crate::transport::{ResolvedTarget, TlsSessionInfo};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Trace events retained per entity; older events are dropped.
const RETAINED_TRACE_EVENTS: usize = 32;

pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

pub(crate) fn millis_to_time(millis: i64) -> Option<SystemTime> {
    (millis > 0).then(|| UNIX_EPOCH + Duration::from_millis(millis as u64))
}

/// Kind of a registered entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Server,
    Socket,
}

/// Handle naming a registered entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelzRef {
    id: u64,
    kind: EntityKind,
    name: Option<String>,
}

impl ChannelzRef {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Entity name; sockets carry their address string, servers none.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

/// Severity of a trace event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceSeverity {
    Info,
    Warning,
    Error,
}

/// One entry in an entity's trace log.
#[derive(Debug, Clone)]
pub struct TraceEvent {
    pub severity: TraceSeverity,
    pub description: String,
    pub timestamp: SystemTime,
}

/// Bounded trace log attached to a server entity.
#[derive(Default)]
pub struct ChannelzTrace {
    events: Mutex<VecDeque<TraceEvent>>,
    events_logged: AtomicU64,
}

impl ChannelzTrace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a trace event, evicting the oldest past the retention cap.
    pub fn add_trace(&self, severity: TraceSeverity, description: impl Into<String>) {
        self.events_logged.fetch_add(1, Ordering::Relaxed);
        let mut events = self.events.lock();
        if events.len() == RETAINED_TRACE_EVENTS {
            events.pop_front();
        }
        events.push_back(TraceEvent {
            severity,
            description: description.into(),
            timestamp: SystemTime::now(),
        });
    }

    /// Total events recorded, including evicted ones.
    pub fn events_logged(&self) -> u64 {
        self.events_logged.load(Ordering::Relaxed)
    }

    /// Currently retained events, oldest first.
    pub fn snapshot(&self) -> Vec<TraceEvent> {
        self.events.lock().iter().cloned().collect()
    }
}

/// Counters for call outcomes on a server or session.
///
/// Counters only ever increase for the lifetime of the owning record.
#[derive(Default)]
pub struct CallTracker {
    started: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    last_started_ms: AtomicI64,
}

impl CallTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_call_started(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
        self.last_started_ms.store(now_millis(), Ordering::Relaxed);
    }

    pub fn add_call_succeeded(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_call_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CallTrackerSnapshot {
        CallTrackerSnapshot {
            calls_started: self.started.load(Ordering::Relaxed),
            calls_succeeded: self.succeeded.load(Ordering::Relaxed),
            calls_failed: self.failed.load(Ordering::Relaxed),
            last_call_started_at: millis_to_time(self.last_started_ms.load(Ordering::Relaxed)),
        }
    }
}

/// Point-in-time view of a [`CallTracker`].
#[derive(Debug, Clone, Default)]
pub struct CallTrackerSnapshot {
    pub calls_started: u64,
    pub calls_succeeded: u64,
    pub calls_failed: u64,
    pub last_call_started_at: Option<SystemTime>,
}

/// Child references held by a parent entity.
///
/// A child may be referenced more than once; it leaves the child list
/// only when every reference has been released.
#[derive(Default)]
pub struct ChildrenTracker {
    children: Mutex<HashMap<u64, ChildEntry>>,
}

struct ChildEntry {
    reference: ChannelzRef,
    refs: usize,
}

/// Child references grouped by kind.
#[derive(Debug, Clone, Default)]
pub struct ChildLists {
    pub sockets: Vec<ChannelzRef>,
}

impl ChildrenTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ref_child(&self, child: &ChannelzRef) {
        let mut children = self.children.lock();
        children
            .entry(child.id())
            .or_insert_with(|| ChildEntry {
                reference: child.clone(),
                refs: 0,
            })
            .refs += 1;
    }

    pub fn unref_child(&self, child: &ChannelzRef) {
        let mut children = self.children.lock();
        if let Some(entry) = children.get_mut(&child.id()) {
            entry.refs -= 1;
            if entry.refs == 0 {
                children.remove(&child.id());
            }
        }
    }

    /// Live children, sorted by id.
    pub fn child_lists(&self) -> ChildLists {
        let children = self.children.lock();
        let mut sockets: Vec<ChannelzRef> = children
            .values()
            .filter(|e| e.reference.kind() == EntityKind::Socket)
            .map(|e| e.reference.clone())
            .collect();
        sockets.sort_by_key(|r| r.id());
        ChildLists { sockets }
    }
}

/// Snapshot of a server entity.
#[derive(Debug, Clone, Default)]
pub struct ServerInfo {
    pub call_tracker: CallTrackerSnapshot,
    pub trace: Vec<TraceEvent>,
    pub listen_sockets: Vec<ChannelzRef>,
    pub sessions: Vec<ChannelzRef>,
}

/// Snapshot of a socket entity (listener or session).
///
/// Fields the transport cannot provide (TLS on plaintext sessions, flow
/// windows on listeners) are `None`.
#[derive(Debug, Clone, Default)]
pub struct SocketInfo {
    pub local_target: Option<ResolvedTarget>,
    pub remote_target: Option<ResolvedTarget>,
    pub streams_started: u64,
    pub streams_succeeded: u64,
    pub streams_failed: u64,
    pub last_stream_started_at: Option<SystemTime>,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub last_message_sent_at: Option<SystemTime>,
    pub last_message_received_at: Option<SystemTime>,
    pub local_flow_window: Option<i64>,
    pub remote_flow_window: Option<i64>,
    pub tls: Option<TlsSessionInfo>,
}

/// Snapshot of any registered entity.
#[derive(Debug, Clone)]
pub enum EntityInfo {
    Server(ServerInfo),
    Socket(SocketInfo),
}

/// Snapshot function supplied at registration time.
pub type SnapshotFn = Arc<dyn Fn() -> EntityInfo + Send + Sync>;

struct RegistryEntry {
    reference: ChannelzRef,
    snapshot: SnapshotFn,
}

/// The process-wide registry.
pub struct ChannelzRegistry {
    next_id: AtomicU64,
    entries: Mutex<HashMap<u64, RegistryEntry>>,
}

static REGISTRY: LazyLock<ChannelzRegistry> = LazyLock::new(|| ChannelzRegistry {
    next_id: AtomicU64::new(1),
    entries: Mutex::new(HashMap::new()),
});

/// The process-wide registry instance.
pub fn registry() -> &'static ChannelzRegistry {
    &REGISTRY
}

impl ChannelzRegistry {
    fn register(&self, kind: EntityKind, name: Option<String>, snapshot: SnapshotFn) -> ChannelzRef {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let reference = ChannelzRef { id, kind, name };
        self.entries.lock().insert(
            id,
            RegistryEntry {
                reference: reference.clone(),
                snapshot,
            },
        );
        reference
    }

    /// Register a server entity.
    pub fn register_server(&self, snapshot: SnapshotFn) -> ChannelzRef {
        self.register(EntityKind::Server, None, snapshot)
    }

    /// Register a socket entity under its address name.
    pub fn register_socket(&self, name: impl Into<String>, snapshot: SnapshotFn) -> ChannelzRef {
        self.register(EntityKind::Socket, Some(name.into()), snapshot)
    }

    /// Remove an entity. Unregistering an absent id is a no-op.
    pub fn unregister(&self, reference: &ChannelzRef) {
        self.entries.lock().remove(&reference.id());
    }

    /// Whether an id is currently registered.
    pub fn contains(&self, id: u64) -> bool {
        self.entries.lock().contains_key(&id)
    }

    /// Pull a snapshot of any entity by id.
    pub fn get_info(&self, id: u64) -> Option<EntityInfo> {
        let snapshot = {
            let entries = self.entries.lock();
            entries.get(&id).map(|e| e.snapshot.clone())
        };
        snapshot.map(|f| f())
    }

    /// Pull a server snapshot by id.
    pub fn server_info(&self, id: u64) -> Option<ServerInfo> {
        match self.get_info(id)? {
            EntityInfo::Server(info) => Some(info),
            EntityInfo::Socket(_) => None,
        }
    }

    /// Pull a socket snapshot by id.
    pub fn socket_info(&self, id: u64) -> Option<SocketInfo> {
        match self.get_info(id)? {
            EntityInfo::Socket(info) => Some(info),
            EntityInfo::Server(_) => None,
        }
    }

    /// The reference registered under an id, if live.
    pub fn get_ref(&self, id: u64) -> Option<ChannelzRef> {
        self.entries.lock().get(&id).map(|e| e.reference.clone())
    }
}
