//! Live session tracking.
//!
//! Every accepted session gets a record of per-session counters and a
//! channelz socket entity whose snapshot reads the live session on
//! demand. Records are destroyed when the session closes.

use crate::channelz::{
    self, CallTracker, ChannelzRef, EntityInfo, SnapshotFn, SocketInfo,
};
use crate::transport::Http2Session;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Per-session counters. Monotonically non-decreasing for the lifetime
/// of the record.
#[derive(Default)]
pub(crate) struct SessionRecord {
    /// Stream outcomes on this session.
    pub streams: CallTracker,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    last_message_sent_ms: AtomicI64,
    last_message_received_ms: AtomicI64,
}

impl SessionRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn message_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.last_message_sent_ms
            .store(channelz::now_millis(), Ordering::Relaxed);
    }

    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.last_message_received_ms
            .store(channelz::now_millis(), Ordering::Relaxed);
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }
}

/// A live session as tracked by the server.
pub(crate) struct SessionEntry {
    /// Server-assigned session id, the key of the session map.
    pub id: u64,
    pub session: Arc<dyn Http2Session>,
    pub record: Arc<SessionRecord>,
    pub channelz_ref: ChannelzRef,
}

/// Build the on-demand snapshot function registered for a session.
///
/// The closure holds the live session and reads addresses, TLS
/// parameters, counters, and flow-control windows at call time; nothing
/// is cached. Values the transport cannot provide come back as `None`.
pub(crate) fn session_snapshot(
    session: &Arc<dyn Http2Session>,
    record: &Arc<SessionRecord>,
) -> SnapshotFn {
    let session = session.clone();
    let record = record.clone();
    Arc::new(move || {
        let streams = record.streams.snapshot();
        let windows = session.flow_control();
        EntityInfo::Socket(SocketInfo {
            local_target: session.local_target(),
            remote_target: session.remote_target(),
            streams_started: streams.calls_started,
            streams_succeeded: streams.calls_succeeded,
            streams_failed: streams.calls_failed,
            last_stream_started_at: streams.last_call_started_at,
            messages_sent: record.messages_sent(),
            messages_received: record.messages_received(),
            last_message_sent_at: channelz::millis_to_time(
                record.last_message_sent_ms.load(Ordering::Relaxed),
            ),
            last_message_received_at: channelz::millis_to_time(
                record.last_message_received_ms.load(Ordering::Relaxed),
            ),
            local_flow_window: windows.local_window,
            remote_flow_window: windows.remote_window,
            tls: session.tls_info(),
        })
    })
}
