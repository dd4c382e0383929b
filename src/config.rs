//! Server configuration.
//!
//! Channel options mirror the option keys a client/server pair negotiates;
//! the HTTP/2 settings handed to the transport are derived from them.

use serde::Deserialize;

/// Options governing a server instance.
///
/// Loadable from TOML; unset fields keep the transport's defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChannelOptions {
    /// Cap on concurrent streams per session (HTTP/2
    /// SETTINGS_MAX_CONCURRENT_STREAMS).
    pub max_concurrent_streams: Option<u32>,

    /// Cap on per-session transport memory, in bytes.
    pub max_session_memory: Option<u64>,

    /// Cap on decoded request message size, in bytes.
    pub max_receive_message_length: Option<u32>,

    /// Cap on encoded response message size, in bytes.
    pub max_send_message_length: Option<u32>,
}

impl ChannelOptions {
    /// Derive the settings handed to the HTTP/2 transport when binding.
    pub fn http2_settings(&self) -> Http2ServerSettings {
        Http2ServerSettings {
            max_concurrent_streams: self.max_concurrent_streams,
            max_session_memory: self.max_session_memory,
            max_send_header_block_length: u32::MAX,
            idle_timeout: None,
        }
    }
}

/// Settings for a listening HTTP/2 socket.
///
/// The send-header-block limit is pinned to its maximum and the idle
/// timeout is disabled: the server holds no timeout on individual
/// connections itself.
#[derive(Debug, Clone, Copy)]
pub struct Http2ServerSettings {
    /// SETTINGS_MAX_CONCURRENT_STREAMS advertised to peers.
    pub max_concurrent_streams: Option<u32>,
    /// Per-session memory cap, in bytes.
    pub max_session_memory: Option<u64>,
    /// Maximum serialized header block the transport may send.
    pub max_send_header_block_length: u32,
    /// Idle timeout on accepted sessions. Always `None`.
    pub idle_timeout: Option<std::time::Duration>,
}
