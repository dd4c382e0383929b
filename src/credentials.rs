//! Server credentials.
//!
//! Plaintext vs TLS selection is a property of the credentials object
//! handed to `bind_async`; the server core never parses certificates
//! itself. TLS-capable listeners are constructed by the transport from
//! the rustls configuration carried here.

use std::fmt;
use std::sync::Arc;

/// TLS parameters for a secure listener.
#[derive(Clone)]
pub struct TlsServerSettings {
    /// Complete rustls server configuration (certificate chain, key,
    /// client auth policy, ALPN).
    pub config: Arc<rustls::ServerConfig>,
}

impl TlsServerSettings {
    pub fn new(config: Arc<rustls::ServerConfig>) -> Self {
        Self { config }
    }
}

impl fmt::Debug for TlsServerSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsServerSettings").finish_non_exhaustive()
    }
}

/// Credentials supplied when binding a listener.
#[derive(Debug, Clone)]
pub struct ServerCredentials {
    tls: Option<TlsServerSettings>,
}

impl ServerCredentials {
    /// Plaintext credentials.
    pub fn insecure() -> Self {
        Self { tls: None }
    }

    /// TLS credentials wrapping a rustls server configuration.
    pub fn with_tls(settings: TlsServerSettings) -> Self {
        Self {
            tls: Some(settings),
        }
    }

    /// Whether listeners bound with these credentials speak TLS.
    pub fn is_secure(&self) -> bool {
        self.tls.is_some()
    }

    /// TLS parameters, if secure.
    pub fn tls_settings(&self) -> Option<&TlsServerSettings> {
        self.tls.as_ref()
    }
}
