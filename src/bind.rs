//! Bind engine.
//!
//! Turns a resolved address list into zero or more listening sockets
//! with partial-success semantics: per-address failures are logged and
//! counted, and the operation fails only when no address bound at all.

use crate::config::Http2ServerSettings;
use crate::credentials::TlsServerSettings;
use crate::error::ServerError;
use crate::transport::{BoundSocket, Http2Transport, ResolvedTarget};
use tracing::{error, info, warn};

/// Aggregate result of binding one resolved address list.
pub(crate) struct BindOutcome {
    /// The common port of the bound sockets. 1 for non-TCP binds.
    pub port: u16,
    /// How many addresses bound.
    pub count: usize,
    /// How many addresses were resolved.
    pub total: usize,
    pub sockets: Vec<Box<dyn BoundSocket>>,
}

/// Bind every address in the list, classified by the first address:
/// non-TCP addresses bind by path, TCP addresses with an explicit port
/// must all land on that port, and a wildcard port is assigned by the
/// OS once and propagated to the remaining addresses.
pub(crate) async fn bind_addresses(
    transport: &dyn Http2Transport,
    addresses: Vec<ResolvedTarget>,
    settings: &Http2ServerSettings,
    tls: Option<TlsServerSettings>,
) -> Result<BindOutcome, ServerError> {
    debug_assert!(!addresses.is_empty());
    let total = addresses.len();

    match addresses[0].port() {
        // Non-TCP (e.g. Unix socket path): bind by path, report a
        // stand-in port.
        None => {
            let mut sockets = Vec::new();
            for address in &addresses {
                match transport.bind(address, settings, tls.clone()).await {
                    Ok(socket) => sockets.push(socket),
                    Err(err) => warn!(%address, %err, "failed to bind address"),
                }
            }
            finish(1, sockets, total)
        }
        Some(0) => bind_wildcard(transport, &addresses, settings, tls, total).await,
        Some(_) => bind_specific(transport, &addresses, settings, tls, total).await,
    }
}

/// Explicit-port path: every address binds as resolved and the bound
/// ports must agree.
async fn bind_specific(
    transport: &dyn Http2Transport,
    addresses: &[ResolvedTarget],
    settings: &Http2ServerSettings,
    tls: Option<TlsServerSettings>,
    total: usize,
) -> Result<BindOutcome, ServerError> {
    let mut sockets: Vec<Box<dyn BoundSocket>> = Vec::new();
    let mut bound_port = None;
    for address in addresses {
        match transport.bind(address, settings, tls.clone()).await {
            Ok(socket) => {
                let port = socket.local_target().port().unwrap_or(0);
                match bound_port {
                    None => bound_port = Some(port),
                    Some(previous) if previous != port => {
                        return Err(ServerError::PortMismatch);
                    }
                    Some(_) => {}
                }
                sockets.push(socket);
            }
            Err(err) => warn!(%address, %err, "failed to bind address"),
        }
    }
    finish(bound_port.unwrap_or(0), sockets, total)
}

/// Wildcard path: bind the first address that accepts an OS-assigned
/// port, then re-bind the remaining addresses to that port. Later
/// addresses that cannot take the port fail into the partial count; no
/// second wildcard round is attempted.
async fn bind_wildcard(
    transport: &dyn Http2Transport,
    addresses: &[ResolvedTarget],
    settings: &Http2ServerSettings,
    tls: Option<TlsServerSettings>,
    total: usize,
) -> Result<BindOutcome, ServerError> {
    for (index, address) in addresses.iter().enumerate() {
        match transport.bind(address, settings, tls.clone()).await {
            Ok(socket) => {
                let port = socket.local_target().port().unwrap_or(0);
                let mut sockets = vec![socket];
                for rest in &addresses[index + 1..] {
                    let pinned = rest.with_port(port);
                    match transport.bind(&pinned, settings, tls.clone()).await {
                        Ok(socket) => sockets.push(socket),
                        Err(err) => warn!(address = %pinned, %err, "failed to bind address"),
                    }
                }
                return finish(port, sockets, total);
            }
            Err(err) => warn!(%address, %err, "failed to bind address"),
        }
    }
    finish(0, Vec::new(), total)
}

fn finish(
    port: u16,
    sockets: Vec<Box<dyn BoundSocket>>,
    total: usize,
) -> Result<BindOutcome, ServerError> {
    let count = sockets.len();
    if count == 0 {
        let err = ServerError::NoAddressBound(total);
        error!("{err}");
        return Err(err);
    }
    if count < total {
        info!("Only {count} addresses added out of total {total} resolved");
    }
    Ok(BindOutcome {
        port,
        count,
        total,
        sockets,
    })
}
