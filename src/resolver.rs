//! Name resolution contract and the default resolver set.
//!
//! A resolver converts a parsed target into a list of concrete addresses
//! and reports them through a [`ResolutionListener`]. The bind engine
//! accepts at most one result per bind; later deliveries are discarded
//! on the listener side.

use crate::status::Status;
use crate::transport::ResolvedTarget;
use crate::uri::{self, Target};
use parking_lot::Mutex;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

/// Schemes the default resolver set understands. Targets with any other
/// scheme are rewritten under the default scheme before resolution.
pub const KNOWN_SCHEMES: &[&str] = &["dns", "ipv4", "ipv6", "unix"];

/// Callbacks receiving the outcome of a resolution pass.
pub struct ResolutionListener {
    on_success: Box<dyn FnMut(Vec<ResolvedTarget>) + Send>,
    on_error: Box<dyn FnMut(Status) + Send>,
}

impl ResolutionListener {
    pub fn new(
        on_success: impl FnMut(Vec<ResolvedTarget>) + Send + 'static,
        on_error: impl FnMut(Status) + Send + 'static,
    ) -> Self {
        Self {
            on_success: Box::new(on_success),
            on_error: Box::new(on_error),
        }
    }

    pub fn resolved(&mut self, addresses: Vec<ResolvedTarget>) {
        (self.on_success)(addresses);
    }

    pub fn failed(&mut self, status: Status) {
        (self.on_error)(status);
    }
}

/// An active resolver for one target.
pub trait Resolver: Send {
    /// Start (or restart) resolution. Outcomes arrive on the listener,
    /// possibly asynchronously.
    fn update_resolution(&mut self);
}

/// Creates resolvers for parsed targets.
pub trait ResolverFactory: Send + Sync {
    fn create(&self, target: &Target, listener: ResolutionListener) -> Box<dyn Resolver>;
}

/// The default resolver set: `dns:`, `ipv4:`, `ipv6:`, `unix:`.
#[derive(Debug, Default)]
pub struct DefaultResolverFactory;

impl ResolverFactory for DefaultResolverFactory {
    fn create(&self, target: &Target, listener: ResolutionListener) -> Box<dyn Resolver> {
        match target.scheme.as_deref() {
            Some("unix") => Box::new(UnixResolver {
                target: target.clone(),
                listener: Arc::new(Mutex::new(listener)),
            }),
            Some("ipv4") | Some("ipv6") => Box::new(LiteralResolver {
                target: target.clone(),
                listener: Arc::new(Mutex::new(listener)),
            }),
            _ => Box::new(DnsResolver {
                target: target.clone(),
                listener: Arc::new(Mutex::new(listener)),
            }),
        }
    }
}

/// Resolves `dns:` targets through the system resolver.
struct DnsResolver {
    target: Target,
    listener: Arc<Mutex<ResolutionListener>>,
}

impl Resolver for DnsResolver {
    fn update_resolution(&mut self) {
        let target = self.target.clone();
        let listener = self.listener.clone();
        tokio::spawn(async move {
            let Some(host_port) = uri::split_host_port(&target.path) else {
                listener.lock().failed(Status::invalid_argument(format!(
                    "Failed to parse target {target}"
                )));
                return;
            };
            let Some(port) = host_port.port else {
                listener.lock().failed(Status::invalid_argument(format!(
                    "No port in target {target}"
                )));
                return;
            };
            match tokio::net::lookup_host((host_port.host.as_str(), port)).await {
                Ok(addresses) => {
                    let addresses: Vec<ResolvedTarget> =
                        addresses.map(ResolvedTarget::Tcp).collect();
                    listener.lock().resolved(addresses);
                }
                Err(err) => {
                    listener.lock().failed(Status::unavailable(format!(
                        "Name resolution failed for target {target}: {err}"
                    )));
                }
            }
        });
    }
}

/// Resolves `ipv4:`/`ipv6:` targets: comma-separated address literals.
struct LiteralResolver {
    target: Target,
    listener: Arc<Mutex<ResolutionListener>>,
}

impl LiteralResolver {
    fn parse(&self) -> Result<Vec<ResolvedTarget>, Status> {
        let mut addresses = Vec::new();
        for entry in self.target.path.split(',') {
            let host_port = uri::split_host_port(entry.trim()).ok_or_else(|| {
                Status::invalid_argument(format!("Failed to parse target {}", self.target))
            })?;
            let ip: IpAddr = host_port.host.parse().map_err(|_| {
                Status::invalid_argument(format!("Failed to parse target {}", self.target))
            })?;
            let port = host_port.port.ok_or_else(|| {
                Status::invalid_argument(format!("No port in target {}", self.target))
            })?;
            addresses.push(ResolvedTarget::Tcp(SocketAddr::new(ip, port)));
        }
        Ok(addresses)
    }
}

impl Resolver for LiteralResolver {
    fn update_resolution(&mut self) {
        let outcome = self.parse();
        let mut listener = self.listener.lock();
        match outcome {
            Ok(addresses) => listener.resolved(addresses),
            Err(status) => listener.failed(status),
        }
    }
}

/// Resolves `unix:` targets to a socket path.
struct UnixResolver {
    target: Target,
    listener: Arc<Mutex<ResolutionListener>>,
}

impl Resolver for UnixResolver {
    fn update_resolution(&mut self) {
        // `unix://` with an empty authority denotes an absolute path
        // whose leading slash the URI parser consumed.
        let path = match self.target.authority.as_deref() {
            Some("") => format!("/{}", self.target.path),
            _ => self.target.path.clone(),
        };
        self.listener
            .lock()
            .resolved(vec![ResolvedTarget::Unix(PathBuf::from(path))]);
    }
}
