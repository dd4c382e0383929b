//! gRPC target URI grammar.
//!
//! Targets take the form `scheme:path` or `scheme://authority/path`, with
//! the scheme optional. A target whose scheme is absent or unknown is
//! rewritten under the default scheme with the full original string as its
//! path, so `127.0.0.1:8080` becomes `dns:127.0.0.1:8080`.

use std::fmt;

/// The scheme applied to targets that carry none.
pub const DEFAULT_SCHEME: &str = "dns";

/// A parsed gRPC target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// URI scheme, e.g. `dns` or `unix`.
    pub scheme: Option<String>,
    /// Authority component, present only in `scheme://authority/path` form.
    pub authority: Option<String>,
    /// Scheme-specific path. Never empty.
    pub path: String,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(scheme) = &self.scheme {
            write!(f, "{}:", scheme)?;
        }
        if let Some(authority) = &self.authority {
            write!(f, "//{}/", authority)?;
        }
        f.write_str(&self.path)
    }
}

fn is_scheme_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'+' || b == b'.' || b == b'-'
}

/// Parse a target string. Returns `None` when the string has no usable
/// path component.
pub fn parse_target(raw: &str) -> Option<Target> {
    let (scheme, rest) = match raw.find(':') {
        Some(i) if i > 0 && raw.as_bytes()[..i].iter().all(|&b| is_scheme_byte(b)) => {
            (Some(raw[..i].to_string()), &raw[i + 1..])
        }
        _ => (None, raw),
    };

    let (authority, path) = match rest.strip_prefix("//") {
        Some(r) => {
            let slash = r.find('/')?;
            (Some(r[..slash].to_string()), r[slash + 1..].to_string())
        }
        None => (None, rest.to_string()),
    };

    if path.is_empty() {
        return None;
    }

    Some(Target {
        scheme,
        authority,
        path,
    })
}

/// Rewrite a target under [`DEFAULT_SCHEME`] unless its scheme is one of
/// `known`. The rewritten path is the target's original string form, so a
/// bare `host:port` survives intact.
pub fn map_default_scheme(target: Target, known: &[&str]) -> Target {
    match &target.scheme {
        Some(scheme) if known.contains(&scheme.as_str()) => target,
        _ => Target {
            scheme: Some(DEFAULT_SCHEME.to_string()),
            authority: None,
            path: target.to_string(),
        },
    }
}

/// A `host[:port]` pair split out of a target path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPort {
    pub host: String,
    pub port: Option<u16>,
}

/// Split a `host[:port]` string, handling bracketed IPv6 literals.
/// Returns `None` for malformed input (empty host, unparsable port).
pub fn split_host_port(s: &str) -> Option<HostPort> {
    if let Some(rest) = s.strip_prefix('[') {
        let end = rest.find(']')?;
        let host = rest[..end].to_string();
        if host.is_empty() {
            return None;
        }
        let after = &rest[end + 1..];
        let port = match after.strip_prefix(':') {
            Some(p) => Some(p.parse().ok()?),
            None if after.is_empty() => None,
            None => return None,
        };
        return Some(HostPort { host, port });
    }

    match s.rfind(':') {
        // A single colon separates host from port. More than one colon
        // means an unbracketed IPv6 literal with no port.
        Some(i) if !s[..i].contains(':') => {
            if s[..i].is_empty() {
                return None;
            }
            let port = s[i + 1..].parse().ok()?;
            Some(HostPort {
                host: s[..i].to_string(),
                port: Some(port),
            })
        }
        Some(_) => Some(HostPort {
            host: s.to_string(),
            port: None,
        }),
        None if s.is_empty() => None,
        None => Some(HostPort {
            host: s.to_string(),
            port: None,
        }),
    }
}
