//! Host normalization and the top-level host table.
//!
//! Hostnames are canonicalized once, at registration: lowercased, default
//! port 80 applied when omitted, `*` accepted as a port wildcard and as the
//! full wildcard host. Malformed hosts (more than one colon, a port that is
//! neither numeric nor `*`) are rejected here with a validation error rather
//! than deferred to request time.

use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;

use super::error::RegistrationError;
use super::trie::RouteTrie;

/// Default HTTP port applied when a host omits one.
pub const DEFAULT_PORT: u16 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Port {
    Number(u16),
    /// Matches any port (`example.com:*`).
    Any,
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Port::Number(n) => write!(f, "{n}"),
            Port::Any => f.write_str("*"),
        }
    }
}

/// A normalized host table key: lowercase host name plus canonical port.
/// The name `*` is the full wildcard host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostKey {
    name: Arc<str>,
    port: Port,
}

impl HostKey {
    /// The canonical full-wildcard entry, matching any host.
    pub fn wildcard() -> Self {
        Self {
            name: Arc::from("*"),
            port: Port::Any,
        }
    }

    /// Normalize a `host[:port]` string.
    ///
    /// # Errors
    ///
    /// `InvalidHost` when the string is empty, contains more than one colon,
    /// has an empty name part, or has a port that is neither numeric nor `*`.
    pub fn normalize(host: &str) -> Result<Self, RegistrationError> {
        let invalid = |reason: &str| RegistrationError::InvalidHost {
            host: host.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = host.trim();
        if trimmed.is_empty() {
            return Err(invalid("empty host"));
        }
        if trimmed == "*" {
            return Ok(Self::wildcard());
        }

        let mut parts = trimmed.split(':');
        let name = parts.next().unwrap_or_default();
        let port = parts.next();
        if parts.next().is_some() {
            return Err(invalid("more than one ':'"));
        }
        if name.is_empty() {
            return Err(invalid("empty host name"));
        }

        let port = match port {
            None => Port::Number(DEFAULT_PORT),
            Some("*") => Port::Any,
            Some(p) => Port::Number(
                p.parse::<u16>()
                    .map_err(|_| invalid("port is neither numeric nor '*'"))?,
            ),
        };

        Ok(Self {
            name: Arc::from(name.to_ascii_lowercase()),
            port,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn port(&self) -> Port {
        self.port
    }

    fn with_any_port(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            port: Port::Any,
        }
    }
}

impl fmt::Display for HostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.as_ref() == "*" && self.port == Port::Any {
            f.write_str("*")
        } else {
            write!(f, "{}:{}", self.name, self.port)
        }
    }
}

/// Top-level mapping from normalized host to a route trie root.
///
/// Get-or-create runs through DashMap's entry API - the same race-free
/// discipline as trie node creation - so two APIs registering under the same
/// new host never end up with separate tries.
#[derive(Default)]
pub struct HostTable {
    entries: DashMap<HostKey, Arc<RouteTrie>>,
}

impl HostTable {
    pub fn trie_or_create(&self, key: HostKey) -> Arc<RouteTrie> {
        Arc::clone(
            self.entries
                .entry(key)
                .or_insert_with(|| Arc::new(RouteTrie::default()))
                .value(),
        )
    }

    /// Find the trie serving a request host, falling back from the exact
    /// entry through the port wildcard to the full wildcard.
    pub fn lookup(&self, key: &HostKey) -> Option<Arc<RouteTrie>> {
        if let Some(entry) = self.entries.get(key) {
            return Some(Arc::clone(entry.value()));
        }
        if key.port != Port::Any {
            if let Some(entry) = self.entries.get(&key.with_any_port()) {
                return Some(Arc::clone(entry.value()));
            }
        }
        self.entries
            .get(&HostKey::wildcard())
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Read-only lookup without wildcard fallback.
    pub fn get(&self, key: &HostKey) -> Option<Arc<RouteTrie>> {
        self.entries.get(key).map(|e| Arc::clone(e.value()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of the registered host keys.
    pub fn hosts(&self) -> Vec<HostKey> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_port_applied() {
        let bare = HostKey::normalize("example.com").unwrap();
        let explicit = HostKey::normalize("example.com:80").unwrap();
        assert_eq!(bare, explicit);
    }

    #[test]
    fn test_case_normalized() {
        let upper = HostKey::normalize("Example.COM").unwrap();
        let lower = HostKey::normalize("example.com").unwrap();
        assert_eq!(upper, lower);
    }

    #[test]
    fn test_port_wildcard() {
        let key = HostKey::normalize("example.com:*").unwrap();
        assert_eq!(key.port(), Port::Any);
        assert_eq!(key.to_string(), "example.com:*");
    }

    #[test]
    fn test_full_wildcard() {
        let key = HostKey::normalize("*").unwrap();
        assert_eq!(key, HostKey::wildcard());
        assert_eq!(key.to_string(), "*");
    }

    #[test]
    fn test_double_colon_rejected() {
        let err = HostKey::normalize("example.com:80:90").unwrap_err();
        assert!(matches!(err, RegistrationError::InvalidHost { .. }));
    }

    #[test]
    fn test_bad_port_rejected() {
        assert!(HostKey::normalize("example.com:http").is_err());
        assert!(HostKey::normalize("example.com:70000").is_err());
    }

    #[test]
    fn test_lookup_fallback_chain() {
        let table = HostTable::default();
        let exact = HostKey::normalize("api.example.com:8080").unwrap();
        let any_port = HostKey::normalize("api.example.com:*").unwrap();

        table.trie_or_create(any_port.clone());
        assert!(table.lookup(&exact).is_some());
        assert!(table.get(&exact).is_none());

        let other = HostKey::normalize("other.example.com").unwrap();
        assert!(table.lookup(&other).is_none());

        table.trie_or_create(HostKey::wildcard());
        assert!(table.lookup(&other).is_some());
    }

    #[test]
    fn test_port_mismatch_is_not_found() {
        let table = HostTable::default();
        table.trie_or_create(HostKey::normalize("example.com").unwrap());
        let on_81 = HostKey::normalize("example.com:81").unwrap();
        assert!(table.lookup(&on_81).is_none());
    }
}
