//! Cache of proxy authorization values.
//!
//! After a proxy accepts a `Proxy-Authorization` value, later tunnels and
//! requests through the same proxy send it preemptively instead of taking a
//! `407` round trip first. Connection-bound schemes (NTLM) are never cached.
//!
//! Based on Chromium's HttpAuthCache.

use crate::http::auth::scheme_of;
use dashmap::DashMap;
use std::sync::Arc;
use zeroize::Zeroizing;

/// Cached authentication entry.
#[derive(Clone)]
pub struct AuthEntry {
    pub scheme: String,
    header_value: Zeroizing<String>,
}

impl std::fmt::Debug for AuthEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthEntry").field("scheme", &self.scheme).finish_non_exhaustive()
    }
}

impl AuthEntry {
    pub fn new(header_value: &str) -> Self {
        Self {
            scheme: scheme_of(header_value).to_string(),
            header_value: Zeroizing::new(header_value.to_string()),
        }
    }

    pub fn header_value(&self) -> &str {
        &self.header_value
    }
}

/// Thread-safe authentication cache keyed by `host:port`.
#[derive(Debug, Clone, Default)]
pub struct AuthCache {
    entries: Arc<DashMap<String, AuthEntry>>,
}

impl AuthCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(host: &str, port: u16) -> String {
        format!("{}:{}", host.to_ascii_lowercase(), port)
    }

    pub fn lookup(&self, host: &str, port: u16) -> Option<AuthEntry> {
        self.entries.get(&Self::key(host, port)).map(|e| e.clone())
    }

    /// Remember an accepted header value. Returns false for NTLM values.
    pub fn store(&self, host: &str, port: u16, header_value: &str) -> bool {
        let entry = AuthEntry::new(header_value);
        if entry.scheme.eq_ignore_ascii_case("NTLM") {
            return false;
        }
        tracing::debug!(host, port, scheme = %entry.scheme, "caching proxy authorization");
        self.entries.insert(Self::key(host, port), entry);
        true
    }

    /// Drop the entry after the proxy rejected it.
    pub fn remove(&self, host: &str, port: u16) {
        self.entries.remove(&Self::key(host, port));
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_and_lookup() {
        let cache = AuthCache::new();
        assert!(cache.store("Proxy.Example.com", 8080, "Basic dXNlcjpwYXNz"));
        let entry = cache.lookup("proxy.example.com", 8080).unwrap();
        assert_eq!(entry.scheme, "Basic");
        assert_eq!(entry.header_value(), "Basic dXNlcjpwYXNz");
        assert!(cache.lookup("proxy.example.com", 3128).is_none());
    }

    #[test]
    fn test_ntlm_not_cached() {
        let cache = AuthCache::new();
        assert!(!cache.store("proxy.com", 80, "NTLM TlRMTVNTUAAD"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_remove_and_clear() {
        let cache = AuthCache::new();
        cache.store("a.com", 80, "Basic x");
        cache.store("b.com", 80, "Basic y");
        cache.remove("a.com", 80);
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
