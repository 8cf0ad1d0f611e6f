use dashmap::DashMap;
use std::sync::Arc;
use url::Url;

/// Source of `Cookie` header values.
pub trait CookieStore: Send + Sync {
    /// Header value for a request to `url`, if any cookie applies.
    fn cookie_header(&self, url: &Url) -> Option<String>;

    /// Response `Set-Cookie` values for `url`. Ignored by default.
    fn store_response_cookies(&self, _url: &Url, _set_cookie: &[String]) {}
}

impl<S: CookieStore + ?Sized> CookieStore for Arc<S> {
    fn cookie_header(&self, url: &Url) -> Option<String> {
        (**self).cookie_header(url)
    }

    fn store_response_cookies(&self, url: &Url, set_cookie: &[String]) {
        (**self).store_response_cookies(url, set_cookie)
    }
}

/// Sends no cookies.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCookies;

impl CookieStore for NoCookies {
    fn cookie_header(&self, _url: &Url) -> Option<String> {
        None
    }
}

/// In-memory jar keyed by domain. A cookie set for `example.com` is sent
/// to `example.com` and its subdomains. Path, expiry and attributes are not
/// modelled.
#[derive(Debug, Clone, Default)]
pub struct StaticCookieStore {
    // domain -> (name, value) in insertion order
    store: Arc<DashMap<String, Vec<(String, String)>>>,
    accept_responses: bool,
}

impl StaticCookieStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also record `name=value` from response `Set-Cookie` headers.
    pub fn accepting_responses(mut self) -> Self {
        self.accept_responses = true;
        self
    }

    pub fn set(&self, domain: &str, name: &str, value: &str) {
        let domain = domain.trim_start_matches('.').to_ascii_lowercase();
        let mut entry = self.store.entry(domain).or_default();
        entry.retain(|(n, _)| n != name);
        entry.push((name.to_string(), value.to_string()));
    }

    pub fn remove(&self, domain: &str, name: &str) {
        if let Some(mut entry) = self.store.get_mut(&domain.to_ascii_lowercase()) {
            entry.retain(|(n, _)| n != name);
        }
    }

    pub fn clear(&self) {
        self.store.clear();
    }

    pub fn len(&self) -> usize {
        self.store.iter().map(|e| e.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn domain_matches(host: &str, domain: &str) -> bool {
    host == domain
        || (host.len() > domain.len()
            && host.ends_with(domain)
            && host.as_bytes()[host.len() - domain.len() - 1] == b'.')
}

impl CookieStore for StaticCookieStore {
    fn cookie_header(&self, url: &Url) -> Option<String> {
        let host = url.host_str()?.to_ascii_lowercase();
        // Longer (more specific) domains first.
        let mut matched: Vec<(usize, String)> = Vec::new();
        for entry in self.store.iter() {
            if !domain_matches(&host, entry.key()) {
                continue;
            }
            for (name, value) in entry.value() {
                matched.push((entry.key().len(), format!("{name}={value}")));
            }
        }
        if matched.is_empty() {
            return None;
        }
        matched.sort_by(|a, b| b.0.cmp(&a.0));
        Some(matched.into_iter().map(|(_, c)| c).collect::<Vec<_>>().join("; "))
    }

    fn store_response_cookies(&self, url: &Url, set_cookie: &[String]) {
        if !self.accept_responses {
            return;
        }
        let Some(host) = url.host_str() else {
            return;
        };
        for line in set_cookie {
            let pair = line.split(';').next().unwrap_or_default();
            if let Some((name, value)) = pair.split_once('=') {
                let name = name.trim();
                if !name.is_empty() {
                    self.set(host, name, value.trim());
                }
            }
        }
    }
}
