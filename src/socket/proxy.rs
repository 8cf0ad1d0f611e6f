//! Forward proxy configuration.
//!
//! Plain `http` targets are sent to the proxy in absolute form; `https`
//! targets are reached through a `CONNECT` tunnel opened by the connect job.

use crate::base::neterror::NetError;
use crate::http::auth::{BasicResolver, Credentials};
use url::Url;

/// Forward HTTP proxy with optional credentials and bypass list.
#[derive(Debug, Clone)]
pub struct ProxySettings {
    /// Proxy URL (e.g., `http://proxy.com:8080`)
    pub url: Url,
    credentials: Option<Credentials>,
    /// Host suffixes reached directly.
    bypass: Vec<String>,
}

impl PartialEq for ProxySettings {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl ProxySettings {
    /// Create proxy settings from URL string. Only `http://` proxies are supported.
    pub fn new(url_str: &str) -> Result<Self, NetError> {
        let url = Url::parse(url_str).map_err(|_| NetError::InvalidUrl)?;
        if url.scheme() != "http" {
            return Err(NetError::UnknownUrlScheme);
        }
        if url.host_str().is_none() {
            return Err(NetError::InvalidUrl);
        }
        Ok(Self {
            url,
            credentials: None,
            bypass: Vec::new(),
        })
    }

    /// Add authentication credentials, sent preemptively as `Basic` and
    /// offered to the challenge resolver on `407`.
    pub fn with_auth(mut self, user: &str, pass: &str) -> Self {
        self.credentials = Some(Credentials::new(user, pass));
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Comma-separated host suffixes that skip the proxy (`NO_PROXY` style).
    pub fn with_bypass(mut self, no_proxy: &str) -> Self {
        self.bypass = no_proxy
            .split(',')
            .map(|s| s.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        self
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Check if URL should bypass this proxy.
    pub fn should_bypass(&self, target: &Url) -> bool {
        let Some(host) = target.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        self.bypass.iter().any(|rule| {
            rule == "*"
                || host == *rule
                || (host.len() > rule.len()
                    && host.ends_with(rule.as_str())
                    && host.as_bytes()[host.len() - rule.len() - 1] == b'.')
        })
    }

    /// Preemptive `Proxy-Authorization` value.
    pub fn basic_auth_header(&self) -> Option<String> {
        self.credentials.as_ref().map(BasicResolver::header_value)
    }

    pub fn host_port(&self) -> Result<(&str, u16), NetError> {
        let host = self.url.host_str().ok_or(NetError::InvalidUrl)?;
        Ok((host, self.url.port().unwrap_or(80)))
    }

    /// Identity used in pool keys and the proxy auth cache.
    pub fn key(&self) -> String {
        let (host, port) = self.host_port().unwrap_or(("", 0));
        format!("{}:{}", host.to_ascii_lowercase(), port)
    }
}

/// Builder for ProxySettings.
#[derive(Default)]
pub struct ProxyBuilder {
    url: Option<String>,
    credentials: Option<Credentials>,
    no_proxy: String,
}

impl ProxyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn url(mut self, url: &str) -> Self {
        self.url = Some(url.to_string());
        self
    }

    /// Set HTTP proxy from `host:port`.
    pub fn http(self, host_port: &str) -> Self {
        self.url(&format!("http://{}", host_port.trim_start_matches("http://")))
    }

    pub fn auth(mut self, username: &str, password: &str) -> Self {
        self.credentials = Some(Credentials::new(username, password));
        self
    }

    pub fn no_proxy(mut self, rules: &str) -> Self {
        self.no_proxy = rules.to_string();
        self
    }

    pub fn build(self) -> Result<ProxySettings, NetError> {
        let url = self.url.ok_or(NetError::InvalidUrl)?;
        let mut settings = ProxySettings::new(&url)?.with_bypass(&self.no_proxy);
        settings.credentials = self.credentials;
        Ok(settings)
    }
}
