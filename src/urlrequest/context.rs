//! URL Request Context - Central configuration for network requests.
//!
//! Based on Chromium's net::URLRequestContext, provides a centralized
//! configuration point for network stack components. Nothing here is
//! global: every pool, cache and collaborator hangs off one context, so
//! tests can build isolated engines side by side.

use crate::cookies::{CookieStore, NoCookies};
use crate::dns::{GaiResolver, Resolve};
use crate::http::auth::{BasicResolver, ChallengeResolver};
use crate::http::transaction::TransactionOptions;
use crate::socket::authcache::AuthCache;
use crate::socket::connectjob::{ConnectJob, ConnectOptions};
use crate::socket::pool::ClientSocketPool;
use crate::socket::proxy::ProxySettings;
use crate::socket::tls::{NoTlsUpgrader, TlsUpgrader};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Content codings that may be advertised in `Accept-Encoding`.
///
/// The engine only advertises them; decoding is up to the consumer of the
/// response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentCoding {
    Gzip,
    Deflate,
    Br,
}

impl ContentCoding {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentCoding::Gzip => "gzip",
            ContentCoding::Deflate => "deflate",
            ContentCoding::Br => "br",
        }
    }
}

/// Engine-wide settings. Every request may override the per-request ones
/// through [`RequestOptions`](crate::urlrequest::request::RequestOptions).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub max_connections_per_endpoint: usize,
    pub max_idle_time: Duration,
    pub recycle_interval: Duration,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    /// Time allowed for the response head after the request was sent.
    pub response_timeout: Duration,
    pub continue_timeout: Duration,
    pub keep_alive: bool,
    pub tcp_keep_alive: bool,
    pub use_nagle: bool,
    pub expect_continue: bool,
    pub auto_redirect: bool,
    pub max_redirects: usize,
    pub decompression: Vec<ContentCoding>,
    pub allow_write_buffering: bool,
    /// Let requests with different (or no) credentials share connections
    /// that completed an NTLM handshake, and keep auth state across redirects.
    pub unsafe_authenticated_connection_sharing: bool,
    pub user_agent: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_connections_per_endpoint: 6,
            max_idle_time: Duration::from_secs(100),
            recycle_interval: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(300),
            write_timeout: Duration::from_secs(300),
            response_timeout: Duration::from_secs(100),
            continue_timeout: Duration::from_millis(350),
            keep_alive: true,
            tcp_keep_alive: true,
            use_nagle: false,
            expect_continue: true,
            auto_redirect: true,
            max_redirects: 50,
            decompression: Vec::new(),
            allow_write_buffering: true,
            unsafe_authenticated_connection_sharing: false,
            user_agent: Some(concat!("servicenet/", env!("CARGO_PKG_VERSION")).to_string()),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_connections_per_endpoint(mut self, limit: usize) -> Self {
        self.max_connections_per_endpoint = limit;
        self
    }

    pub fn with_max_idle_time(mut self, idle: Duration) -> Self {
        self.max_idle_time = idle;
        self
    }

    pub fn with_recycle_interval(mut self, interval: Duration) -> Self {
        self.recycle_interval = interval;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_continue_timeout(mut self, timeout: Duration) -> Self {
        self.continue_timeout = timeout;
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_tcp_keep_alive(mut self, enabled: bool) -> Self {
        self.tcp_keep_alive = enabled;
        self
    }

    pub fn with_nagle(mut self, enabled: bool) -> Self {
        self.use_nagle = enabled;
        self
    }

    pub fn with_expect_continue(mut self, enabled: bool) -> Self {
        self.expect_continue = enabled;
        self
    }

    pub fn with_auto_redirect(mut self, enabled: bool) -> Self {
        self.auto_redirect = enabled;
        self
    }

    pub fn with_max_redirects(mut self, max: usize) -> Self {
        self.max_redirects = max;
        self
    }

    pub fn with_decompression(mut self, codings: Vec<ContentCoding>) -> Self {
        self.decompression = codings;
        self
    }

    pub fn with_write_buffering(mut self, enabled: bool) -> Self {
        self.allow_write_buffering = enabled;
        self
    }

    pub fn with_unsafe_authenticated_connection_sharing(mut self, enabled: bool) -> Self {
        self.unsafe_authenticated_connection_sharing = enabled;
        self
    }

    pub fn with_user_agent(mut self, user_agent: Option<String>) -> Self {
        self.user_agent = user_agent;
        self
    }

    /// `Accept-Encoding` value for the configured codings.
    pub fn accept_encoding(&self) -> Option<String> {
        if self.decompression.is_empty() {
            return None;
        }
        Some(
            self.decompression
                .iter()
                .map(|c| c.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        )
    }

    pub(crate) fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            connect_timeout: Some(self.connect_timeout),
            tcp_keep_alive: self.tcp_keep_alive,
            use_nagle: self.use_nagle,
        }
    }

    pub(crate) fn transaction_options(&self) -> TransactionOptions {
        TransactionOptions {
            keep_alive: self.keep_alive,
            expect_continue: self.expect_continue,
            continue_timeout: self.continue_timeout,
            allow_write_buffering: self.allow_write_buffering,
            write_timeout: Some(self.write_timeout),
            response_timeout: Some(self.response_timeout),
            user_agent: self.user_agent.clone(),
            accept_encoding: self.accept_encoding(),
        }
    }
}

/// Central configuration for network requests.
///
/// Mirrors Chromium's URLRequestContext, bundling together:
/// - Socket pool
/// - Connect job (resolver, TLS upgrader, proxy auth cache)
/// - Challenge resolver
/// - Cookie store
/// - Proxy settings
pub struct URLRequestContext {
    config: EngineConfig,
    pool: Arc<ClientSocketPool>,
    connector: ConnectJob,
    challenge_resolver: Arc<dyn ChallengeResolver>,
    cookie_store: Arc<dyn CookieStore>,
    proxy: Option<ProxySettings>,
}

impl fmt::Debug for URLRequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("URLRequestContext")
            .field("config", &self.config)
            .field("pool", &self.pool)
            .field("connector", &self.connector)
            .field("proxy", &self.proxy)
            .finish_non_exhaustive()
    }
}

impl URLRequestContext {
    /// Create a context with default configuration and the system resolver.
    pub fn new() -> Arc<Self> {
        URLRequestContextBuilder::new().build()
    }

    pub fn builder() -> URLRequestContextBuilder {
        URLRequestContextBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Get the socket pool.
    pub fn socket_pool(&self) -> &Arc<ClientSocketPool> {
        &self.pool
    }

    pub fn connector(&self) -> &ConnectJob {
        &self.connector
    }

    pub fn challenge_resolver(&self) -> &Arc<dyn ChallengeResolver> {
        &self.challenge_resolver
    }

    /// Get the cookie store.
    pub fn cookie_store(&self) -> &Arc<dyn CookieStore> {
        &self.cookie_store
    }

    /// Get proxy settings.
    pub fn proxy(&self) -> Option<&ProxySettings> {
        self.proxy.as_ref()
    }

    /// Periodically close idle connections older than `max_idle_time`.
    ///
    /// Must be called inside a tokio runtime. The task ends when the pool
    /// registry is dropped.
    pub fn start_recycle_task(&self) -> JoinHandle<()> {
        self.pool
            .start_recycle_task(self.config.recycle_interval, self.config.max_idle_time)
    }

    /// Close every connection; in-flight requests fail with `ConnectionAborted`.
    pub fn shutdown(&self) {
        tracing::debug!("shutting down request context");
        self.pool.close_all();
    }
}

/// Builder for [`URLRequestContext`].
pub struct URLRequestContextBuilder {
    config: EngineConfig,
    resolver: Option<Arc<dyn Resolve>>,
    upgrader: Arc<dyn TlsUpgrader>,
    challenge_resolver: Arc<dyn ChallengeResolver>,
    cookie_store: Arc<dyn CookieStore>,
    auth_cache: AuthCache,
    proxy: Option<ProxySettings>,
}

impl Default for URLRequestContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl URLRequestContextBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            resolver: None,
            upgrader: Arc::new(NoTlsUpgrader),
            challenge_resolver: Arc::new(BasicResolver),
            cookie_store: Arc::new(NoCookies),
            auth_cache: AuthCache::new(),
            proxy: None,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Custom resolver (default: [`GaiResolver`]).
    pub fn resolver(mut self, resolver: Arc<dyn Resolve>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn tls_upgrader(mut self, upgrader: Arc<dyn TlsUpgrader>) -> Self {
        self.upgrader = upgrader;
        self
    }

    pub fn challenge_resolver(mut self, resolver: Arc<dyn ChallengeResolver>) -> Self {
        self.challenge_resolver = resolver;
        self
    }

    pub fn cookie_store(mut self, store: Arc<dyn CookieStore>) -> Self {
        self.cookie_store = store;
        self
    }

    pub fn auth_cache(mut self, cache: AuthCache) -> Self {
        self.auth_cache = cache;
        self
    }

    pub fn proxy(mut self, proxy: ProxySettings) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn build(self) -> Arc<URLRequestContext> {
        let resolver = self.resolver.unwrap_or_else(|| Arc::new(GaiResolver::new()));
        let connector = ConnectJob::new(resolver)
            .with_upgrader(self.upgrader)
            .with_challenge_resolver(self.challenge_resolver.clone())
            .with_auth_cache(self.auth_cache)
            .with_options(self.config.connect_options());
        let pool = Arc::new(ClientSocketPool::new(self.config.max_connections_per_endpoint));
        Arc::new(URLRequestContext {
            config: self.config,
            pool,
            connector,
            challenge_resolver: self.challenge_resolver,
            cookie_store: self.cookie_store,
            proxy: self.proxy,
        })
    }
}
