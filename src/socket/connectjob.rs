//! Establishing new connections: resolve → TCP → (CONNECT tunnel) → (TLS).
//!
//! Roughly equivalent to Chromium's `TransportConnectJob` chained with
//! `HttpProxyConnectJob` and `SSLConnectJob`.

use crate::base::abort::AbortSignal;
use crate::base::context::IoResultExt;
use crate::base::loadstate::{LoadState, LoadStateTracker};
use crate::base::neterror::{ErrorCategory, NetError};
use crate::dns::{Name, Resolve};
use crate::http::auth::{AuthState, AuthTarget, BasicResolver, ChallengeRequest, ChallengeResolver};
use crate::http::buffer::{ParseBuffer, INITIAL_CAPACITY};
use crate::http::framer::BodyReader;
use crate::http::orderedheaders::{write_request_head, OrderedHeaderMap};
use crate::http::parser::{
    body_framing, wants_keep_alive, Framing, HeadParser, ReadStateCell, ResponseHead,
    MAX_HEADERS_SIZE,
};
use crate::socket::authcache::AuthCache;
use crate::socket::connection::Connection;
use crate::socket::proxy::ProxySettings;
use crate::socket::stream::BoxedSocket;
use crate::socket::tls::{handshake_error, NoTlsUpgrader, TlsUpgrader};
use http::header::PROXY_AUTHENTICATE;
use http::{Method, StatusCode};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpSocket, TcpStream};
use url::Url;

/// Upper bound on `407` rounds for one tunnel (NTLM needs two).
const MAX_TUNNEL_AUTH_ROUNDS: usize = 3;

/// Socket-level settings for new connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Covers resolution, TCP connect, tunnel and TLS upgrade together.
    pub connect_timeout: Option<Duration>,
    pub tcp_keep_alive: bool,
    pub use_nagle: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Some(Duration::from_secs(30)),
            tcp_keep_alive: true,
            use_nagle: false,
        }
    }
}

/// Opens connections for the pool.
#[derive(Clone)]
pub struct ConnectJob {
    resolver: Arc<dyn Resolve>,
    upgrader: Arc<dyn TlsUpgrader>,
    challenge_resolver: Arc<dyn ChallengeResolver>,
    auth_cache: AuthCache,
    options: ConnectOptions,
}

impl fmt::Debug for ConnectJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectJob")
            .field("options", &self.options)
            .field("cached_proxy_auth", &self.auth_cache.len())
            .finish_non_exhaustive()
    }
}

impl ConnectJob {
    pub fn new(resolver: Arc<dyn Resolve>) -> Self {
        Self {
            resolver,
            upgrader: Arc::new(NoTlsUpgrader),
            challenge_resolver: Arc::new(BasicResolver),
            auth_cache: AuthCache::new(),
            options: ConnectOptions::default(),
        }
    }

    pub fn with_upgrader(mut self, upgrader: Arc<dyn TlsUpgrader>) -> Self {
        self.upgrader = upgrader;
        self
    }

    pub fn with_challenge_resolver(mut self, resolver: Arc<dyn ChallengeResolver>) -> Self {
        self.challenge_resolver = resolver;
        self
    }

    pub fn with_auth_cache(mut self, cache: AuthCache) -> Self {
        self.auth_cache = cache;
        self
    }

    pub fn with_options(mut self, options: ConnectOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> ConnectOptions {
        self.options
    }

    pub fn auth_cache(&self) -> &AuthCache {
        &self.auth_cache
    }

    /// Establish connection `id` to `url`, optionally through `proxy`.
    ///
    /// `https` targets behind a proxy are tunnelled with `CONNECT`; plain
    /// `http` targets are forwarded and the connection is flagged so that
    /// requests use the absolute form.
    pub async fn connect(
        &self,
        id: u64,
        url: &Url,
        proxy: Option<&ProxySettings>,
        signal: &AbortSignal,
        load: &LoadStateTracker,
    ) -> Result<Connection, NetError> {
        signal
            .run(self.options.connect_timeout, self.establish(id, url, proxy, load))
            .await
    }

    async fn establish(
        &self,
        id: u64,
        url: &Url,
        proxy: Option<&ProxySettings>,
        load: &LoadStateTracker,
    ) -> Result<Connection, NetError> {
        let secure = match url.scheme() {
            "https" => true,
            "http" => false,
            _ => return Err(NetError::UnknownUrlScheme),
        };
        let target_host = url.host_str().ok_or(NetError::InvalidUrl)?;
        let target_port = url.port_or_known_default().ok_or(NetError::InvalidUrl)?;

        let (host, port) = match proxy {
            Some(p) => p.host_port()?,
            None => (target_host, target_port),
        };

        load.set(LoadState::ResolvingHost);
        let addrs = self.resolve(host, port, proxy.is_some()).await?;

        load.set(LoadState::Connecting);
        let tcp = self.connect_any(&addrs, host, port).await?;
        tracing::debug!(conn = id, host, port, peer = ?tcp.peer_addr().ok(), "TCP connected");
        let mut stream = BoxedSocket::new(tcp);

        if let (Some(proxy), true) = (proxy, secure) {
            load.set(LoadState::EstablishingProxyTunnel);
            stream = self
                .tunnel(stream, &addrs, proxy, url, target_host, target_port)
                .await?;
        }

        if secure {
            load.set(LoadState::SslHandshake);
            stream = self.upgrader.upgrade(stream, url).await.map_err(handshake_error)?;
            tracing::debug!(conn = id, host = target_host, "TLS upgrade complete");
        }

        Ok(Connection::new(id, stream).with_proxy_forwarding(proxy.is_some() && !secure))
    }

    async fn resolve(
        &self,
        host: &str,
        port: u16,
        is_proxy: bool,
    ) -> Result<Vec<SocketAddr>, NetError> {
        let result = self.resolver.resolve(Name::new(host), port).await;
        let addrs = match result {
            Ok(addrs) if !addrs.is_empty() => addrs,
            Ok(_) => return Err(name_error(host, is_proxy, NetError::NameNotResolved)),
            Err(err) => return Err(name_error(host, is_proxy, err)),
        };
        tracing::debug!(host, count = addrs.len(), "resolved");
        Ok(addrs)
    }

    /// Try each address in order; the last failure is reported.
    async fn connect_any(
        &self,
        addrs: &[SocketAddr],
        host: &str,
        port: u16,
    ) -> Result<TcpStream, NetError> {
        let mut last_err = NetError::ConnectionFailed;
        for addr in addrs {
            match self.connect_one(*addr).await {
                Ok(stream) => return Ok(stream),
                Err(err) => {
                    tracing::debug!(%addr, error = %err, "connect attempt failed");
                    last_err = match err.kind() {
                        std::io::ErrorKind::ConnectionRefused => NetError::ConnectionRefused,
                        _ => NetError::connection_failed_to(host, port, err),
                    };
                }
            }
        }
        Err(last_err)
    }

    async fn connect_one(&self, addr: SocketAddr) -> std::io::Result<TcpStream> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_keepalive(self.options.tcp_keep_alive)?;
        let stream = socket.connect(addr).await?;
        stream.set_nodelay(!self.options.use_nagle)?;
        Ok(stream)
    }

    /// Negotiate a `CONNECT` tunnel to `target_host:target_port`.
    ///
    /// A `407` is answered once per new challenge; the same challenge twice
    /// in a row, or any status other than `200`, fails the tunnel.
    async fn tunnel(
        &self,
        mut stream: BoxedSocket,
        proxy_addrs: &[SocketAddr],
        proxy: &ProxySettings,
        url: &Url,
        target_host: &str,
        target_port: u16,
    ) -> Result<BoxedSocket, NetError> {
        let (proxy_host, proxy_port) = proxy.host_port()?;
        let authority = format!("{target_host}:{target_port}");

        let mut auth = AuthState::new();
        if let Some(entry) = self.auth_cache.lookup(proxy_host, proxy_port) {
            auth.preset(entry.header_value().to_string());
        } else if let Some(header) = proxy.basic_auth_header() {
            auth.preset(header);
        }

        let mut previous: Option<Vec<String>> = None;
        for _ in 0..=MAX_TUNNEL_AUTH_ROUNDS {
            let mut headers = OrderedHeaderMap::new();
            headers.insert("Host", &authority)?;
            headers.insert("Proxy-Connection", "keep-alive")?;
            if let Some(value) = auth.header() {
                headers.insert("Proxy-Authorization", value)?;
            }
            let head = write_request_head(&Method::CONNECT, &authority, &headers);
            stream.write_all(&head).await.transfer_context()?;
            stream.flush().await.transfer_context()?;

            let mut buf = ParseBuffer::with_capacity(INITIAL_CAPACITY, MAX_HEADERS_SIZE);
            let response = read_tunnel_head(&mut stream, &mut buf).await?;

            match response.status {
                StatusCode::OK => {
                    if !buf.is_empty() {
                        tracing::warn!(
                            proxy = %proxy.key(),
                            extra = buf.len(),
                            "proxy sent data before tunnel was used"
                        );
                        return Err(NetError::TunnelConnectionFailed);
                    }
                    if let Some(value) = auth.header() {
                        self.auth_cache.store(proxy_host, proxy_port, value);
                    }
                    tracing::debug!(
                        proxy = %proxy.key(),
                        target = %authority,
                        "tunnel established"
                    );
                    return Ok(stream);
                }
                StatusCode::PROXY_AUTHENTICATION_REQUIRED => {
                    let challenges = response.header_values(PROXY_AUTHENTICATE);
                    if challenges.is_empty() {
                        tracing::warn!(proxy = %proxy.key(), "407 without Proxy-Authenticate");
                        return Err(NetError::TunnelConnectionFailed);
                    }
                    if auth.header().is_some() {
                        self.auth_cache.remove(proxy_host, proxy_port);
                    }
                    if previous.as_ref() == Some(&challenges) {
                        tracing::warn!(proxy = %proxy.key(), "proxy repeated its challenge");
                        return Err(NetError::ProxyAuthRequested);
                    }
                    let Some(credentials) = proxy.credentials() else {
                        return Err(NetError::ProxyAuthRequested);
                    };
                    let request = ChallengeRequest {
                        method: &Method::CONNECT,
                        url,
                        target: AuthTarget::Proxy,
                        round: auth.ntlm_round(),
                    };
                    let Some(resolution) = self.challenge_resolver.resolve(
                        &challenges,
                        &request,
                        credentials,
                    )? else {
                        return Err(NetError::ProxyAuthUnsupported);
                    };
                    auth.apply(resolution);
                    previous = Some(challenges);

                    if drain_rejection(&mut stream, &mut buf, &response).await? {
                        tracing::debug!(
                            proxy = %proxy.key(),
                            "retrying CONNECT on same connection"
                        );
                    } else {
                        tracing::debug!(
                            proxy = %proxy.key(),
                            "proxy closed after 407, reconnecting"
                        );
                        let fresh = self.connect_any(proxy_addrs, proxy_host, proxy_port).await?;
                        stream = BoxedSocket::new(fresh);
                    }
                }
                status => {
                    tracing::warn!(proxy = %proxy.key(), %status, "tunnel refused");
                    return Err(NetError::TunnelConnectionFailed);
                }
            }
        }
        Err(NetError::ProxyAuthRequested)
    }
}

fn name_error(host: &str, is_proxy: bool, err: NetError) -> NetError {
    if err.category() != ErrorCategory::NameResolution {
        return err;
    }
    if is_proxy {
        NetError::ProxyNameNotResolved {
            domain: host.to_string(),
        }
    } else {
        match err {
            NetError::NameNotResolvedFor { .. } => err,
            _ => NetError::NameNotResolvedFor {
                domain: host.to_string(),
            },
        }
    }
}

/// Minimal head read for the proxy's answer; interim responses are skipped.
async fn read_tunnel_head(
    stream: &mut BoxedSocket,
    buf: &mut ParseBuffer,
) -> Result<ResponseHead, NetError> {
    let mut parser = HeadParser::new(ReadStateCell::new());
    loop {
        if let Some(head) = parser.parse(buf)? {
            if head.status.is_informational() {
                parser = HeadParser::new(ReadStateCell::new());
                continue;
            }
            return Ok(head);
        }
        if buf.fill_from(stream).await? == 0 {
            tracing::warn!("proxy closed connection during CONNECT");
            return Err(NetError::TunnelConnectionFailed);
        }
    }
}

/// Consume a `407` body so the socket can carry the next `CONNECT`.
/// Returns false when the socket cannot be reused.
async fn drain_rejection(
    stream: &mut BoxedSocket,
    buf: &mut ParseBuffer,
    head: &ResponseHead,
) -> Result<bool, NetError> {
    if !wants_keep_alive(head, true) {
        return Ok(false);
    }
    let framing = body_framing(&Method::GET, head)?;
    if framing == Framing::UntilClose {
        return Ok(false);
    }
    let mut reader = BodyReader::new(framing);
    let mut scratch = [0u8; 1024];
    while reader.read(stream, buf, &mut scratch).await? > 0 {}
    Ok(buf.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::StaticResolver;

    #[test]
    fn test_name_error_mapping() {
        assert_eq!(
            name_error("proxy.local", true, NetError::NameNotResolved),
            NetError::ProxyNameNotResolved {
                domain: "proxy.local".into()
            }
        );
        assert_eq!(
            name_error("a.test", false, NetError::NameNotResolved),
            NetError::NameNotResolvedFor { domain: "a.test".into() }
        );
        assert_eq!(
            name_error("a.test", true, NetError::ConnectionTimedOut),
            NetError::ConnectionTimedOut
        );
    }

    #[tokio::test]
    async fn test_unresolvable_host() {
        let job = ConnectJob::new(Arc::new(StaticResolver::new()));
        let url = Url::parse("http://nowhere.test/").unwrap();
        let err = job
            .connect(1, &url, None, &AbortSignal::new(), &LoadStateTracker::new())
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::NameResolution);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to get a port nobody listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let resolver = StaticResolver::new().with_host("dead.test", vec![addr]);
        let job = ConnectJob::new(Arc::new(resolver));
        let url = Url::parse(&format!("http://dead.test:{}/", addr.port())).unwrap();
        let err = job
            .connect(1, &url, None, &AbortSignal::new(), &LoadStateTracker::new())
            .await
            .unwrap_err();
        assert_eq!(err, NetError::ConnectionRefused);
    }

    #[tokio::test]
    async fn test_https_without_upgrader_fails_handshake() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let resolver = StaticResolver::new().with_host("tls.test", vec![addr]);
        let job = ConnectJob::new(Arc::new(resolver));
        let url = Url::parse(&format!("https://tls.test:{}/", addr.port())).unwrap();
        let load = LoadStateTracker::new();
        let err = job.connect(1, &url, None, &AbortSignal::new(), &load).await.unwrap_err();
        assert!(matches!(err, NetError::SslHandshakeFailed(_)));
        assert_eq!(load.get(), LoadState::SslHandshake);
    }
}
