//! Request descriptor and handle.
//!
//! A [`URLRequest`] is a plain description of what to send plus named
//! per-request options. It can be awaited directly with
//! [`send`](URLRequest::send) or run as a task with
//! [`spawn`](URLRequest::spawn), which returns a [`RequestHandle`] that can
//! abort the request, report its progress and wait for it with a timeout,
//! from async or blocking code.

use crate::base::abort::AbortSignal;
use crate::base::loadstate::{LoadState, LoadStateTracker};
use crate::base::neterror::NetError;
use crate::http::auth::Credentials;
use crate::http::orderedheaders::OrderedHeaderMap;
use crate::http::requestbody::{BodyRegenerator, RequestBody};
use crate::http::response::HttpResponse;
use crate::socket::connection::ContinueCallback;
use crate::socket::proxy::ProxySettings;
use crate::urlrequest::context::URLRequestContext;
use crate::urlrequest::job::URLRequestHttpJob;
use http::{HeaderMap, Method, StatusCode};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use url::Url;

/// Per-request overrides of [`EngineConfig`](crate::urlrequest::context::EngineConfig).
/// `None` keeps the engine value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    pub keep_alive: Option<bool>,
    pub expect_continue: Option<bool>,
    pub auto_redirect: Option<bool>,
    pub max_redirects: Option<usize>,
    pub allow_write_buffering: Option<bool>,
    pub unsafe_authenticated_connection_sharing: Option<bool>,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    pub response_timeout: Option<Duration>,
    pub continue_timeout: Option<Duration>,
}

/// Proxy choice for one request.
#[derive(Debug, Clone, Default)]
pub enum ProxyChoice {
    /// Use the context's proxy, if any.
    #[default]
    Context,
    Direct,
    Proxy(ProxySettings),
}

/// A request ready to be sent.
pub struct URLRequest {
    pub(crate) ctx: Arc<URLRequestContext>,
    pub(crate) method: Method,
    pub(crate) url: Url,
    pub(crate) headers: OrderedHeaderMap,
    pub(crate) body: RequestBody,
    pub(crate) regenerator: Option<BodyRegenerator>,
    pub(crate) credentials: Option<Credentials>,
    pub(crate) proxy: ProxyChoice,
    pub(crate) options: RequestOptions,
    pub(crate) on_continue: Option<ContinueCallback>,
    pub(crate) signal: AbortSignal,
    pub(crate) load: LoadStateTracker,
}

impl fmt::Debug for URLRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("URLRequest")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("credentials", &self.credentials)
            .field("proxy", &self.proxy)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl URLRequest {
    /// A `GET` for `url`.
    pub fn new(ctx: &Arc<URLRequestContext>, url: &str) -> Result<Self, NetError> {
        let url = Url::parse(url).map_err(|_| NetError::InvalidUrl)?;
        Self::from_url(ctx, url)
    }

    pub fn from_url(ctx: &Arc<URLRequestContext>, url: Url) -> Result<Self, NetError> {
        match url.scheme() {
            "http" | "https" => {}
            _ => return Err(NetError::UnknownUrlScheme),
        }
        if url.host_str().is_none() {
            return Err(NetError::InvalidUrl);
        }
        Ok(Self {
            ctx: ctx.clone(),
            method: Method::GET,
            url,
            headers: OrderedHeaderMap::new(),
            body: RequestBody::Empty,
            regenerator: None,
            credentials: None,
            proxy: ProxyChoice::Context,
            options: RequestOptions::default(),
            on_continue: None,
            signal: AbortSignal::new(),
            load: LoadStateTracker::new(),
        })
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Add a header. Engine-computed framing headers are ignored on send.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self, NetError> {
        self.headers.insert(name, value)?;
        Ok(self)
    }

    pub fn headers(mut self, headers: OrderedHeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = body.into();
        self
    }

    /// Rebuild the body when it must be resent and no buffered copy exists.
    pub fn body_regenerator(mut self, regenerator: BodyRegenerator) -> Self {
        self.regenerator = Some(regenerator);
        self
    }

    /// Credentials offered to the challenge resolver on `401`.
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn proxy(mut self, proxy: ProxySettings) -> Self {
        self.proxy = ProxyChoice::Proxy(proxy);
        self
    }

    /// Bypass any context proxy.
    pub fn direct(mut self) -> Self {
        self.proxy = ProxyChoice::Direct;
        self
    }

    pub fn options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    /// Called with every `100 Continue` interim response.
    pub fn on_continue<F>(mut self, callback: F) -> Self
    where
        F: Fn(StatusCode, &HeaderMap) + Send + Sync + 'static,
    {
        self.on_continue = Some(Arc::new(callback));
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Handle that aborts this request from anywhere.
    pub fn abort_signal(&self) -> AbortSignal {
        self.signal.clone()
    }

    pub fn load_state(&self) -> LoadStateTracker {
        self.load.clone()
    }

    /// Run the request to its final response.
    pub async fn send(self) -> Result<HttpResponse, NetError> {
        URLRequestHttpJob::new(self).start().await
    }

    /// Run the request on the current tokio runtime.
    pub fn spawn(self) -> RequestHandle {
        let signal = self.signal.clone();
        let load = self.load.clone();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let _ = tx.send(self.send().await);
        });
        RequestHandle {
            signal,
            load,
            rx,
            runtime: tokio::runtime::Handle::current(),
        }
    }
}

/// A request running as a task.
#[derive(Debug)]
pub struct RequestHandle {
    signal: AbortSignal,
    load: LoadStateTracker,
    rx: oneshot::Receiver<Result<HttpResponse, NetError>>,
    runtime: tokio::runtime::Handle,
}

impl RequestHandle {
    /// Abort with `ConnectionAborted`. Safe from any thread at any time.
    pub fn abort(&self) -> bool {
        self.signal.abort()
    }

    pub fn abort_signal(&self) -> AbortSignal {
        self.signal.clone()
    }

    pub fn load_state(&self) -> LoadState {
        self.load.get()
    }

    /// Wait for the final response. On timeout the request is aborted and
    /// `ConnectionTimedOut` returned.
    pub async fn wait(mut self, timeout: Option<Duration>) -> Result<HttpResponse, NetError> {
        let result = match timeout {
            Some(duration) => match tokio::time::timeout(duration, &mut self.rx).await {
                Ok(result) => result,
                Err(_) => {
                    self.signal.abort_with(NetError::ConnectionTimedOut);
                    return Err(NetError::ConnectionTimedOut);
                }
            },
            None => (&mut self.rx).await,
        };
        result.unwrap_or(Err(NetError::ConnectionAborted))
    }

    /// Blocking form of [`wait`](Self::wait) for synchronous callers.
    ///
    /// Must not be called from inside the runtime, and the runtime must be
    /// driven by other threads (multi-threaded runtime).
    pub fn blocking_wait(self, timeout: Option<Duration>) -> Result<HttpResponse, NetError> {
        let runtime = self.runtime.clone();
        runtime.block_on(self.wait(timeout))
    }
}
