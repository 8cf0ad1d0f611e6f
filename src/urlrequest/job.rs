//! The request coordinator.
//!
//! Drives one logical request through as many physical attempts as it
//! takes: authentication rounds, redirects and one resend after a stale
//! keep-alive connection. Each response is classified by status; only the
//! final one is handed to the caller with its body still on the wire.
//!
//! Based on Chromium's `URLRequestHttpJob` restart logic.

use crate::base::abort::AbortSignal;
use crate::base::loadstate::{LoadState, LoadStateTracker};
use crate::base::neterror::NetError;
use crate::http::auth::{AuthState, AuthTarget, ChallengeRequest, Credentials, NtlmRound};
use crate::http::framer::BodyReader;
use crate::http::orderedheaders::OrderedHeaderMap;
use crate::http::parser::ResponseHead;
use crate::http::requestbody::{BodyRegenerator, RequestBody};
use crate::http::response::HttpResponse;
use crate::http::responsebody::ResponseBody;
use crate::http::retry::{should_resubmit, RetryReason};
use crate::http::transaction::{execute, Attempt, Exchange, TransactionOptions};
use crate::socket::connection::ContinueCallback;
use crate::socket::pool::{Checkout, EndpointId, EndpointPool, PinTicket, PooledConnection};
use crate::socket::proxy::ProxySettings;
use crate::urlrequest::context::URLRequestContext;
use crate::urlrequest::request::{ProxyChoice, URLRequest};
use http::header::{AUTHORIZATION, CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE};
use http::{Method, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Times an NTLM handshake may start over after losing its connection.
const MAX_HANDSHAKE_RESTARTS: usize = 1;

/// What to do after interpreting a response.
enum Next {
    Done(HttpResponse),
    /// Send again to the current URL (authentication round).
    Retry,
    /// Send to the new URL.
    Redirect,
}

/// Effective per-request settings after applying overrides.
#[derive(Debug, Clone)]
struct JobSettings {
    transaction: TransactionOptions,
    auto_redirect: bool,
    max_redirects: usize,
    unsafe_sharing: bool,
    read_timeout: Option<Duration>,
}

pub struct URLRequestHttpJob {
    ctx: Arc<URLRequestContext>,
    method: Method,
    url: Url,
    headers: OrderedHeaderMap,
    /// Body for the next attempt, if one is on hand.
    body: Option<RequestBody>,
    /// The request carries a non-empty body that every attempt must resend.
    body_required: bool,
    regenerator: Option<BodyRegenerator>,
    credentials: Option<Credentials>,
    proxy_choice: ProxyChoice,
    settings: JobSettings,
    on_continue: Option<ContinueCallback>,
    signal: AbortSignal,
    load: LoadStateTracker,
    origin_auth: AuthState,
    proxy_auth: AuthState,
    pinned: Option<PinTicket>,
    redirects: usize,
    resubmits: usize,
    handshake_restarts: usize,
}

/// Reads the rest of a response body that will not be returned.
struct Drainer {
    signal: AbortSignal,
    read_timeout: Option<Duration>,
}

impl Drainer {
    async fn drain(
        &self,
        conn: &mut PooledConnection,
        reader: &mut BodyReader,
    ) -> Result<(), NetError> {
        let mut scratch = [0u8; 4096];
        loop {
            let n = self
                .signal
                .run(self.read_timeout, conn.read_body(reader, &mut scratch))
                .await?;
            if n == 0 {
                return Ok(());
            }
        }
    }

    /// Drain and hand the connection back, or discard it if draining failed.
    async fn finish(
        self,
        mut conn: PooledConnection,
        mut reader: BodyReader,
    ) -> Option<PooledConnection> {
        match self.drain(&mut conn, &mut reader).await {
            Ok(()) => Some(conn),
            Err(err) => {
                tracing::debug!(conn = conn.id(), error = %err, "failed to drain response body");
                conn.discard();
                None
            }
        }
    }
}

impl URLRequestHttpJob {
    pub fn new(request: URLRequest) -> Self {
        let config = request.ctx.config();
        let options = &request.options;
        let mut transaction = config.transaction_options();
        if let Some(v) = options.keep_alive {
            transaction.keep_alive = v;
        }
        if let Some(v) = options.expect_continue {
            transaction.expect_continue = v;
        }
        if let Some(v) = options.allow_write_buffering {
            transaction.allow_write_buffering = v;
        }
        if let Some(v) = options.continue_timeout {
            transaction.continue_timeout = v;
        }
        if options.write_timeout.is_some() {
            transaction.write_timeout = options.write_timeout;
        }
        if options.response_timeout.is_some() {
            transaction.response_timeout = options.response_timeout;
        }
        let settings = JobSettings {
            transaction,
            auto_redirect: options.auto_redirect.unwrap_or(config.auto_redirect),
            max_redirects: options.max_redirects.unwrap_or(config.max_redirects),
            unsafe_sharing: options
                .unsafe_authenticated_connection_sharing
                .unwrap_or(config.unsafe_authenticated_connection_sharing),
            read_timeout: Some(options.read_timeout.unwrap_or(config.read_timeout)),
        };

        let mut proxy_auth = AuthState::new();
        let proxy = match &request.proxy {
            ProxyChoice::Context => request.ctx.proxy(),
            ProxyChoice::Direct => None,
            ProxyChoice::Proxy(p) => Some(p),
        };
        if let Some(header) = proxy.and_then(ProxySettings::basic_auth_header) {
            proxy_auth.preset(header);
        }

        Self {
            body_required: !request.body.is_empty(),
            body: Some(request.body),
            ctx: request.ctx,
            method: request.method,
            url: request.url,
            headers: request.headers,
            regenerator: request.regenerator,
            credentials: request.credentials,
            proxy_choice: request.proxy,
            settings,
            on_continue: request.on_continue,
            signal: request.signal,
            load: request.load,
            origin_auth: AuthState::new(),
            proxy_auth,
            pinned: None,
            redirects: 0,
            resubmits: 0,
            handshake_restarts: 0,
        }
    }

    /// Proxy for the current URL, honouring the bypass list.
    fn proxy(&self) -> Option<ProxySettings> {
        let proxy = match &self.proxy_choice {
            ProxyChoice::Context => self.ctx.proxy()?,
            ProxyChoice::Direct => return None,
            ProxyChoice::Proxy(p) => p,
        };
        if proxy.should_bypass(&self.url) {
            return None;
        }
        Some(proxy.clone())
    }

    fn credential_id(&self) -> Option<String> {
        self.credentials.as_ref().map(Credentials::id)
    }

    /// A body can be produced for another attempt.
    fn is_replayable(&self) -> bool {
        !self.body_required || self.body.is_some() || self.regenerator.is_some()
    }

    fn take_body(&mut self) -> Result<RequestBody, NetError> {
        if let Some(body) = self.body.take() {
            return Ok(body);
        }
        if !self.body_required {
            return Ok(RequestBody::Empty);
        }
        match &self.regenerator {
            Some(regenerate) => {
                tracing::debug!(url = %self.url, "regenerating request body");
                Ok(regenerate())
            }
            None => Err(NetError::RequestBodyNotBuffered),
        }
    }

    pub async fn start(mut self) -> Result<HttpResponse, NetError> {
        let result = self.run().await;
        if let Err(err) = &result {
            tracing::debug!(url = %self.url, error = %err, "request failed");
        }
        self.load.set(LoadState::Idle);
        result
    }

    async fn run(&mut self) -> Result<HttpResponse, NetError> {
        loop {
            self.signal.check()?;
            let proxy = self.proxy();
            let endpoint = EndpointId::new(&self.url, proxy.as_ref())?;
            let pool = self.ctx.socket_pool().endpoint(&endpoint);

            let mut conn = self.acquire(&pool, proxy.as_ref()).await?;
            let credential = self.credential_id();
            if !conn.check_ntlm_credential(credential.as_deref(), self.settings.unsafe_sharing) {
                conn.discard();
                continue;
            }

            let body = self.take_body()?;
            let cookie = if self.headers.contains(COOKIE.as_str()) {
                None
            } else {
                self.ctx.cookie_store().cookie_header(&self.url)
            };
            let attempt = Attempt {
                method: &self.method,
                url: &self.url,
                headers: &self.headers,
                cookie: cookie.as_deref(),
                authorization: self.origin_auth.header(),
                proxy_authorization: self.proxy_auth.header(),
                on_continue: self.on_continue.as_ref(),
            };
            let outcome = execute(
                &mut conn,
                &attempt,
                body,
                &self.settings.transaction,
                &self.signal,
                &self.load,
            )
            .await;

            let exchange = match outcome {
                Ok(exchange) => exchange,
                Err(failed) => {
                    self.body = failed.replay;
                    let reused = conn.is_reused();
                    conn.discard();
                    if should_resubmit(
                        &failed.error,
                        reused,
                        failed.response_started,
                        self.is_replayable(),
                        self.resubmits,
                    ) {
                        self.resubmits += 1;
                        tracing::debug!(
                            url = %self.url,
                            reason = ?RetryReason::from_error(&failed.error),
                            "stale keep-alive connection, resending"
                        );
                        continue;
                    }
                    return Err(failed.error);
                }
            };

            let Exchange { head, reader, replay } = exchange;
            self.body = replay;
            let set_cookie = head.header_values(SET_COOKIE);
            if !set_cookie.is_empty() {
                self.ctx.cookie_store().store_response_cookies(&self.url, &set_cookie);
            }

            match self.interpret(head, conn, reader).await? {
                Next::Done(response) => return Ok(response),
                Next::Retry => {}
                Next::Redirect => {
                    self.redirects += 1;
                    self.resubmits = 0;
                }
            }
        }
    }

    /// Get a connection: the pinned one mid-handshake, else any from the pool.
    async fn acquire(
        &mut self,
        pool: &Arc<EndpointPool>,
        proxy: Option<&ProxySettings>,
    ) -> Result<PooledConnection, NetError> {
        if let Some(ticket) = self.pinned.take() {
            if Arc::ptr_eq(ticket.pool(), pool) {
                match pool.acquire_pinned(ticket, &self.signal) {
                    Ok(conn) => return Ok(conn),
                    Err(NetError::ConnectionClosed) => {
                        // The handshake is bound to the lost connection; start over once.
                        if self.handshake_restarts >= MAX_HANDSHAKE_RESTARTS {
                            tracing::warn!(
                                url = %self.url,
                                "server keeps closing the NTLM connection"
                            );
                            return Err(NetError::ConnectionClosed);
                        }
                        self.handshake_restarts += 1;
                        tracing::debug!(
                            url = %self.url,
                            "pinned connection closed, restarting NTLM"
                        );
                        self.origin_auth.reset();
                        self.proxy_auth.reset();
                    }
                    Err(err) => return Err(err),
                }
            }
        }

        self.load.set(LoadState::WaitingForAvailableSocket);
        match pool.checkout(&self.signal).await? {
            Checkout::Ready(conn) => Ok(conn),
            Checkout::Connect(permit) => {
                let conn = self
                    .ctx
                    .connector()
                    .connect(permit.connection_id(), &self.url, proxy, &self.signal, &self.load)
                    .await?;
                permit.complete(conn)
            }
        }
    }

    fn drainer(&self) -> Drainer {
        Drainer {
            signal: self.signal.clone(),
            read_timeout: self.settings.read_timeout,
        }
    }

    async fn fail_after_drain(
        &mut self,
        conn: PooledConnection,
        reader: BodyReader,
        err: NetError,
    ) -> Result<Next, NetError> {
        if let Some(conn) = self.drainer().finish(conn, reader).await {
            conn.release();
        }
        Err(err)
    }

    async fn interpret(
        &mut self,
        head: ResponseHead,
        mut conn: PooledConnection,
        reader: BodyReader,
    ) -> Result<Next, NetError> {
        let status = head.status;

        if let Some(target) = AuthTarget::from_status(status) {
            if let Some(next) = self.try_authenticate(target, &head, &mut conn).await? {
                return match next {
                    Next::Retry => {
                        self.release_for_auth(conn, reader).await;
                        Ok(Next::Retry)
                    }
                    other => Ok(other),
                };
            }
        } else {
            self.note_handshake_complete(&mut conn);
        }

        if self.settings.auto_redirect {
            match status {
                StatusCode::MULTIPLE_CHOICES => {
                    return self.fail_after_drain(conn, reader, NetError::AmbiguousRedirect).await;
                }
                StatusCode::USE_PROXY => {
                    return self.fail_after_drain(
                        conn,
                        reader,
                        NetError::UseProxyNotSupported,
                    )
                    .await;
                }
                StatusCode::NOT_MODIFIED => {
                    return self.fail_after_drain(conn, reader, NetError::NotModified).await;
                }
                StatusCode::MOVED_PERMANENTLY
                | StatusCode::FOUND
                | StatusCode::SEE_OTHER
                | StatusCode::TEMPORARY_REDIRECT => {
                    if let Some(location) = head.header_str(LOCATION).map(str::to_string) {
                        return self.redirect(status, &location, conn, reader).await;
                    }
                    tracing::debug!(%status, "redirect without Location, returning response");
                }
                _ => {}
            }
        }

        if status.as_u16() >= 400 {
            let err = NetError::HttpStatus {
                status: status.as_u16(),
                reason: head.reason.clone(),
            };
            return self.fail_after_drain(conn, reader, err).await;
        }

        tracing::debug!(url = %self.url, %status, redirects = self.redirects, "final response");
        let body = ResponseBody::new(conn, reader, self.signal.clone(), self.settings.read_timeout);
        Ok(Next::Done(HttpResponse::new(head, self.url.clone(), self.redirects, body)))
    }

    /// Handle a `401`/`407`. `Ok(None)` means the status stands as an error.
    async fn try_authenticate(
        &mut self,
        target: AuthTarget,
        head: &ResponseHead,
        conn: &mut PooledConnection,
    ) -> Result<Option<Next>, NetError> {
        let proxy = self.proxy();
        let credentials = match target {
            AuthTarget::Server => self.credentials.clone(),
            AuthTarget::Proxy => {
                if !conn.forwards_via_proxy() {
                    return Ok(None);
                }
                proxy.as_ref().and_then(|p| p.credentials().cloned())
            }
        };
        let Some(credentials) = credentials else {
            return Ok(None);
        };
        let state = match target {
            AuthTarget::Server => &self.origin_auth,
            AuthTarget::Proxy => &self.proxy_auth,
        };
        if state.is_completed() {
            tracing::debug!(?target, "credentials rejected");
            return Ok(None);
        }

        let challenges = head.header_values(target.challenge_header());
        let request = ChallengeRequest {
            method: &self.method,
            url: &self.url,
            target,
            round: state.ntlm_round(),
        };
        let Some(resolution) = self.ctx.challenge_resolver().resolve(
            &challenges,
            &request,
            &credentials,
        )? else {
            tracing::debug!(?target, "no supported challenge");
            return Ok(None);
        };

        if !self.is_replayable() {
            tracing::warn!(
                url = %self.url,
                "authentication needs the request body again but it was not kept"
            );
            conn.set_keep_alive(false);
            return Err(NetError::RequestBodyNotBuffered);
        }

        match target {
            AuthTarget::Server => self.origin_auth.apply(resolution),
            AuthTarget::Proxy => self.proxy_auth.apply(resolution),
        }
        Ok(Some(Next::Retry))
    }

    /// Keep the connection for the next round: pinned while an NTLM
    /// handshake awaits its final response, otherwise back to the pool.
    async fn release_for_auth(&mut self, conn: PooledConnection, reader: BodyReader) {
        let Some(conn) = self.drainer().finish(conn, reader).await else {
            return;
        };
        let ntlm = |state: &AuthState| state.ntlm_round() != NtlmRound::None;
        if ntlm(&self.origin_auth) || ntlm(&self.proxy_auth) {
            tracing::debug!(conn = conn.id(), "pinning connection for NTLM handshake");
            self.pinned = conn.release_pinned();
        } else {
            conn.release();
        }
    }

    /// After the last NTLM leg succeeds, bind the connection to the credential.
    fn note_handshake_complete(&self, conn: &mut PooledConnection) {
        let ntlm = |state: &AuthState| state.ntlm_round() == NtlmRound::Response;
        if conn.is_ntlm_authenticated() || !(ntlm(&self.origin_auth) || ntlm(&self.proxy_auth)) {
            return;
        }
        let credential = self.credential_id().unwrap_or_default();
        conn.mark_ntlm_authenticated(credential, self.settings.unsafe_sharing);
    }

    async fn redirect(
        &mut self,
        status: StatusCode,
        location: &str,
        conn: PooledConnection,
        reader: BodyReader,
    ) -> Result<Next, NetError> {
        if self.redirects >= self.settings.max_redirects {
            tracing::warn!(
                url = %self.url,
                limit = self.settings.max_redirects,
                "redirect limit reached"
            );
            return self.fail_after_drain(conn, reader, NetError::TooManyRedirects).await;
        }
        let target = match self.url.join(location) {
            Ok(target) => target,
            Err(_) => return self.fail_after_drain(conn, reader, NetError::InvalidRedirect).await,
        };
        if target.scheme() != "http" && target.scheme() != "https" {
            return self.fail_after_drain(conn, reader, NetError::UnsafeRedirect).await;
        }

        let to_get = match status {
            StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND => self.method == Method::POST,
            StatusCode::SEE_OTHER => true,
            _ => false,
        };
        if !to_get && !self.is_replayable() {
            tracing::warn!(
                url = %self.url,
                "redirect needs the request body again but it was not kept"
            );
            drop(reader);
            conn.discard();
            return Err(NetError::RequestBodyNotBuffered);
        }

        if let Some(conn) = self.drainer().finish(conn, reader).await {
            conn.release();
        }

        tracing::debug!(from = %self.url, to = %target, %status, "following redirect");
        if to_get {
            self.method = Method::GET;
            self.body = None;
            self.body_required = false;
            self.regenerator = None;
            self.headers.remove(CONTENT_TYPE.as_str());
        }
        if target.origin() != self.url.origin() {
            self.headers.remove(AUTHORIZATION.as_str());
            self.headers.remove(COOKIE.as_str());
        }
        if !self.settings.unsafe_sharing {
            self.origin_auth.reset();
            self.proxy_auth.reset();
            self.pinned = None;
            if let Some(header) = self.proxy().as_ref().and_then(ProxySettings::basic_auth_header) {
                self.proxy_auth.preset(header);
            }
        }
        self.url = target;
        Ok(Next::Redirect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn test_request_future_is_send() {
        let ctx = URLRequestContext::new();
        let request = URLRequest::new(&ctx, "http://example.test/")
            .unwrap()
            .method(Method::POST)
            .body(RequestBody::stream(&b"abc"[..], Some(3)));
        let send = request.send();
        assert_send(&send);
    }
}
