//! One physical request/response exchange on a checked-out connection.
//!
//! Builds the header block, sends it, optionally waits for `100 Continue`,
//! streams the request body through the framer and parses the final
//! response head. Interpreting the status is left to the job.
//!
//! Roughly equivalent to Chromium's `HttpNetworkTransaction` send path.

use crate::base::abort::AbortSignal;
use crate::base::loadstate::{LoadState, LoadStateTracker};
use crate::base::neterror::NetError;
use crate::http::framer::{BodyReader, WriteFraming};
use crate::http::orderedheaders::{write_request_head, OrderedHeaderMap};
use crate::http::parser::{ReadState, ResponseHead};
use crate::http::requestbody::RequestBody;
use crate::socket::connection::{Connection, ContinueCallback};
use bytes::{Bytes, BytesMut};
use http::header::{
    HeaderValue, ACCEPT_ENCODING, AUTHORIZATION, CONNECTION, CONTENT_LENGTH, COOKIE, EXPECT, HOST,
    PROXY_AUTHORIZATION, TRANSFER_ENCODING, USER_AGENT,
};
use http::Method;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use url::Url;

const WRITE_CHUNK_SIZE: usize = 16 * 1024;

/// Headers the engine computes; caller-supplied values are dropped.
const ENGINE_HEADERS: &[&str] = &[
    "host",
    "content-length",
    "transfer-encoding",
    "connection",
    "proxy-connection",
    "expect",
];

/// Per-attempt knobs, derived from the engine configuration and the request.
#[derive(Debug, Clone)]
pub struct TransactionOptions {
    pub keep_alive: bool,
    pub expect_continue: bool,
    pub continue_timeout: Duration,
    pub allow_write_buffering: bool,
    pub write_timeout: Option<Duration>,
    pub response_timeout: Option<Duration>,
    pub user_agent: Option<String>,
    pub accept_encoding: Option<String>,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            keep_alive: true,
            expect_continue: true,
            continue_timeout: Duration::from_millis(350),
            allow_write_buffering: true,
            write_timeout: Some(Duration::from_secs(300)),
            response_timeout: Some(Duration::from_secs(100)),
            user_agent: None,
            accept_encoding: None,
        }
    }
}

/// Request-specific inputs of one attempt.
#[derive(Clone, Copy)]
pub struct Attempt<'a> {
    pub method: &'a Method,
    pub url: &'a Url,
    pub headers: &'a OrderedHeaderMap,
    pub cookie: Option<&'a str>,
    pub authorization: Option<&'a str>,
    pub proxy_authorization: Option<&'a str>,
    pub on_continue: Option<&'a ContinueCallback>,
}

/// A final response head and the reader for its body.
#[derive(Debug)]
pub struct Exchange {
    pub head: ResponseHead,
    pub reader: BodyReader,
    /// A copy of the request body usable for a resend, if one exists.
    pub replay: Option<RequestBody>,
}

/// Why an attempt failed, with what the caller needs to decide on a resend.
#[derive(Debug)]
pub struct AttemptError {
    pub error: NetError,
    /// Some response bytes had arrived.
    pub response_started: bool,
    pub replay: Option<RequestBody>,
}

impl AttemptError {
    fn new(error: NetError, response_started: bool, replay: Option<RequestBody>) -> Self {
        Self {
            error,
            response_started,
            replay,
        }
    }
}

/// Origin-form target, or absolute form when talking to a forward proxy.
pub fn request_target(url: &Url, absolute: bool) -> String {
    if absolute {
        let mut url = url.clone();
        url.set_fragment(None);
        return url.into();
    }
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

/// `host[:port]`, omitting the scheme's default port.
pub fn host_header(url: &Url) -> Result<String, NetError> {
    let host = url.host_str().ok_or(NetError::InvalidUrl)?;
    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

/// Framing for a body, or `None` when nothing is written.
pub fn write_framing(method: &Method, body: &RequestBody) -> Option<WriteFraming> {
    match body.content_length() {
        Some(0) if !method_expects_body(method) => None,
        Some(len) => Some(WriteFraming::Length(len)),
        None => Some(WriteFraming::Chunked),
    }
}

fn method_expects_body(method: &Method) -> bool {
    *method == Method::POST || *method == Method::PUT || *method == Method::PATCH
}

/// Serialize the request head for `attempt` on `conn`.
///
/// Returns the bytes and whether `Expect: 100-continue` was added.
pub fn build_request_head(
    attempt: &Attempt<'_>,
    body: &RequestBody,
    conn: &Connection,
    options: &TransactionOptions,
) -> Result<(BytesMut, bool), NetError> {
    let mut headers = OrderedHeaderMap::new();
    let host = match attempt.headers.get(HOST.as_str()) {
        Some(value) => value.clone(),
        None => {
            HeaderValue::from_str(&host_header(attempt.url)?).map_err(|_| NetError::InvalidUrl)?
        }
    };
    headers.insert_typed(HOST, host);

    let keep_alive = if options.keep_alive { "keep-alive" } else { "close" };
    if conn.forwards_via_proxy() {
        headers.insert("Proxy-Connection", keep_alive)?;
    } else {
        headers.insert_typed(CONNECTION, HeaderValue::from_static(keep_alive));
    }

    match write_framing(attempt.method, body) {
        Some(WriteFraming::Length(len)) => {
            headers.insert_typed(CONTENT_LENGTH, HeaderValue::from(len))
        }
        Some(WriteFraming::Chunked) => {
            headers.insert_typed(TRANSFER_ENCODING, HeaderValue::from_static("chunked"))
        }
        None => {}
    }

    if let Some(value) = attempt.authorization {
        headers.insert(AUTHORIZATION.as_str(), value)?;
    }
    if let Some(value) = attempt.proxy_authorization.filter(|_| conn.forwards_via_proxy()) {
        headers.insert(PROXY_AUTHORIZATION.as_str(), value)?;
    }

    for (name, value) in attempt.headers.iter() {
        if ENGINE_HEADERS.contains(&name.as_str()) {
            continue;
        }
        if (name == AUTHORIZATION && attempt.authorization.is_some())
            || (name == PROXY_AUTHORIZATION && attempt.proxy_authorization.is_some())
        {
            continue;
        }
        headers.insert_typed(name.clone(), value.clone());
    }

    if let Some(agent) = &options.user_agent {
        let agent = HeaderValue::from_str(agent).map_err(|_| NetError::InvalidHeader)?;
        headers.insert_if_absent(USER_AGENT, agent);
    }
    if let Some(encodings) = &options.accept_encoding {
        headers.insert_if_absent(
            ACCEPT_ENCODING,
            HeaderValue::from_str(encodings).map_err(|_| NetError::InvalidHeader)?,
        );
    }
    if let Some(cookie) = attempt.cookie {
        let cookie = HeaderValue::from_str(cookie).map_err(|_| NetError::InvalidHeader)?;
        headers.insert_if_absent(COOKIE, cookie);
    }

    let expect = options.expect_continue && !body.is_empty() && conn.supports_continue();
    if expect {
        headers.insert_typed(EXPECT, HeaderValue::from_static("100-continue"));
    }

    let target = request_target(attempt.url, conn.forwards_via_proxy());
    Ok((write_request_head(attempt.method, &target, &headers), expect))
}

/// Run one attempt on `conn`.
///
/// The connection stays with the caller, who releases or discards it based
/// on the outcome.
pub async fn execute(
    conn: &mut Connection,
    attempt: &Attempt<'_>,
    body: RequestBody,
    options: &TransactionOptions,
    signal: &AbortSignal,
    load: &LoadStateTracker,
) -> Result<Exchange, AttemptError> {
    let kept_copy = body.try_clone();
    let (head, expect) = match build_request_head(attempt, &body, conn, options) {
        Ok(built) => built,
        Err(err) => return Err(AttemptError::new(err, false, Some(body))),
    };
    let framing = write_framing(attempt.method, &body);

    load.set(LoadState::SendingRequest);
    tracing::debug!(
        conn = conn.id(),
        method = %attempt.method,
        url = %attempt.url,
        reused = conn.is_reused(),
        expect,
        "sending request"
    );
    if let Err(err) = signal.run(options.write_timeout, conn.send_head(&head)).await {
        return Err(AttemptError::new(err, false, Some(body)));
    }

    if expect {
        let waited = tokio::time::timeout(
            options.continue_timeout,
            signal.run(None, conn.wait_for_data()),
        )
        .await;
        match waited {
            Err(_) => tracing::debug!(conn = conn.id(), "no 100 Continue in time, sending body"),
            Ok(Err(err)) => return Err(AttemptError::new(err, false, Some(body))),
            Ok(Ok(())) => match signal.run(None, conn.read_interim(attempt.on_continue)).await {
                Ok(None) => {}
                Ok(Some(final_head)) => {
                    // The server answered without reading the body; framing is out of step.
                    tracing::debug!(
                        conn = conn.id(),
                        status = %final_head.status,
                        "final response before body"
                    );
                    conn.set_keep_alive(false);
                    let reader = conn
                        .body_reader(attempt.method, &final_head)
                        .map_err(|err| AttemptError::new(err, true, None))?;
                    return Ok(Exchange {
                        head: final_head,
                        reader,
                        replay: Some(body),
                    });
                }
                Err(err) => return Err(AttemptError::new(err, true, Some(body))),
            },
        }
    }

    let buffered = match framing {
        Some(framing) => {
            let buffer_for_replay = options.allow_write_buffering && kept_copy.is_none();
            match signal
                .run(options.write_timeout, write_body(conn, framing, body, buffer_for_replay))
                .await
            {
                Ok(buffered) => buffered,
                Err(err) => {
                    conn.set_keep_alive(false);
                    return Err(AttemptError::new(err, false, kept_copy));
                }
            }
        }
        None => None,
    };
    let replay = kept_copy.or_else(|| buffered.map(RequestBody::Bytes));

    load.set(LoadState::WaitingForResponse);
    let head = match signal
        .run(options.response_timeout, conn.read_head(attempt.on_continue))
        .await
    {
        Ok(head) => head,
        Err(err) => {
            let started = conn.read_state().get() != ReadState::None || conn.buffered() > 0;
            conn.set_keep_alive(false);
            return Err(AttemptError::new(err, started, replay));
        }
    };
    tracing::debug!(
        conn = conn.id(),
        status = %head.status,
        version = ?head.version,
        "response head"
    );

    let reader = match conn.body_reader(attempt.method, &head) {
        Ok(reader) => reader,
        Err(err) => return Err(AttemptError::new(err, true, replay)),
    };
    load.set(LoadState::ReadingResponse);
    Ok(Exchange { head, reader, replay })
}

async fn write_body(
    conn: &mut Connection,
    framing: WriteFraming,
    body: RequestBody,
    buffer_for_replay: bool,
) -> Result<Option<Bytes>, NetError> {
    let mut writer = conn.body_writer(framing, buffer_for_replay);
    match body {
        RequestBody::Empty => {}
        RequestBody::Bytes(bytes) => writer.write(&bytes).await?,
        RequestBody::Stream { mut reader, .. } => {
            let mut chunk = vec![0u8; WRITE_CHUNK_SIZE];
            loop {
                let n = reader.read(&mut chunk).await.map_err(|e| {
                    tracing::debug!(error = %e, "request body source failed");
                    NetError::HttpBodyError
                })?;
                if n == 0 {
                    break;
                }
                writer.write(&chunk[..n]).await?;
            }
        }
    }
    let overflowed = writer.replay_overflowed();
    let buffered = writer.finish().await?;
    if overflowed {
        tracing::debug!("request body too large to keep for replay");
    }
    Ok(buffered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::stream::BoxedSocket;

    fn conn() -> Connection {
        let (client, server) = tokio::io::duplex(64);
        std::mem::forget(server);
        Connection::new(1, BoxedSocket::new(client))
    }

    fn head_text(attempt: &Attempt<'_>, body: &RequestBody, conn: &Connection) -> String {
        let (bytes, _) = build_request_head(
            attempt,
            body,
            conn,
            &TransactionOptions::default(),
        )
        .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_request_target_forms() {
        let url = Url::parse("http://a.test:8080/p/q?x=1#frag").unwrap();
        assert_eq!(request_target(&url, false), "/p/q?x=1");
        assert_eq!(request_target(&url, true), "http://a.test:8080/p/q?x=1");
        assert_eq!(host_header(&url).unwrap(), "a.test:8080");
        assert_eq!(host_header(&Url::parse("https://a.test/").unwrap()).unwrap(), "a.test");
    }

    #[test]
    fn test_get_head_layout() {
        let url = Url::parse("http://a.test/index").unwrap();
        let mut headers = OrderedHeaderMap::new();
        headers.insert("Accept", "*/*").unwrap();
        headers.insert("Content-Length", "99").unwrap();
        let attempt = Attempt {
            method: &Method::GET,
            url: &url,
            headers: &headers,
            cookie: Some("a=1"),
            authorization: None,
            proxy_authorization: None,
            on_continue: None,
        };
        let text = head_text(&attempt, &RequestBody::Empty, &conn());
        assert_eq!(
            text,
            "GET /index HTTP/1.1\r\nHost: a.test\r\nConnection: keep-alive\r\nAccept: */*\r\nCookie: a=1\r\n\r\n"
        );
    }

    #[test]
    fn test_post_head_framing() {
        let url = Url::parse("http://a.test/upload").unwrap();
        let headers = OrderedHeaderMap::new();
        let attempt = Attempt {
            method: &Method::POST,
            url: &url,
            headers: &headers,
            cookie: None,
            authorization: Some("Basic eA=="),
            proxy_authorization: None,
            on_continue: None,
        };
        let text = head_text(&attempt, &RequestBody::from("hello"), &conn());
        assert!(text.contains("Content-Length: 5\r\n"));
        assert!(text.contains("Authorization: Basic eA==\r\n"));
        assert!(text.contains("Expect: 100-continue\r\n"));

        let empty = head_text(&attempt, &RequestBody::Empty, &conn());
        assert!(empty.contains("Content-Length: 0\r\n"));
        assert!(!empty.contains("Expect"));

        let streamed = head_text(&attempt, &RequestBody::stream(&b"abc"[..], None), &conn());
        assert!(streamed.contains("Transfer-Encoding: chunked\r\n"));
    }

    #[test]
    fn test_proxy_forwarding_head() {
        let url = Url::parse("http://origin.test/x").unwrap();
        let headers = OrderedHeaderMap::new();
        let attempt = Attempt {
            method: &Method::GET,
            url: &url,
            headers: &headers,
            cookie: None,
            authorization: None,
            proxy_authorization: Some("Basic cDpx"),
            on_continue: None,
        };
        let conn = conn().with_proxy_forwarding(true);
        let text = head_text(&attempt, &RequestBody::Empty, &conn);
        assert!(text.starts_with("GET http://origin.test/x HTTP/1.1\r\n"));
        assert!(text.contains("Proxy-Connection: keep-alive\r\n"));
        assert!(text.contains("Proxy-Authorization: Basic cDpx\r\n"));
        assert!(!text.contains("\r\nConnection:"));
    }
}
