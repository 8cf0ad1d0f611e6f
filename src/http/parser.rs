//! Response head parsing.
//!
//! Status line and header block are parsed incrementally out of a
//! [`ParseBuffer`]; each call consumes whole lines only, so a head split
//! across many socket reads is handled by calling [`HeadParser::parse`]
//! again after more bytes arrive. Progress is tracked in a shared
//! [`ReadStateCell`] because an abort may race with an in-flight parse.

use crate::base::neterror::NetError;
use crate::http::buffer::ParseBuffer;
use http::header::{HeaderName, HeaderValue, CONNECTION, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, Method, StatusCode, Version};
use std::sync::{Arc, Mutex};

/// Maximum size of one response head (status line plus headers).
pub const MAX_HEADERS_SIZE: usize = 64 * 1024;

/// Where the parser is within the current response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadState {
    #[default]
    None,
    StatusLine,
    Headers,
    Content,
    Aborted,
}

impl ReadState {
    fn rank(self) -> u8 {
        match self {
            ReadState::None => 0,
            ReadState::StatusLine => 1,
            ReadState::Headers => 2,
            ReadState::Content => 3,
            ReadState::Aborted => 4,
        }
    }
}

/// Read-state guarded by its own lock.
///
/// Transitions only move forward. The two exceptions are the reset to
/// `None` after a `100 Continue` head and the per-response reset performed
/// before a new request is sent on the same connection. `Aborted` is final.
#[derive(Debug, Clone, Default)]
pub struct ReadStateCell(Arc<Mutex<ReadState>>);

impl ReadStateCell {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ReadState> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self) -> ReadState {
        *self.lock()
    }

    pub fn is_aborted(&self) -> bool {
        self.get() == ReadState::Aborted
    }

    /// True when both handles refer to the same state.
    pub fn same(&self, other: &ReadStateCell) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn advance(&self, next: ReadState) -> Result<(), NetError> {
        let mut state = self.lock();
        if *state == ReadState::Aborted {
            return Err(NetError::ConnectionAborted);
        }
        if next.rank() < state.rank() {
            tracing::warn!(from = ?*state, to = ?next, "read state regression rejected");
            return Err(NetError::InvalidResponse);
        }
        *state = next;
        Ok(())
    }

    /// Interim `100 Continue` seen: parse the next head from scratch.
    pub fn reset_for_continue(&self) -> Result<(), NetError> {
        let mut state = self.lock();
        match *state {
            ReadState::Aborted => Err(NetError::ConnectionAborted),
            ReadState::Content => {
                *state = ReadState::None;
                Ok(())
            }
            _ => Err(NetError::InvalidResponse),
        }
    }

    /// Start tracking a new response on a reused connection.
    pub fn begin_response(&self) -> Result<(), NetError> {
        let mut state = self.lock();
        if *state == ReadState::Aborted {
            return Err(NetError::ConnectionAborted);
        }
        *state = ReadState::None;
        Ok(())
    }

    pub fn abort(&self) {
        *self.lock() = ReadState::Aborted;
    }
}

/// Parsed status line and headers of one response.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub version: Version,
    pub status: StatusCode,
    pub reason: String,
    pub headers: HeaderMap,
}

impl ResponseHead {
    pub fn header_str(&self, name: impl http::header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Every value of `name`, in arrival order (used for auth challenges).
    pub fn header_values(&self, name: impl http::header::AsHeaderName) -> Vec<String> {
        self.headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect()
    }

    pub fn is_continue(&self) -> bool {
        self.status == StatusCode::CONTINUE
    }
}

/// Incremental status-line/header parser bound to one connection's read state.
#[derive(Debug)]
pub struct HeadParser {
    state: ReadStateCell,
    version: Version,
    status: Option<StatusCode>,
    reason: String,
    headers: Vec<(Vec<u8>, Vec<u8>)>,
    head_bytes: usize,
}

impl HeadParser {
    pub fn new(state: ReadStateCell) -> Self {
        Self {
            state,
            version: Version::HTTP_11,
            status: None,
            reason: String::new(),
            headers: Vec::new(),
            head_bytes: 0,
        }
    }

    pub fn state(&self) -> &ReadStateCell {
        &self.state
    }

    /// Parse as much of one head as `buf` holds.
    ///
    /// Returns `Ok(None)` when more bytes are needed. On success the read
    /// state is `Content` and `buf` starts at the first body byte.
    pub fn parse(&mut self, buf: &mut ParseBuffer) -> Result<Option<ResponseHead>, NetError> {
        loop {
            match self.state.get() {
                ReadState::Aborted => return Err(NetError::ConnectionAborted),
                ReadState::Content => return Err(NetError::InvalidResponse),
                ReadState::None => {
                    if buf.is_empty() {
                        return Ok(None);
                    }
                    self.status = None;
                    self.reason.clear();
                    self.headers.clear();
                    self.head_bytes = 0;
                    self.state.advance(ReadState::StatusLine)?;
                }
                ReadState::StatusLine => {
                    let Some(line) = buf.read_line() else {
                        return self.need_more(buf);
                    };
                    // Tolerate stray blank lines ahead of the status line.
                    if line.is_empty() {
                        continue;
                    }
                    self.head_bytes += line.len() + 2;
                    let (version, status, reason) = parse_status_line(line)?;
                    tracing::trace!(%status, ?version, "status line parsed");
                    self.version = version;
                    self.status = Some(status);
                    self.reason = reason;
                    self.state.advance(ReadState::Headers)?;
                }
                ReadState::Headers => {
                    let Some(line) = buf.read_line() else {
                        return self.need_more(buf);
                    };
                    self.head_bytes += line.len() + 2;
                    if self.head_bytes > MAX_HEADERS_SIZE {
                        return Err(NetError::ResponseHeadersTooBig);
                    }
                    if line.is_empty() {
                        let head = self.finish()?;
                        self.state.advance(ReadState::Content)?;
                        return Ok(Some(head));
                    }
                    push_header_line(&mut self.headers, line)?;
                }
            }
        }
    }

    fn need_more(&self, buf: &ParseBuffer) -> Result<Option<ResponseHead>, NetError> {
        if self.head_bytes + buf.len() > MAX_HEADERS_SIZE {
            return Err(NetError::ResponseHeadersTooBig);
        }
        Ok(None)
    }

    fn finish(&mut self) -> Result<ResponseHead, NetError> {
        let status = self.status.ok_or(NetError::InvalidHttpResponse)?;
        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in self.headers.drain(..) {
            let name = HeaderName::from_bytes(&name).map_err(|_| {
                tracing::warn!("malformed response header name");
                NetError::InvalidHttpResponse
            })?;
            let value = HeaderValue::from_bytes(&value).map_err(|_| NetError::InvalidHttpResponse)?;
            headers.append(name, value);
        }
        Ok(ResponseHead {
            version: self.version,
            status,
            reason: std::mem::take(&mut self.reason),
            headers,
        })
    }
}

/// `HTTP/1.0` or `HTTP/1.1`, a three digit code, then an optional reason.
pub fn parse_status_line(line: &[u8]) -> Result<(Version, StatusCode, String), NetError> {
    let text = std::str::from_utf8(line).map_err(|_| NetError::InvalidHttpResponse)?;
    let mut parts = text.splitn(3, ' ');

    let version = match parts.next() {
        Some("HTTP/1.1") => Version::HTTP_11,
        Some("HTTP/1.0") => Version::HTTP_10,
        other => {
            tracing::warn!(token = ?other, "unsupported protocol token in status line");
            return Err(NetError::InvalidHttpResponse);
        }
    };

    let code = parts.next().unwrap_or_default();
    if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(NetError::InvalidHttpResponse);
    }
    let status = code
        .parse::<u16>()
        .ok()
        .and_then(|c| StatusCode::from_u16(c).ok())
        .ok_or(NetError::InvalidHttpResponse)?;

    let reason = parts.next().unwrap_or_default().trim().to_string();
    Ok((version, status, reason))
}

fn push_header_line(headers: &mut Vec<(Vec<u8>, Vec<u8>)>, line: &[u8]) -> Result<(), NetError> {
    if line[0] == b' ' || line[0] == b'\t' {
        // Continuation of the previous header value.
        let (_, value) = headers.last_mut().ok_or(NetError::InvalidHttpResponse)?;
        let extra = trim_ascii(line);
        if !extra.is_empty() {
            if !value.is_empty() {
                value.push(b' ');
            }
            value.extend_from_slice(extra);
        }
        return Ok(());
    }

    let colon = line.iter().position(|&b| b == b':').ok_or_else(|| {
        tracing::warn!("response header line without a colon");
        NetError::InvalidHttpResponse
    })?;
    let name = trim_ascii(&line[..colon]);
    if name.is_empty() {
        return Err(NetError::InvalidHttpResponse);
    }
    headers.push((name.to_vec(), trim_ascii(&line[colon + 1..]).to_vec()));
    Ok(())
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |i| i + 1);
    &bytes[start..end]
}

/// How the body that follows a response head is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// No body at all.
    Empty,
    Length(u64),
    Chunked,
    /// Read until the peer closes the connection.
    UntilClose,
}

/// Decide the body framing of a response to `method`.
pub fn body_framing(method: &Method, head: &ResponseHead) -> Result<Framing, NetError> {
    let status = head.status;
    if method == Method::HEAD
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
        || (method == Method::CONNECT && status.is_success())
    {
        return Ok(Framing::Empty);
    }

    if is_chunked(&head.headers) {
        return Ok(Framing::Chunked);
    }

    match content_length(&head.headers)? {
        Some(len) => Ok(Framing::Length(len)),
        None => Ok(Framing::UntilClose),
    }
}

/// True when `chunked` is the final transfer coding.
pub fn is_chunked(headers: &HeaderMap) -> bool {
    headers
        .get_all(TRANSFER_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .last()
        .is_some_and(|t| t.eq_ignore_ascii_case("chunked"))
}

/// Parse `Content-Length`. Repeated values must agree.
pub fn content_length(headers: &HeaderMap) -> Result<Option<u64>, NetError> {
    let mut found: Option<u64> = None;
    for value in headers.get_all(CONTENT_LENGTH) {
        let text = value.to_str().map_err(|_| NetError::InvalidHttpResponse)?;
        for part in text.split(',') {
            let len = part
                .trim()
                .parse::<u64>()
                .map_err(|_| NetError::InvalidHttpResponse)?;
            match found {
                Some(prev) if prev != len => {
                    return Err(NetError::ResponseHeadersMultipleContentLength)
                }
                _ => found = Some(len),
            }
        }
    }
    Ok(found)
}

fn has_token(headers: &HeaderMap, name: &str, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}

/// Whether the server allows the connection to be reused after this response.
///
/// `Proxy-Connection` is consulted as well when the request went through a
/// forward proxy without a tunnel.
pub fn wants_keep_alive(head: &ResponseHead, via_proxy: bool) -> bool {
    let mut names = vec![CONNECTION.as_str()];
    if via_proxy {
        names.push("proxy-connection");
    }
    if names.iter().any(|n| has_token(&head.headers, n, "close")) {
        return false;
    }
    match head.version {
        Version::HTTP_11 => true,
        _ => names.iter().any(|n| has_token(&head.headers, n, "keep-alive")),
    }
}
