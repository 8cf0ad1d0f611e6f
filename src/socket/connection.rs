//! One physical connection to an endpoint.
//!
//! A `Connection` owns its socket and receive buffer and serves at most one
//! request at a time. It writes request heads, parses response heads
//! (including interim `100 Continue` responses), hands out body framers and
//! remembers the keep-alive and NTLM facts the pool needs for reuse.
//!
//! Chromium equivalent: `HttpStreamParser` plus the socket it drives.

use crate::base::context::IoResultExt;
use crate::base::neterror::NetError;
use crate::http::buffer::ParseBuffer;
use crate::http::framer::{BodyReader, BodyWriter, WriteFraming};
use crate::http::parser::{
    body_framing, wants_keep_alive, Framing, HeadParser, ReadState, ReadStateCell, ResponseHead,
};
use crate::socket::stream::BoxedSocket;
use http::{HeaderMap, Method, StatusCode, Version};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

/// Invoked with every interim `100 Continue` head.
pub type ContinueCallback = Arc<dyn Fn(StatusCode, &HeaderMap) + Send + Sync>;

#[derive(Debug, Clone)]
struct NtlmBinding {
    credential: String,
    shared: bool,
}

#[derive(Debug)]
pub struct Connection {
    id: u64,
    stream: BoxedSocket,
    buffer: ParseBuffer,
    keep_alive: bool,
    reused: bool,
    chunked_read: bool,
    ntlm: Option<NtlmBinding>,
    read_state: ReadStateCell,
    server_version: Option<Version>,
    via_proxy: bool,
    requests: u32,
}

impl Connection {
    pub fn new(id: u64, stream: BoxedSocket) -> Self {
        Self {
            id,
            stream,
            buffer: ParseBuffer::new(),
            keep_alive: true,
            reused: false,
            chunked_read: false,
            ntlm: None,
            read_state: ReadStateCell::new(),
            server_version: None,
            via_proxy: false,
            requests: 0,
        }
    }

    /// Requests go to a forward proxy in absolute form (no tunnel).
    pub fn with_proxy_forwarding(mut self, via_proxy: bool) -> Self {
        self.via_proxy = via_proxy;
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_reused(&self) -> bool {
        self.reused
    }

    pub(crate) fn mark_reused(&mut self) {
        self.reused = true;
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    pub fn set_keep_alive(&mut self, keep_alive: bool) {
        self.keep_alive = keep_alive;
    }

    pub fn is_chunked_read(&self) -> bool {
        self.chunked_read
    }

    pub fn forwards_via_proxy(&self) -> bool {
        self.via_proxy
    }

    /// Protocol version of the last response seen on this connection.
    pub fn server_version(&self) -> Option<Version> {
        self.server_version
    }

    pub fn requests_served(&self) -> u32 {
        self.requests
    }

    pub fn read_state(&self) -> &ReadStateCell {
        &self.read_state
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Whether the connection can take another request.
    pub fn is_usable(&self) -> bool {
        self.keep_alive
            && !self.read_state.is_aborted()
            && self.buffer.is_empty()
            && self.stream.is_connected_and_idle()
    }

    /// The server may accept `Expect: 100-continue` (unknown or HTTP/1.1).
    pub fn supports_continue(&self) -> bool {
        self.server_version != Some(Version::HTTP_10)
    }

    /// Write a serialized request head and flush it.
    pub async fn send_head(&mut self, head: &[u8]) -> Result<(), NetError> {
        self.read_state.begin_response()?;
        self.requests += 1;
        tracing::trace!(conn = self.id, bytes = head.len(), "sending request head");
        let result = async {
            self.stream.write_all(head).await.transfer_context()?;
            self.stream.flush().await.transfer_context()
        }
        .await;
        if result.is_err() {
            self.keep_alive = false;
        }
        result
    }

    pub fn body_writer(
        &mut self,
        framing: WriteFraming,
        buffer_for_replay: bool,
    ) -> BodyWriter<'_, BoxedSocket> {
        BodyWriter::new(&mut self.stream, framing, buffer_for_replay)
    }

    /// Wait until at least one response byte is buffered.
    ///
    /// Cancel-safe, used to bound the `100 Continue` wait.
    pub async fn wait_for_data(&mut self) -> Result<(), NetError> {
        if !self.buffer.is_empty() {
            return Ok(());
        }
        if self.buffer.fill_from(&mut self.stream).await? == 0 {
            self.keep_alive = false;
            return Err(NetError::EmptyResponse);
        }
        Ok(())
    }

    /// Parse one response head.
    ///
    /// Interim `1xx` heads are consumed here: `100` is reported to
    /// `on_continue`, the read state is reset and `Ok(None)` is returned.
    /// Bytes already buffered past the interim head are kept for the next call.
    pub async fn read_interim(
        &mut self,
        on_continue: Option<&ContinueCallback>,
    ) -> Result<Option<ResponseHead>, NetError> {
        let mut parser = HeadParser::new(self.read_state.clone());
        loop {
            let parsed = match parser.parse(&mut self.buffer) {
                Ok(parsed) => parsed,
                Err(err) => {
                    self.keep_alive = false;
                    return Err(err);
                }
            };
            if let Some(head) = parsed {
                self.server_version = Some(head.version);
                if !head.status.is_informational() {
                    return Ok(Some(head));
                }
                if head.is_continue() {
                    tracing::debug!(conn = self.id, "100 Continue received");
                    if let Some(callback) = on_continue {
                        callback(head.status, &head.headers);
                    }
                } else {
                    tracing::trace!(
                        conn = self.id,
                        status = %head.status,
                        "skipping interim response"
                    );
                }
                self.read_state.reset_for_continue()?;
                return Ok(None);
            }

            let n = match self.buffer.fill_from(&mut self.stream).await {
                Ok(n) => n,
                Err(err) => {
                    self.keep_alive = false;
                    return Err(err);
                }
            };
            if n == 0 {
                self.keep_alive = false;
                return Err(match self.read_state.get() {
                    ReadState::None => NetError::EmptyResponse,
                    _ => NetError::ConnectionClosed,
                });
            }
        }
    }

    /// Parse heads until a final (non-1xx) one arrives.
    pub async fn read_head(
        &mut self,
        on_continue: Option<&ContinueCallback>,
    ) -> Result<ResponseHead, NetError> {
        loop {
            if let Some(head) = self.read_interim(on_continue).await? {
                return Ok(head);
            }
        }
    }

    /// Decide body framing and reuse for the response to `method`.
    pub fn body_reader(
        &mut self,
        method: &Method,
        head: &ResponseHead,
    ) -> Result<BodyReader, NetError> {
        let framing = match body_framing(method, head) {
            Ok(framing) => framing,
            Err(err) => {
                self.keep_alive = false;
                return Err(err);
            }
        };
        self.chunked_read = framing == Framing::Chunked;
        if !wants_keep_alive(head, self.via_proxy) || framing == Framing::UntilClose {
            self.keep_alive = false;
        }
        tracing::trace!(conn = self.id, ?framing, keep_alive = self.keep_alive, "response framing");
        Ok(BodyReader::new(framing))
    }

    pub async fn read_body(
        &mut self,
        reader: &mut BodyReader,
        out: &mut [u8],
    ) -> Result<usize, NetError> {
        match reader.read(&mut self.stream, &mut self.buffer, out).await {
            Ok(n) => Ok(n),
            Err(err) => {
                self.keep_alive = false;
                Err(err)
            }
        }
    }

    pub fn body_is_buffered(&self, reader: &BodyReader) -> bool {
        reader.is_buffered(&self.buffer)
    }

    pub fn is_ntlm_authenticated(&self) -> bool {
        self.ntlm.is_some()
    }

    pub fn ntlm_credential(&self) -> Option<&str> {
        self.ntlm.as_ref().map(|b| b.credential.as_str())
    }

    /// Record a completed NTLM handshake on this connection.
    pub fn mark_ntlm_authenticated(&mut self, credential: String, shared: bool) {
        tracing::debug!(conn = self.id, shared, "connection NTLM-authenticated");
        self.ntlm = Some(NtlmBinding { credential, shared });
    }

    /// Check that a request may use this NTLM-authenticated connection.
    ///
    /// A different credential, or a request whose sharing opt-in differs from
    /// the one the handshake ran under, resets the NTLM state and marks the
    /// connection for closing. Returns whether it may be used.
    pub fn check_ntlm_credential(
        &mut self,
        credential: Option<&str>,
        unsafe_sharing: bool,
    ) -> bool {
        let Some(binding) = &self.ntlm else {
            return true;
        };
        let compatible = if binding.shared && unsafe_sharing {
            true
        } else {
            binding.shared == unsafe_sharing && credential == Some(binding.credential.as_str())
        };
        if !compatible {
            tracing::debug!(conn = self.id, "NTLM credential mismatch, closing connection");
            self.ntlm = None;
            self.keep_alive = false;
        }
        compatible
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn pair() -> (Connection, tokio::io::DuplexStream) {
        let (client, server) = tokio::io::duplex(4096);
        (Connection::new(1, BoxedSocket::new(client)), server)
    }

    #[tokio::test]
    async fn test_send_head_and_read_response() {
        let (mut conn, mut server) = pair();
        conn.send_head(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();
        let mut buf = [0u8; 27];
        server.read_exact(&mut buf).await.unwrap();
        assert!(buf.starts_with(b"GET / HTTP/1.1"));

        server.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi").await.unwrap();
        let head = conn.read_head(None).await.unwrap();
        assert_eq!(head.status, StatusCode::OK);
        let mut reader = conn.body_reader(&Method::GET, &head).unwrap();
        assert!(conn.body_is_buffered(&reader));
        let mut out = [0u8; 8];
        assert_eq!(conn.read_body(&mut reader, &mut out).await.unwrap(), 2);
        assert_eq!(conn.read_body(&mut reader, &mut out).await.unwrap(), 0);
        assert!(conn.is_usable());
    }

    #[tokio::test]
    async fn test_continue_reuses_buffered_bytes() {
        let (mut conn, mut server) = pair();
        conn.send_head(b"POST / HTTP/1.1\r\n\r\n").await.unwrap();
        server
            .write_all(
                b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 201 Created\r\nContent-Length: 0\r\n\r\n",
            )
            .await
            .unwrap();

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let callback: ContinueCallback = Arc::new(move |status, _| {
            assert_eq!(status, StatusCode::CONTINUE);
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let head = conn.read_head(Some(&callback)).await.unwrap();
        assert_eq!(head.status, StatusCode::CREATED);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(conn.read_state().get(), ReadState::Content);
    }

    #[tokio::test]
    async fn test_empty_response() {
        let (mut conn, server) = pair();
        conn.send_head(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
        drop(server);
        assert_eq!(conn.read_head(None).await.unwrap_err(), NetError::EmptyResponse);
        assert!(!conn.keep_alive());
    }

    #[tokio::test]
    async fn test_truncated_head() {
        let (mut conn, mut server) = pair();
        conn.send_head(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
        server.write_all(b"HTTP/1.1 200 OK\r\nContent-").await.unwrap();
        drop(server);
        assert_eq!(conn.read_head(None).await.unwrap_err(), NetError::ConnectionClosed);
    }

    #[tokio::test]
    async fn test_connection_close_disables_reuse() {
        let (mut conn, mut server) = pair();
        conn.send_head(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
        server
            .write_all(b"HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Length: 0\r\n\r\n")
            .await
            .unwrap();
        let head = conn.read_head(None).await.unwrap();
        conn.body_reader(&Method::GET, &head).unwrap();
        assert!(!conn.keep_alive());
        assert!(!conn.is_usable());
    }

    #[test]
    fn test_ntlm_credential_check() {
        let (client, _server) = tokio::io::duplex(16);
        let mut conn = Connection::new(7, BoxedSocket::new(client));
        assert!(conn.check_ntlm_credential(None, false));

        conn.mark_ntlm_authenticated("corp\\alice".into(), false);
        assert!(conn.check_ntlm_credential(Some("corp\\alice"), false));
        assert!(!conn.check_ntlm_credential(Some("corp\\bob"), false));
        assert!(!conn.is_ntlm_authenticated());
        assert!(!conn.keep_alive());
    }

    #[test]
    fn test_ntlm_sharing_conflict() {
        let (client, _server) = tokio::io::duplex(16);
        let mut conn = Connection::new(8, BoxedSocket::new(client));
        conn.mark_ntlm_authenticated("alice".into(), true);
        assert!(conn.check_ntlm_credential(None, true));
        assert!(!conn.check_ntlm_credential(Some("alice"), false));
    }
}
