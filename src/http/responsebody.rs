//! Response body streaming.
//! Mirrors Chromium's HttpStream::ReadResponseBody.
//!
//! The body holds the connection it is read from. Reaching the end of the
//! body hands the connection back to its pool; an error, an abort or
//! dropping the body early discards it instead.

use crate::base::abort::AbortSignal;
use crate::base::neterror::NetError;
use crate::http::framer::BodyReader;
use crate::http::parser::Framing;
use crate::socket::pool::PooledConnection;
use bytes::{Bytes, BytesMut};
use std::fmt;
use std::time::Duration;

const READ_CHUNK_SIZE: usize = 16 * 1024;

/// Response body wrapper for streaming.
pub struct ResponseBody {
    conn: Option<PooledConnection>,
    reader: BodyReader,
    signal: AbortSignal,
    read_timeout: Option<Duration>,
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseBody")
            .field("framing", &self.reader.framing())
            .field("complete", &self.is_complete())
            .field("conn", &self.conn.as_ref().map(|c| c.id()))
            .finish()
    }
}

impl ResponseBody {
    pub(crate) fn new(
        conn: PooledConnection,
        reader: BodyReader,
        signal: AbortSignal,
        read_timeout: Option<Duration>,
    ) -> Self {
        let mut body = Self {
            conn: Some(conn),
            reader,
            signal,
            read_timeout,
        };
        if body.reader.is_done() {
            body.complete();
        }
        body
    }

    /// A body with no bytes and no connection behind it.
    pub fn empty() -> Self {
        Self {
            conn: None,
            reader: BodyReader::new(Framing::Empty),
            signal: AbortSignal::new(),
            read_timeout: None,
        }
    }

    pub fn framing(&self) -> Framing {
        self.reader.framing()
    }

    /// Every byte has been read and the connection handed back.
    pub fn is_complete(&self) -> bool {
        self.reader.is_done()
    }

    /// The rest of the body is already buffered, no further socket reads needed.
    pub fn is_buffered(&self) -> bool {
        match &self.conn {
            Some(conn) => conn.body_is_buffered(&self.reader),
            None => true,
        }
    }

    /// Declared length still outstanding, for fixed-length bodies.
    pub fn remaining(&self) -> Option<u64> {
        self.reader.remaining()
    }

    /// Abort reads on this body, discarding the connection.
    pub fn abort(&self) {
        self.signal.abort();
    }

    fn complete(&mut self) {
        if let Some(conn) = self.conn.take() {
            tracing::trace!(conn = conn.id(), "response body complete");
            conn.release();
        }
    }

    async fn read_raw(&mut self, out: &mut [u8]) -> Result<usize, NetError> {
        let Some(conn) = self.conn.as_mut() else {
            return Ok(0);
        };
        let read = self
            .signal
            .run(self.read_timeout, conn.read_body(&mut self.reader, out))
            .await;
        match read {
            Ok(n) => Ok(n),
            Err(err) => {
                if let Some(conn) = self.conn.take() {
                    tracing::debug!(conn = conn.id(), error = %err, "response body failed");
                    conn.discard();
                }
                Err(err)
            }
        }
    }

    /// Next piece of the body, `None` at the end.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>, NetError> {
        if self.conn.is_none() {
            return Ok(None);
        }
        let mut buf = BytesMut::zeroed(READ_CHUNK_SIZE);
        let n = self.read_raw(&mut buf).await?;
        if self.reader.is_done() {
            self.complete();
        }
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some(buf.freeze()))
    }

    /// Read and throw away the rest of the body. Returns the bytes skipped.
    pub async fn drain(&mut self) -> Result<u64, NetError> {
        let mut skipped = 0u64;
        while let Some(chunk) = self.chunk().await? {
            skipped += chunk.len() as u64;
        }
        Ok(skipped)
    }

    /// Read entire body as bytes.
    pub async fn bytes(mut self) -> Result<Bytes, NetError> {
        let hint = self
            .remaining()
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(0)
            .min(READ_CHUNK_SIZE * 64);
        let mut collected = BytesMut::with_capacity(hint);
        while let Some(chunk) = self.chunk().await? {
            collected.extend_from_slice(&chunk);
        }
        Ok(collected.freeze())
    }

    /// Read body as UTF-8 string.
    pub async fn text(self) -> Result<String, NetError> {
        let bytes = self.bytes().await?;
        String::from_utf8(bytes.to_vec()).map_err(|_| NetError::InvalidUtf8)
    }

    /// Read body as JSON, deserializing to type T.
    #[cfg(feature = "json")]
    pub async fn json<T: serde::de::DeserializeOwned>(self) -> Result<T, NetError> {
        let bytes = self.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|_| NetError::JsonParseError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::connection::Connection;
    use crate::socket::pool::{Checkout, EndpointId, EndpointPool};
    use crate::socket::stream::BoxedSocket;
    use http::Method;
    use tokio::io::{AsyncWriteExt, DuplexStream};
    use url::Url;

    async fn body_for(
        raw: &'static [u8],
    ) -> (std::sync::Arc<EndpointPool>, ResponseBody, DuplexStream) {
        let endpoint = EndpointId::new(&Url::parse("http://body.test/").unwrap(), None).unwrap();
        let pool = EndpointPool::new(endpoint, 2);
        let signal = AbortSignal::new();
        let Checkout::Connect(permit) = pool.checkout(&signal).await.unwrap() else {
            panic!("fresh pool should grant a connect permit");
        };
        let (client, mut server) = tokio::io::duplex(4096);
        let id = permit.connection_id();
        let mut conn = permit.complete(Connection::new(id, BoxedSocket::new(client))).unwrap();
        conn.send_head(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
        server.write_all(raw).await.unwrap();
        let head = conn.read_head(None).await.unwrap();
        let reader = conn.body_reader(&Method::GET, &head).unwrap();
        (pool, ResponseBody::new(conn, reader, signal, None), server)
    }

    #[tokio::test]
    async fn test_body_completion_returns_connection() {
        let (pool, body, _server) =
            body_for(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello").await;
        assert_eq!(body.text().await.unwrap(), "hello");
        assert_eq!(pool.stats().idle, 1);
    }

    #[tokio::test]
    async fn test_empty_body_completes_immediately() {
        let (pool, body, _server) = body_for(b"HTTP/1.1 204 No Content\r\n\r\n").await;
        assert!(body.is_complete());
        assert_eq!(pool.stats().idle, 1);
    }

    #[tokio::test]
    async fn test_chunked_body() {
        let (pool, body, _server) =
            body_for(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n2\r\nde\r\n0\r\n\r\n")
                .await;
        assert_eq!(&body.bytes().await.unwrap()[..], b"abcde");
        assert_eq!(pool.stats().idle, 1);
    }

    #[tokio::test]
    async fn test_dropped_body_discards_connection() {
        let (pool, body, _server) =
            body_for(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nhel").await;
        drop(body);
        assert_eq!(pool.live_count(), 0);
    }

    #[tokio::test]
    async fn test_premature_close_is_an_error() {
        let (pool, body, server) =
            body_for(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nhel").await;
        drop(server);
        assert_eq!(body.bytes().await.unwrap_err(), NetError::ContentLengthMismatch);
        assert_eq!(pool.live_count(), 0);
    }
}
