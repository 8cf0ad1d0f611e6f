//! Socket abstraction for raw and upgraded streams.
//!
//! A connection holds a [`BoxedSocket`] whether it is plain TCP, a TLS
//! stream produced by a [`TlsUpgrader`](crate::socket::tls::TlsUpgrader), or
//! an in-memory pipe in tests.
//!
//! Based on Chromium's `StreamSocket` interface.

use std::fmt;
use std::io::ErrorKind;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::net::TcpStream;

/// A trait for any socket that supports async read/write operations.
///
/// Chromium equivalent: `net::StreamSocket`
pub trait StreamSocket: AsyncRead + AsyncWrite + Unpin + Send + Sync + 'static {
    /// Non-blocking check that the peer has not closed the socket and sent
    /// nothing unsolicited. Matches Chromium's `IsConnectedAndIdle()`.
    fn is_connected_and_idle(&self) -> bool {
        true
    }
}

impl StreamSocket for TcpStream {
    fn is_connected_and_idle(&self) -> bool {
        if self.peer_addr().is_err() {
            return false;
        }
        // An idle keep-alive socket must have nothing to read. EOF means the
        // server closed it; data means the framing is out of step.
        let mut probe = [0u8; 1];
        match self.try_read(&mut probe) {
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => true,
            Ok(_) | Err(_) => false,
        }
    }
}

impl StreamSocket for DuplexStream {}

/// Owned, type-erased stream.
pub struct BoxedSocket {
    inner: Box<dyn StreamSocket>,
}

impl BoxedSocket {
    pub fn new<S: StreamSocket>(socket: S) -> Self {
        Self {
            inner: Box::new(socket),
        }
    }

    pub fn is_connected_and_idle(&self) -> bool {
        self.inner.is_connected_and_idle()
    }
}

impl fmt::Debug for BoxedSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoxedSocket").finish_non_exhaustive()
    }
}

impl AsyncRead for BoxedSocket {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut *self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for BoxedSocket {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut *self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut *self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut *self.inner).poll_shutdown(cx)
    }
}
