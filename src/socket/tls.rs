//! TLS upgrade boundary.
//!
//! The engine does not perform handshakes. Once a socket (or a proxy tunnel)
//! to an `https` target is connected, it is handed to a [`TlsUpgrader`] and
//! the returned stream replaces the raw one.

use crate::base::neterror::NetError;
use crate::socket::stream::BoxedSocket;
use std::future::Future;
use std::pin::Pin;
use url::Url;

pub type Upgrading = Pin<Box<dyn Future<Output = Result<BoxedSocket, NetError>> + Send>>;

/// Wraps a connected byte stream in TLS.
///
/// Errors are reported to the caller as `SslHandshakeFailed` carrying the
/// upgrader's own message.
pub trait TlsUpgrader: Send + Sync {
    fn upgrade(&self, stream: BoxedSocket, url: &Url) -> Upgrading;
}

/// Default upgrader: refuses every `https` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTlsUpgrader;

impl TlsUpgrader for NoTlsUpgrader {
    fn upgrade(&self, _stream: BoxedSocket, url: &Url) -> Upgrading {
        let host = url.host_str().unwrap_or_default().to_string();
        Box::pin(async move {
            Err(NetError::SslHandshakeFailed(format!(
                "no TLS upgrader configured for {host}"
            )))
        })
    }
}

/// Normalise an upgrader failure.
pub(crate) fn handshake_error(err: NetError) -> NetError {
    match err {
        NetError::SslHandshakeFailed(_)
        | NetError::ConnectionAborted
        | NetError::ConnectionTimedOut => err,
        other => NetError::SslHandshakeFailed(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_upgrader_fails_with_message() {
        let (client, _server) = tokio::io::duplex(16);
        let url = Url::parse("https://secure.example/").unwrap();
        let err = NoTlsUpgrader
            .upgrade(BoxedSocket::new(client), &url)
            .await
            .unwrap_err();
        match err {
            NetError::SslHandshakeFailed(msg) => assert!(msg.contains("secure.example")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_handshake_error_wraps_foreign_errors() {
        assert_eq!(
            handshake_error(NetError::ConnectionReset),
            NetError::SslHandshakeFailed("Connection reset (TCP RST)".into())
        );
        assert_eq!(handshake_error(NetError::ConnectionAborted), NetError::ConnectionAborted);
    }
}
