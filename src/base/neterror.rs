use thiserror::Error;

/// Coarse classification of a [`NetError`].
///
/// Lets callers tell "needs buffering enabled" apart from a network failure
/// without matching on every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// DNS or proxy lookup failed; no connection was created.
    NameResolution,
    /// Every candidate address refused or timed out, or the tunnel/TLS setup failed.
    Connect,
    /// Malformed status line, header or body framing. The connection is discarded.
    Protocol,
    /// Socket-level failure while sending or receiving.
    Transfer,
    /// A blocking wait exceeded its configured duration.
    Timeout,
    /// The caller aborted the request.
    Cancelled,
    /// A redirect or authentication retry needed a body replay that was unavailable.
    BufferingRequired,
    /// The server answered with a status the engine treats as terminal.
    Status,
    /// Invalid input or anything else.
    Other,
}

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum NetError {
    // Connection Errors
    #[error("Connection closed (TCP FIN)")]
    ConnectionClosed,
    #[error("Connection reset (TCP RST)")]
    ConnectionReset,
    #[error("Connection refused")]
    ConnectionRefused,
    #[error("Connection aborted")]
    ConnectionAborted,
    #[error("Connection failed")]
    ConnectionFailed,
    #[error("Connection to {host}:{port} failed: {reason}")]
    ConnectionFailedTo { host: String, port: u16, reason: String },
    #[error("Name not resolved")]
    NameNotResolved,
    #[error("Name not resolved: {domain}")]
    NameNotResolvedFor { domain: String },
    #[error("Proxy name not resolved: {domain}")]
    ProxyNameNotResolved { domain: String },
    #[error("Socket not connected")]
    SocketNotConnected,
    #[error("SSL handshake failed: {0}")]
    SslHandshakeFailed(String),
    #[error("Address unreachable")]
    AddressUnreachable,
    #[error("Tunnel connection failed")]
    TunnelConnectionFailed,
    #[error("Proxy auth unsupported")]
    ProxyAuthUnsupported,
    #[error("Connection timed out")]
    ConnectionTimedOut,
    #[error("Proxy auth requested")]
    ProxyAuthRequested,
    #[error("Proxy connection failed")]
    ProxyConnectionFailed,

    // HTTP Errors
    #[error("Invalid URL")]
    InvalidUrl,
    #[error("Unknown URL scheme")]
    UnknownUrlScheme,
    #[error("Invalid redirect")]
    InvalidRedirect,
    #[error("Too many redirects")]
    TooManyRedirects,
    #[error("Unsafe redirect")]
    UnsafeRedirect,
    #[error("Invalid response")]
    InvalidResponse,
    #[error("Invalid chunked encoding")]
    InvalidChunkedEncoding,
    #[error("Method not supported")]
    MethodNotSupported,
    #[error("Unexpected proxy auth")]
    UnexpectedProxyAuth,
    #[error("Empty response")]
    EmptyResponse,
    #[error("Response headers too big")]
    ResponseHeadersTooBig,
    #[error("Invalid auth credentials")]
    InvalidAuthCredentials,
    #[error("Unsupported auth scheme")]
    UnsupportedAuthScheme,
    #[error("Missing auth credentials")]
    MissingAuthCredentials,
    #[error("Response headers multiple Content-Length")]
    ResponseHeadersMultipleContentLength,
    #[error("Content-Length mismatch")]
    ContentLengthMismatch,
    #[error("Incomplete chunked encoding")]
    IncompleteChunkedEncoding,
    #[error("Invalid HTTP response")]
    InvalidHttpResponse,
    #[error("Too many retries")]
    TooManyRetries,

    // Engine-specific errors (custom codes starting at -10000)
    #[error("Invalid header")]
    InvalidHeader,
    #[error("Request body must be buffered to be resent")]
    RequestBodyNotBuffered,
    #[error("Ambiguous redirect (300 Multiple Choices)")]
    AmbiguousRedirect,
    #[error("Use Proxy (305) is not supported")]
    UseProxyNotSupported,
    #[error("Not modified (304)")]
    NotModified,
    #[error("HTTP error {status}: {reason}")]
    HttpStatus { status: u16, reason: String },
    #[error("Connection pool closed")]
    PoolClosed,
    #[error("Response body is not valid UTF-8")]
    InvalidUtf8,
    #[error("Response body is not valid JSON")]
    JsonParseError,
    #[error("Response body already consumed")]
    HttpBodyError,

    #[error("Unknown error: {0}")]
    Unknown(i32),
}

impl NetError {
    /// Create a connection failure carrying the target and the OS reason.
    pub fn connection_failed_to(host: &str, port: u16, err: std::io::Error) -> Self {
        NetError::ConnectionFailedTo {
            host: host.to_string(),
            port,
            reason: err.to_string(),
        }
    }

    /// Create a name resolution failure for a domain.
    pub fn dns_failed(domain: &str, _err: std::io::Error) -> Self {
        NetError::NameNotResolvedFor { domain: domain.to_string() }
    }

    /// Map a socket-level I/O error observed during a transfer.
    pub fn from_io(err: &std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::ConnectionReset => NetError::ConnectionReset,
            ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe => NetError::ConnectionClosed,
            ErrorKind::ConnectionRefused => NetError::ConnectionRefused,
            ErrorKind::NotConnected => NetError::SocketNotConnected,
            ErrorKind::TimedOut => NetError::ConnectionTimedOut,
            ErrorKind::UnexpectedEof => NetError::ConnectionClosed,
            _ => NetError::ConnectionReset,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            NetError::NameNotResolved
            | NetError::NameNotResolvedFor { .. }
            | NetError::ProxyNameNotResolved { .. } => ErrorCategory::NameResolution,
            NetError::ConnectionRefused
            | NetError::ConnectionFailed
            | NetError::ConnectionFailedTo { .. }
            | NetError::AddressUnreachable
            | NetError::SslHandshakeFailed(_)
            | NetError::TunnelConnectionFailed
            | NetError::ProxyConnectionFailed
            | NetError::ProxyAuthRequested
            | NetError::ProxyAuthUnsupported => ErrorCategory::Connect,
            NetError::InvalidResponse
            | NetError::InvalidHttpResponse
            | NetError::InvalidChunkedEncoding
            | NetError::IncompleteChunkedEncoding
            | NetError::ContentLengthMismatch
            | NetError::ResponseHeadersTooBig
            | NetError::ResponseHeadersMultipleContentLength => ErrorCategory::Protocol,
            NetError::ConnectionClosed
            | NetError::ConnectionReset
            | NetError::SocketNotConnected
            | NetError::EmptyResponse => ErrorCategory::Transfer,
            NetError::ConnectionTimedOut => ErrorCategory::Timeout,
            NetError::ConnectionAborted | NetError::PoolClosed => ErrorCategory::Cancelled,
            NetError::RequestBodyNotBuffered => ErrorCategory::BufferingRequired,
            NetError::AmbiguousRedirect
            | NetError::UseProxyNotSupported
            | NetError::NotModified
            | NetError::TooManyRedirects
            | NetError::HttpStatus { .. } => ErrorCategory::Status,
            _ => ErrorCategory::Other,
        }
    }

    /// True when the connection that produced this error must not be pooled again.
    pub fn is_fatal_to_connection(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Protocol
                | ErrorCategory::Transfer
                | ErrorCategory::Timeout
                | ErrorCategory::Cancelled
        )
    }

    pub fn as_i32(&self) -> i32 {
        match self {
            NetError::ConnectionClosed => -100,
            NetError::ConnectionReset => -101,
            NetError::ConnectionRefused => -102,
            NetError::ConnectionAborted => -103,
            NetError::ConnectionFailed | NetError::ConnectionFailedTo { .. } => -104,
            NetError::NameNotResolved | NetError::NameNotResolvedFor { .. } => -105,
            NetError::SslHandshakeFailed(_) => -107,
            NetError::AddressUnreachable => -109,
            NetError::TunnelConnectionFailed => -111,
            NetError::SocketNotConnected => -112,
            NetError::ProxyAuthUnsupported => -115,
            NetError::ConnectionTimedOut => -118,
            NetError::ProxyAuthRequested => -127,
            NetError::ProxyConnectionFailed => -130,

            NetError::InvalidUrl => -300,
            NetError::UnknownUrlScheme => -302,
            NetError::InvalidRedirect => -303,
            NetError::TooManyRedirects => -310,
            NetError::UnsafeRedirect => -311,
            NetError::InvalidResponse => -320,
            NetError::InvalidChunkedEncoding => -321,
            NetError::MethodNotSupported => -322,
            NetError::UnexpectedProxyAuth => -323,
            NetError::EmptyResponse => -324,
            NetError::ResponseHeadersTooBig => -325,
            NetError::InvalidAuthCredentials => -338,
            NetError::UnsupportedAuthScheme => -339,
            NetError::MissingAuthCredentials => -341,
            NetError::ResponseHeadersMultipleContentLength => -346,
            NetError::ContentLengthMismatch => -354,
            NetError::IncompleteChunkedEncoding => -355,
            NetError::InvalidHttpResponse => -370,
            NetError::TooManyRetries => -375,

            // Custom codes live well outside Chromium's ranges.
            NetError::ProxyNameNotResolved { .. } => -10000,
            NetError::InvalidHeader => -10001,
            NetError::RequestBodyNotBuffered => -10002,
            NetError::AmbiguousRedirect => -10003,
            NetError::UseProxyNotSupported => -10004,
            NetError::NotModified => -10005,
            NetError::HttpStatus { .. } => -10006,
            NetError::PoolClosed => -10007,
            NetError::InvalidUtf8 => -10008,
            NetError::JsonParseError => -10009,
            NetError::HttpBodyError => -10010,
            NetError::Unknown(code) => *code,
        }
    }
}

impl From<i32> for NetError {
    fn from(code: i32) -> Self {
        match code {
            -100 => NetError::ConnectionClosed,
            -101 => NetError::ConnectionReset,
            -102 => NetError::ConnectionRefused,
            -103 => NetError::ConnectionAborted,
            -104 => NetError::ConnectionFailed,
            -105 => NetError::NameNotResolved,
            -109 => NetError::AddressUnreachable,
            -111 => NetError::TunnelConnectionFailed,
            -112 => NetError::SocketNotConnected,
            -115 => NetError::ProxyAuthUnsupported,
            -118 => NetError::ConnectionTimedOut,
            -127 => NetError::ProxyAuthRequested,
            -130 => NetError::ProxyConnectionFailed,

            -300 => NetError::InvalidUrl,
            -302 => NetError::UnknownUrlScheme,
            -303 => NetError::InvalidRedirect,
            -310 => NetError::TooManyRedirects,
            -311 => NetError::UnsafeRedirect,
            -320 => NetError::InvalidResponse,
            -321 => NetError::InvalidChunkedEncoding,
            -322 => NetError::MethodNotSupported,
            -323 => NetError::UnexpectedProxyAuth,
            -324 => NetError::EmptyResponse,
            -325 => NetError::ResponseHeadersTooBig,
            -338 => NetError::InvalidAuthCredentials,
            -339 => NetError::UnsupportedAuthScheme,
            -341 => NetError::MissingAuthCredentials,
            -346 => NetError::ResponseHeadersMultipleContentLength,
            -354 => NetError::ContentLengthMismatch,
            -355 => NetError::IncompleteChunkedEncoding,
            -370 => NetError::InvalidHttpResponse,
            -375 => NetError::TooManyRetries,

            -10001 => NetError::InvalidHeader,
            -10002 => NetError::RequestBodyNotBuffered,
            -10003 => NetError::AmbiguousRedirect,
            -10004 => NetError::UseProxyNotSupported,
            -10005 => NetError::NotModified,
            -10007 => NetError::PoolClosed,
            -10008 => NetError::InvalidUtf8,
            -10009 => NetError::JsonParseError,
            -10010 => NetError::HttpBodyError,
            _ => NetError::Unknown(code),
        }
    }
}
