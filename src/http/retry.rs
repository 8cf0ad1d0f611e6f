//! Resubmission after a stale keep-alive connection fails.
//!
//! Modelled on Chromium's `HttpNetworkTransaction::RetryReason`: a request
//! that went out on a *reused* connection and failed before any response
//! byte arrived most likely hit a socket the server had already closed. Such
//! an attempt is resent once on a fresh connection, provided the body can be
//! sent again.

use crate::base::neterror::NetError;

/// Why an attempt may be resent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    /// Server closed connection unexpectedly
    ConnectionReset,
    /// Connection was closed during request
    ConnectionClosed,
    /// Socket not connected
    SocketNotConnected,
    /// Connection closed before any response byte
    EmptyResponse,
}

impl RetryReason {
    /// Map a NetError to a RetryReason, if the error is retryable.
    ///
    /// Timeouts and aborts are never retried: both come from the caller's
    /// signal, which has already fired.
    pub fn from_error(error: &NetError) -> Option<Self> {
        match error {
            NetError::ConnectionReset => Some(Self::ConnectionReset),
            NetError::ConnectionClosed => Some(Self::ConnectionClosed),
            NetError::SocketNotConnected => Some(Self::SocketNotConnected),
            NetError::EmptyResponse => Some(Self::EmptyResponse),
            _ => None,
        }
    }
}

/// Resends allowed per logical request.
pub const MAX_STALE_RETRIES: usize = 1;

/// Whether a failed attempt should be resent on a fresh connection.
pub fn should_resubmit(
    error: &NetError,
    reused_connection: bool,
    response_started: bool,
    body_replayable: bool,
    attempts: usize,
) -> bool {
    reused_connection
        && !response_started
        && body_replayable
        && attempts < MAX_STALE_RETRIES
        && RetryReason::from_error(error).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert_eq!(
            RetryReason::from_error(&NetError::ConnectionReset),
            Some(RetryReason::ConnectionReset)
        );
        assert_eq!(
            RetryReason::from_error(&NetError::EmptyResponse),
            Some(RetryReason::EmptyResponse)
        );
        assert_eq!(RetryReason::from_error(&NetError::ConnectionTimedOut), None);
        assert_eq!(RetryReason::from_error(&NetError::ConnectionAborted), None);
        assert_eq!(RetryReason::from_error(&NetError::InvalidHttpResponse), None);
    }

    #[test]
    fn test_should_resubmit() {
        let err = NetError::ConnectionReset;
        assert!(should_resubmit(&err, true, false, true, 0));
        assert!(!should_resubmit(&err, false, false, true, 0));
        assert!(!should_resubmit(&err, true, true, true, 0));
        assert!(!should_resubmit(&err, true, false, false, 0));
        assert!(!should_resubmit(&err, true, false, true, MAX_STALE_RETRIES));
    }
}
