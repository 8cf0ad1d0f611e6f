//! Request cancellation.
//!
//! An [`AbortSignal`] is shared by everything working on behalf of one
//! request: the pool wait, connect, header and body I/O. Every blocking wait
//! goes through [`AbortSignal::run`], so an explicit abort, a pool teardown
//! and an expired timeout all unwind the same way. The first reason recorded
//! wins.

use crate::base::neterror::NetError;
use crate::http::parser::ReadStateCell;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug)]
struct Inner {
    reason: watch::Sender<Option<NetError>>,
    // Read state of the connection currently serving the request, if any.
    read_state: Mutex<Option<ReadStateCell>>,
}

/// Cloneable cancellation handle. Safe to trigger from any thread.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    inner: Arc<Inner>,
}

impl Default for AbortSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortSignal {
    pub fn new() -> Self {
        let (reason, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                reason,
                read_state: Mutex::new(None),
            }),
        }
    }

    /// Abort with `ConnectionAborted`.
    pub fn abort(&self) -> bool {
        self.abort_with(NetError::ConnectionAborted)
    }

    /// Record `reason` and wake every waiter. Returns false if already aborted.
    pub fn abort_with(&self, reason: NetError) -> bool {
        let first = self.inner.reason.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason.clone());
            true
        });
        if first {
            tracing::debug!(reason = %reason, "request aborted");
            if let Some(cell) = self.lock_read_state().as_ref() {
                cell.abort();
            }
        }
        first
    }

    pub fn reason(&self) -> Option<NetError> {
        self.inner.reason.borrow().clone()
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.reason.borrow().is_some()
    }

    /// `Err` with the recorded reason once aborted.
    pub fn check(&self) -> Result<(), NetError> {
        match self.reason() {
            Some(reason) => Err(reason),
            None => Ok(()),
        }
    }

    fn lock_read_state(&self) -> std::sync::MutexGuard<'_, Option<ReadStateCell>> {
        self.inner.read_state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Tie the read state of the serving connection to this signal.
    ///
    /// Binding after the abort already happened marks the state aborted at once.
    pub fn bind_read_state(&self, cell: &ReadStateCell) {
        let mut bound = self.lock_read_state();
        if self.is_aborted() {
            cell.abort();
        }
        *bound = Some(cell.clone());
    }

    /// Forget `cell` if it is the one currently bound.
    pub fn unbind_read_state(&self, cell: &ReadStateCell) {
        let mut bound = self.lock_read_state();
        if bound.as_ref().is_some_and(|b| b.same(cell)) {
            *bound = None;
        }
    }

    /// Resolves with the abort reason.
    pub async fn aborted(&self) -> NetError {
        let mut rx = self.inner.reason.subscribe();
        let reason = match rx.wait_for(Option::is_some).await {
            Ok(reason) => reason.clone(),
            Err(_) => None,
        };
        reason.unwrap_or(NetError::ConnectionAborted)
    }

    /// Drive `fut` until it completes, the signal fires, or `timeout` elapses.
    ///
    /// Expiry aborts the whole request with `ConnectionTimedOut`.
    pub async fn run<F, T>(&self, timeout: Option<Duration>, fut: F) -> Result<T, NetError>
    where
        F: Future<Output = Result<T, NetError>>,
    {
        self.check()?;
        let deadline = async {
            match timeout {
                Some(duration) => tokio::time::sleep(duration).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            reason = self.aborted() => Err(reason),
            result = fut => result,
            _ = deadline => {
                self.abort_with(NetError::ConnectionTimedOut);
                Err(self.reason().unwrap_or(NetError::ConnectionTimedOut))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::parser::ReadState;

    #[test]
    fn test_first_reason_wins() {
        let signal = AbortSignal::new();
        assert!(signal.check().is_ok());
        assert!(signal.abort_with(NetError::ConnectionTimedOut));
        assert!(!signal.abort());
        assert_eq!(signal.reason(), Some(NetError::ConnectionTimedOut));
        assert_eq!(signal.check().unwrap_err(), NetError::ConnectionTimedOut);
    }

    #[test]
    fn test_abort_marks_bound_read_state() {
        let signal = AbortSignal::new();
        let cell = ReadStateCell::new();
        signal.bind_read_state(&cell);
        cell.advance(ReadState::Headers).unwrap();
        signal.abort();
        assert_eq!(cell.get(), ReadState::Aborted);
    }

    #[test]
    fn test_unbound_read_state_untouched() {
        let signal = AbortSignal::new();
        let cell = ReadStateCell::new();
        signal.bind_read_state(&cell);
        signal.unbind_read_state(&cell);
        signal.abort();
        assert_eq!(cell.get(), ReadState::None);
    }

    #[tokio::test]
    async fn test_run_completes() {
        let signal = AbortSignal::new();
        let value = signal
            .run(Some(Duration::from_secs(5)), async { Ok::<_, NetError>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert!(!signal.is_aborted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_times_out() {
        let signal = AbortSignal::new();
        let err = signal
            .run(Some(Duration::from_millis(50)), std::future::pending::<Result<(), NetError>>())
            .await
            .unwrap_err();
        assert_eq!(err, NetError::ConnectionTimedOut);
        assert!(signal.is_aborted());
    }

    #[tokio::test]
    async fn test_abort_from_other_task() {
        let signal = AbortSignal::new();
        let remote = signal.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            remote.abort();
        });
        let err = signal
            .run(None, std::future::pending::<Result<(), NetError>>())
            .await
            .unwrap_err();
        assert_eq!(err, NetError::ConnectionAborted);
    }
}
