/// The current state of a request as it moves through the engine.
/// This roughly matches net/base/load_states.h
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadState {
    /// The request is idle.
    #[default]
    Idle,

    /// Queued behind other requests because the endpoint pool is saturated.
    WaitingForAvailableSocket,

    /// Resolving the host.
    ResolvingHost,

    /// Connecting to the host (TCP handshake).
    Connecting,

    /// Establishing proxy tunnel.
    EstablishingProxyTunnel,

    /// Handing the connected stream to the TLS upgrader.
    SslHandshake,

    /// Sending the HTTP request.
    SendingRequest,

    /// Waiting for the server response (TTFB).
    WaitingForResponse,

    /// Reading the response body.
    ReadingResponse,
}

/// Shared, updatable [`LoadState`] for one request.
#[derive(Debug, Clone, Default)]
pub struct LoadStateTracker(std::sync::Arc<std::sync::Mutex<LoadState>>);

impl LoadStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> LoadState {
        *self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set(&self, state: LoadState) {
        let mut current = self.0.lock().unwrap_or_else(|e| e.into_inner());
        if *current != state {
            tracing::trace!(from = ?*current, to = ?state, "load state");
            *current = state;
        }
    }
}
