//! Server-wide stop signal.
//!
//! One `CancellationToken` is shared by the accept loop, every peer session
//! and its heartbeat. `TetherServer::close` cancels it; the listener then
//! stops accepting and each session closes its socket.

use tokio_util::sync::CancellationToken;

/// Owns the stop token handed to listener and session tasks.
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a coordinator whose token is not yet cancelled.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Clone of the stop token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Signal every holder of the token. Idempotent.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether the stop signal has been sent.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
