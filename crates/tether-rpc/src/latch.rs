//! Restartable connection-state latch.
//!
//! Unlike a one-shot "connected" future, the latch can move from `Closed`
//! back to `Open` when a transport reconnects, and every later wait observes
//! the new state.

use tokio::sync::watch;

use tether_core::{ConnectionState, Result, TetherError};

/// Shared, observable connection state.
#[derive(Debug)]
pub struct StateLatch {
    tx: watch::Sender<ConnectionState>,
}

impl StateLatch {
    /// Create a latch in `initial` state.
    pub fn new(initial: ConnectionState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Current state.
    pub fn get(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    /// Move to `next`, returning the previous state.
    pub fn set(&self, next: ConnectionState) -> ConnectionState {
        self.tx.send_replace(next)
    }

    /// Watch for state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    /// Wait until the state allows sending.
    ///
    /// Returns immediately when `Open`, waits while `Connecting`, and fails
    /// with [`TetherError::ConnectionNotOpen`] in any other state.
    pub async fn wait_open(&self) -> Result<()> {
        let mut rx = self.tx.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            match state {
                ConnectionState::Open => return Ok(()),
                ConnectionState::Connecting => {
                    if rx.changed().await.is_err() {
                        return Err(TetherError::ConnectionClosed);
                    }
                }
                ConnectionState::Closing | ConnectionState::Closed => {
                    return Err(TetherError::ConnectionNotOpen { state });
                }
            }
        }
    }
}

impl Default for StateLatch {
    fn default() -> Self {
        Self::new(ConnectionState::Connecting)
    }
}
