//! Connection lifecycle states.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a connection or peer.
///
/// `Connecting → Open → Closing → Closed`, plus `Open → Closed` on abrupt
/// transport loss and `Connecting → Closed` on a failed handshake. A
/// reconnecting transport may move a connection from `Closed` back to `Open`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Waiting for the first transport open.
    Connecting,
    /// Transport is open; calls and events flow.
    Open,
    /// Close requested, transport shutting down.
    Closing,
    /// Transport gone.
    Closed,
}

impl ConnectionState {
    /// Whether operations may be sent right now.
    pub fn is_open(self) -> bool {
        self == Self::Open
    }

    /// Whether the connection has reached `Closing` or `Closed`.
    pub fn is_closed(self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }

    /// Lowercase label used in logs and error messages.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
