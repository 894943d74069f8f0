//! Transport-level frames and the plain-text liveness control literals.

use bytes::Bytes;

/// Literal text sent to probe a peer.
pub const PING_TEXT: &str = "ping";
/// Literal text a peer answers a probe with.
pub const PONG_TEXT: &str = "pong";

/// One discrete message handed to or received from a transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Bytes),
}

/// Plain-text control messages that live outside the envelope protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Control {
    /// Liveness probe.
    Ping,
    /// Liveness answer.
    Pong,
}

impl Frame {
    /// The `"ping"` control frame.
    pub fn ping() -> Self {
        Self::Text(PING_TEXT.to_owned())
    }

    /// The `"pong"` control frame.
    pub fn pong() -> Self {
        Self::Text(PONG_TEXT.to_owned())
    }

    /// Classify this frame as a control literal, if it is one.
    pub fn control(&self) -> Option<Control> {
        match self {
            Self::Text(t) if t == PING_TEXT => Some(Control::Ping),
            Self::Text(t) if t == PONG_TEXT => Some(Control::Pong),
            _ => None,
        }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(t) => t.len(),
            Self::Binary(b) => b.len(),
        }
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw payload bytes regardless of frame kind.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(t) => t.as_bytes(),
            Self::Binary(b) => b,
        }
    }
}

impl From<Control> for Frame {
    fn from(control: Control) -> Self {
        match control {
            Control::Ping => Self::ping(),
            Control::Pong => Self::pong(),
        }
    }
}
