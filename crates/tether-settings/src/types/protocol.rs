use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_core::CodecKind;

/// Settings both ends must agree on, plus call timing defaults.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProtocolSettings {
    /// Wire codec. Peers using different codecs cannot talk.
    pub codec: CodecKind,
    /// Default timeout for function calls.
    pub call_timeout_ms: u64,
    /// Default timeout for the `__ping` probe.
    pub ping_timeout_ms: u64,
}

impl ProtocolSettings {
    /// [`Self::call_timeout_ms`] as a `Duration`.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// [`Self::ping_timeout_ms`] as a `Duration`.
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            codec: CodecKind::Json,
            call_timeout_ms: 15_000,
            ping_timeout_ms: 5_000,
        }
    }
}
