use serde::{Deserialize, Serialize};

/// Connector settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Websocket URL to connect to.
    pub url: String,
    /// Outbound queue capacity.
    pub outbound_queue: usize,
    /// Reconnect behavior after the transport drops.
    pub reconnect: ReconnectSettings,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8090/ws".to_string(),
            outbound_queue: 1024,
            reconnect: ReconnectSettings::default(),
        }
    }
}

/// Reconnect backoff settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectSettings {
    /// Whether to reconnect at all.
    pub enabled: bool,
    /// First retry delay; doubled after every failed attempt.
    pub initial_delay_ms: u64,
    /// Backoff ceiling.
    pub max_delay_ms: u64,
    /// Give up after this many consecutive failures. `0` retries forever.
    pub max_attempts: u32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay_ms: 250,
            max_delay_ms: 10_000,
            max_attempts: 0,
        }
    }
}
