use serde::{Deserialize, Serialize};

/// Listener settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Route serving the websocket upgrade.
    pub path: String,
    /// Upgrades beyond this many live peers are refused.
    pub max_connections: usize,
    /// Interval between websocket ping frames.
    pub heartbeat_interval_ms: u64,
    /// Peers silent for longer than this are dropped.
    pub heartbeat_timeout_ms: u64,
    /// Per-peer outbound queue capacity.
    pub outbound_queue: usize,
    /// Largest accepted inbound message.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8090,
            path: "/ws".to_string(),
            max_connections: 256,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 90_000,
            outbound_queue: 1024,
            max_message_size: 16 * 1024 * 1024,
        }
    }
}
