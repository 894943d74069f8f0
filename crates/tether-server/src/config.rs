//! Server configuration.

use std::time::Duration;

use tether_core::CodecKind;
use tether_settings::TetherSettings;

/// Configuration for a [`TetherServer`](crate::server::TetherServer).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Route serving the websocket upgrade.
    pub path: String,
    /// Maximum concurrent peers.
    pub max_connections: usize,
    /// Interval between websocket Ping frames.
    pub heartbeat_interval: Duration,
    /// Peers silent for this long are dropped.
    pub heartbeat_timeout: Duration,
    /// Per-peer outbound queue capacity.
    pub outbound_queue: usize,
    /// Max websocket message size in bytes.
    pub max_message_size: usize,
    /// Wire codec.
    pub codec: CodecKind,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            path: "/ws".into(),
            max_connections: 256,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(90),
            outbound_queue: 1024,
            max_message_size: 16 * 1024 * 1024, // 16 MB
            codec: CodecKind::Json,
        }
    }
}

impl ServerConfig {
    /// Build from loaded settings.
    pub fn from_settings(settings: &TetherSettings) -> Self {
        let server = &settings.server;
        Self {
            host: server.host.clone(),
            port: server.port,
            path: server.path.clone(),
            max_connections: server.max_connections,
            heartbeat_interval: Duration::from_millis(server.heartbeat_interval_ms),
            heartbeat_timeout: Duration::from_millis(server.heartbeat_timeout_ms),
            outbound_queue: server.outbound_queue,
            max_message_size: server.max_message_size,
            codec: settings.protocol.codec,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 0);
        assert_eq!(cfg.path, "/ws");
        assert_eq!(cfg.max_message_size, 16 * 1024 * 1024);
        assert_eq!(cfg.codec, CodecKind::Json);
    }

    #[test]
    fn from_default_settings() {
        let cfg = ServerConfig::from_settings(&TetherSettings::default());
        assert_eq!(cfg.port, 8090);
        assert_eq!(cfg.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(cfg.heartbeat_timeout, Duration::from_secs(90));
        assert_eq!(cfg.max_connections, 256);
    }

    #[test]
    fn from_custom_settings() {
        let mut settings = TetherSettings::default();
        settings.server.host = "0.0.0.0".into();
        settings.server.path = "/rpc".into();
        settings.server.heartbeat_interval_ms = 500;
        settings.protocol.codec = CodecKind::Cbor;
        let cfg = ServerConfig::from_settings(&settings);
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.path, "/rpc");
        assert_eq!(cfg.heartbeat_interval, Duration::from_millis(500));
        assert_eq!(cfg.codec, CodecKind::Cbor);
    }
}
