//! Settings type definitions.
//!
//! All types use camelCase JSON keys and `#[serde(default)]`, so a settings
//! file only needs the keys it changes.

mod client;
mod protocol;
mod server;

pub use client::*;
pub use protocol::*;
pub use server::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings for tether endpoints.
///
/// ```json
/// {
///   "protocol": { "codec": "cbor", "callTimeoutMs": 5000 },
///   "server": { "port": 9000 }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TetherSettings {
    /// Envelope and call settings shared by both sides.
    pub protocol: ProtocolSettings,
    /// Listener settings.
    pub server: ServerSettings,
    /// Connector settings.
    pub client: ClientSettings,
    /// Log output settings.
    pub logging: LoggingSettings,
}

impl TetherSettings {
    /// Reject values that parse but cannot work together.
    pub fn validate(&self) -> Result<()> {
        if self.protocol.call_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "protocol.callTimeoutMs must be non-zero".into(),
            ));
        }
        if self.server.max_connections == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxConnections must be non-zero".into(),
            ));
        }
        if self.server.heartbeat_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "server.heartbeatIntervalMs must be non-zero".into(),
            ));
        }
        if self.server.heartbeat_timeout_ms <= self.server.heartbeat_interval_ms {
            return Err(SettingsError::InvalidValue(format!(
                "server.heartbeatTimeoutMs ({}) must exceed server.heartbeatIntervalMs ({})",
                self.server.heartbeat_timeout_ms, self.server.heartbeat_interval_ms
            )));
        }
        if !self.server.path.starts_with('/') {
            return Err(SettingsError::InvalidValue(format!(
                "server.path must start with '/': {}",
                self.server.path
            )));
        }
        let reconnect = &self.client.reconnect;
        if reconnect.initial_delay_ms > reconnect.max_delay_ms {
            return Err(SettingsError::InvalidValue(
                "client.reconnect.initialDelayMs exceeds maxDelayMs".into(),
            ));
        }
        Ok(())
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
