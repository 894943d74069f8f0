//! Client construction.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;

use tether_core::{Codec, CodecKind, Result, TetherError};
use tether_rpc::{Connection, ConnectionBuilder, Validators};
use tether_settings::TetherSettings;

use crate::connector::{Connector, TungsteniteConnector};
use crate::reconnect::ReconnectPolicy;
use crate::target::ConnectTarget;
use crate::transport::TransportTask;

/// How long [`ClientBuilder::connect`] waits for the first open.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const EVENT_BUFFER: usize = 256;

/// Configures and starts a client [`Connection`].
pub struct ClientBuilder {
    target: ConnectTarget,
    connection: ConnectionBuilder,
    connector: Arc<dyn Connector>,
    reconnect: ReconnectPolicy,
    outbound_queue: usize,
    connect_timeout: Duration,
}

impl ClientBuilder {
    /// Builder for `target` with default timeouts and reconnect policy.
    pub fn new(target: ConnectTarget) -> Self {
        Self {
            target,
            connection: ConnectionBuilder::new(),
            connector: Arc::new(TungsteniteConnector),
            reconnect: ReconnectPolicy::default(),
            outbound_queue: 1024,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Builder taking target, codec, timeouts and reconnect from settings.
    pub fn from_settings(settings: &TetherSettings) -> Result<Self> {
        let target = settings.client.url.parse()?;
        Ok(Self::new(target)
            .codec(settings.protocol.codec)
            .call_timeout(settings.protocol.call_timeout())
            .ping_timeout(settings.protocol.ping_timeout())
            .reconnect(ReconnectPolicy::from(&settings.client.reconnect))
            .outbound_queue(settings.client.outbound_queue))
    }

    /// Replace the target.
    #[must_use]
    pub fn target(mut self, target: ConnectTarget) -> Self {
        self.target = target;
        self
    }

    /// Inject a connector.
    #[must_use]
    pub fn connector(mut self, connector: impl Connector) -> Self {
        self.connector = Arc::new(connector);
        self
    }

    /// Reconnect policy.
    #[must_use]
    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Outbound queue capacity per socket.
    #[must_use]
    pub fn outbound_queue(mut self, capacity: usize) -> Self {
        self.outbound_queue = capacity;
        self
    }

    /// Bound on the first open in [`ClientBuilder::connect`].
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Select a built-in codec.
    #[must_use]
    pub fn codec(mut self, kind: CodecKind) -> Self {
        self.connection = self.connection.codec(kind);
        self
    }

    /// Install a custom codec.
    #[must_use]
    pub fn custom_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.connection = self.connection.custom_codec(codec);
        self
    }

    /// Default call timeout.
    #[must_use]
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.connection = self.connection.call_timeout(timeout);
        self
    }

    /// Default `__ping` timeout.
    #[must_use]
    pub fn ping_timeout(mut self, timeout: Duration) -> Self {
        self.connection = self.connection.ping_timeout(timeout);
        self
    }

    /// Validate outbound calls to `function`.
    pub fn validate_function<F>(mut self, function: &str, check: F) -> Result<Self>
    where
        F: Fn(&Value) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.connection = self.connection.validate_function(function, check)?;
        Ok(self)
    }

    /// Validate `event` payloads in both directions.
    pub fn validate_event<F>(mut self, event: &str, check: F) -> Result<Self>
    where
        F: Fn(&Value) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.connection = self.connection.validate_event(event, check)?;
        Ok(self)
    }

    /// Replace the validator set.
    #[must_use]
    pub fn validators(mut self, validators: Validators) -> Self {
        self.connection = self.connection.validators(validators);
        self
    }

    /// Enable or disable validation.
    #[must_use]
    pub fn validation(mut self, enabled: bool) -> Self {
        self.connection = self.connection.validation(enabled);
        self
    }

    /// Start connecting in the background and return immediately.
    ///
    /// The connection starts `Connecting`; calls made now wait for the first
    /// open. Must be called inside a Tokio runtime.
    pub fn start(self) -> Connection {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let connection = self.connection.attach(rx);
        let task = TransportTask {
            connector: self.connector,
            target: self.target,
            policy: self.reconnect,
            outbound_queue: self.outbound_queue,
            events: tx,
            shutdown: connection.shutdown_token(),
        };
        drop(tokio::spawn(task.run()));
        connection
    }

    /// Start and wait for the first open.
    ///
    /// A failed initial handshake or an elapsed connect timeout closes the
    /// connection and returns [`TetherError::ConnectionNotOpen`].
    pub async fn connect(self) -> Result<Connection> {
        let timeout = self.connect_timeout;
        let target = self.target.to_string();
        let connection = self.start();
        let outcome = match tokio::time::timeout(timeout, connection.connected()).await {
            Ok(outcome) => outcome,
            Err(_elapsed) => Err(TetherError::ConnectionNotOpen {
                state: connection.state(),
            }),
        };
        if let Err(e) = outcome {
            warn!(%target, error = %e, "initial connect failed");
            connection.close();
            return Err(e);
        }
        Ok(connection)
    }
}
