//! `TetherServer`: axum websocket listener serving registered functions to
//! every connected peer.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use tether_core::{
    CallId, Codec, ConnectionState, Envelope, EventMessage, PeerId, Result, TetherError,
};
use tether_rpc::{
    EventDispatcher, EventHandler, FunctionHandler, FunctionRegistry, SubscriptionToken,
    Validators,
};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::listen::{BoundAddr, BoundListener, ListenTarget};
use crate::metrics::WS_CONNECTIONS_REJECTED_TOTAL;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::peer::{PeerHandle, ProbeOutcome};
use crate::websocket::peers::PeerSet;
use crate::websocket::session::run_peer_session;

/// Callback run when a peer connects or disconnects.
pub type PeerCallback = Arc<dyn Fn(&PeerHandle) + Send + Sync>;

/// Connection lifecycle callbacks.
#[derive(Default)]
pub struct PeerHooks {
    connect: Mutex<Vec<PeerCallback>>,
    disconnect: Mutex<Vec<PeerCallback>>,
}

impl PeerHooks {
    pub(crate) fn fire_connect(&self, peer: &PeerHandle) {
        let callbacks = self.connect.lock().clone();
        for callback in callbacks {
            callback(peer);
        }
    }

    pub(crate) fn fire_disconnect(&self, peer: &PeerHandle) {
        let callbacks = self.disconnect.lock().clone();
        for callback in callbacks {
            callback(peer);
        }
    }
}

/// Shared state accessible from axum handlers and peer sessions.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Wire codec shared by every peer.
    pub codec: Arc<dyn Codec>,
    /// Registered functions.
    pub registry: Arc<FunctionRegistry>,
    /// Payload validators.
    pub validators: Arc<Validators>,
    /// Connected peers.
    pub peers: Arc<PeerSet>,
    /// Subscriptions for events from any peer.
    pub events: EventDispatcher,
    /// Connect and disconnect callbacks.
    pub hooks: Arc<PeerHooks>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle backing `/metrics`.
    pub metrics: Option<PrometheusHandle>,
}

/// Result of a server-wide liveness probe.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PingReport {
    /// Peers that answered `"pong"`.
    pub answered: Vec<PeerId>,
    /// Peers still connected that did not answer in time.
    pub missing: Vec<PeerId>,
}

impl PingReport {
    /// Whether every peer that stayed connected answered.
    pub fn all_answered(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Configures a [`TetherServer`].
pub struct ServerBuilder {
    config: ServerConfig,
    codec: Option<Arc<dyn Codec>>,
    registry: FunctionRegistry,
    validators: Validators,
    metrics: Option<PrometheusHandle>,
}

impl std::fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ServerBuilder {
    /// Builder for `config` with no functions registered.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            codec: None,
            registry: FunctionRegistry::new(),
            validators: Validators::new(),
            metrics: None,
        }
    }

    /// Register a function handler. Duplicate names are a build error.
    pub fn register(mut self, function: &str, handler: impl FunctionHandler + 'static) -> Result<Self> {
        self.registry.register(function, handler)?;
        Ok(self)
    }

    /// Use a prepared registry, replacing any registered functions.
    #[must_use]
    pub fn registry(mut self, registry: FunctionRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Register a validator for inbound calls to `function`.
    pub fn validate_function<F>(mut self, function: &str, check: F) -> Result<Self>
    where
        F: Fn(&Value) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.validators.add_function(function, check)?;
        Ok(self)
    }

    /// Register a validator for `event` payloads in both directions.
    pub fn validate_event<F>(mut self, event: &str, check: F) -> Result<Self>
    where
        F: Fn(&Value) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.validators.add_event(event, check)?;
        Ok(self)
    }

    /// Replace the validator set wholesale.
    #[must_use]
    pub fn validators(mut self, validators: Validators) -> Self {
        self.validators = validators;
        self
    }

    /// Enable or disable every registered validator.
    #[must_use]
    pub fn validation(mut self, enabled: bool) -> Self {
        self.validators.set_enabled(enabled);
        self
    }

    /// Install a custom codec instead of the configured one.
    #[must_use]
    pub fn custom_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Serve `/metrics` from this recorder handle.
    #[must_use]
    pub fn metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Finish configuration.
    pub fn build(self) -> Result<TetherServer> {
        let path = &self.config.path;
        if !path.starts_with('/') || path == "/health" || path == "/metrics" {
            return Err(TetherError::Build(format!("unusable websocket path '{path}'")));
        }
        if self.config.max_connections == 0 {
            return Err(TetherError::Build("max_connections must be at least 1".into()));
        }
        if self.config.heartbeat_interval.is_zero() {
            return Err(TetherError::Build("heartbeat_interval must be non-zero".into()));
        }
        if self.config.heartbeat_timeout <= self.config.heartbeat_interval {
            return Err(TetherError::Build(format!(
                "heartbeat_timeout ({:?}) must exceed heartbeat_interval ({:?})",
                self.config.heartbeat_timeout, self.config.heartbeat_interval
            )));
        }
        let codec = self.codec.unwrap_or_else(|| self.config.codec.build());
        let state = AppState {
            config: Arc::new(self.config),
            codec,
            registry: Arc::new(self.registry),
            validators: Arc::new(self.validators),
            peers: Arc::new(PeerSet::new()),
            events: EventDispatcher::new(),
            hooks: Arc::new(PeerHooks::default()),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics: self.metrics,
        };
        Ok(TetherServer { state })
    }
}

/// The listening side of the protocol.
pub struct TetherServer {
    state: AppState,
}

impl std::fmt::Debug for TetherServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TetherServer").finish_non_exhaustive()
    }
}

impl TetherServer {
    /// Start configuring a server.
    pub fn builder(config: ServerConfig) -> ServerBuilder {
        ServerBuilder::new(config)
    }

    /// Build the axum router: the websocket route, `/health`, `/metrics`.
    ///
    /// Host applications may merge this into their own router instead of
    /// calling [`TetherServer::listen`].
    pub fn router(&self) -> Router {
        Router::new()
            .route(&self.state.config.path, get(ws_upgrade))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(self.state.clone())
    }

    /// Bind `target` and serve until [`TetherServer::close`].
    pub async fn listen(&self, target: ListenTarget) -> Result<(BoundAddr, JoinHandle<()>)> {
        if self.is_closed() {
            return Err(TetherError::ConnectionNotOpen {
                state: ConnectionState::Closed,
            });
        }
        let (listener, addr) = target.bind(&self.state.config.host).await?;
        let router = self.router();
        let token = self.state.shutdown.token();
        let handle = match listener {
            BoundListener::Tcp(listener) => tokio::spawn(async move {
                let shutdown = async move { token.cancelled().await };
                if let Err(e) = axum::serve(listener, router)
                    .with_graceful_shutdown(shutdown)
                    .await
                {
                    error!(error = %e, "listener failed");
                }
            }),
            #[cfg(unix)]
            BoundListener::Unix(listener, path) => tokio::spawn(async move {
                let shutdown = async move { token.cancelled().await };
                if let Err(e) = axum::serve(listener, router)
                    .with_graceful_shutdown(shutdown)
                    .await
                {
                    error!(error = %e, "listener failed");
                }
                let _ = std::fs::remove_file(&path);
            }),
        };
        info!(%addr, path = %self.state.config.path, "tether server listening");
        Ok((addr, handle))
    }

    /// Send an event to every connected peer.
    ///
    /// Validates and encodes once. A failed send to one peer is logged and
    /// skipped. Returns the number of peers the event was queued for.
    pub async fn send_event(&self, event: &str, data: Value) -> Result<usize> {
        self.state.validators.check_event(event, &data)?;
        let frame = self.state.codec.encode(&Envelope::Event(EventMessage {
            event: event.to_owned(),
            data,
        }))?;
        Ok(self.state.peers.broadcast(&frame).await)
    }

    /// Send an event to one peer.
    pub async fn send_event_to(&self, peer_id: &PeerId, event: &str, data: Value) -> Result<()> {
        let Some(peer) = self.state.peers.get(peer_id).await else {
            return Err(TetherError::ConnectionNotOpen {
                state: ConnectionState::Closed,
            });
        };
        peer.send_event(event, data)
    }

    /// Probe every connected peer with `"ping"`.
    ///
    /// Resolves once each peer has answered, disconnected, or `timeout` has
    /// elapsed. Peers that disconnect mid-probe appear in neither list.
    pub async fn ping(&self, timeout: Duration) -> PingReport {
        let peers = self.state.peers.snapshot().await;
        let probes = peers.into_iter().map(|peer| async move {
            let outcome = peer.probe(timeout).await;
            (peer.id().clone(), outcome)
        });
        let mut report = PingReport::default();
        for (id, outcome) in futures::future::join_all(probes).await {
            match outcome {
                ProbeOutcome::Answered => report.answered.push(id),
                ProbeOutcome::TimedOut => report.missing.push(id),
                ProbeOutcome::Disconnected => {}
            }
        }
        report
    }

    /// Invoke a registered function directly, without the wire.
    ///
    /// Follows the same contract as a remote call: validation first, errors
    /// mapped as the caller would see them, [`TetherError::Timeout`] after
    /// `timeout`.
    pub async fn call_local(&self, function: &str, data: Value, timeout: Duration) -> Result<Value> {
        self.state.validators.check_function(function, &data)?;
        match tokio::time::timeout(timeout, self.state.registry.invoke(function, data)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(TetherError::from_remote(
                function,
                err.to_function_error(CallId::new()),
            )),
            Err(_elapsed) => Err(TetherError::Timeout {
                function: function.to_owned(),
                timeout,
            }),
        }
    }

    /// Subscriptions for events from any peer.
    pub fn events(&self) -> &EventDispatcher {
        &self.state.events
    }

    /// Subscribe to `event` from any peer.
    pub fn on<F>(&self, event: &str, handler: F) -> SubscriptionToken
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.state.events.on(event, handler)
    }

    /// Subscribe to the next `event` from any peer.
    pub fn once<F>(&self, event: &str, handler: F) -> SubscriptionToken
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.state.events.once(event, handler)
    }

    /// Resolve with the payload of the next `event` from any peer.
    pub fn one(&self, event: &str) -> impl Future<Output = Option<Value>> + Send + 'static {
        self.state.events.one(event)
    }

    /// Remove every server-wide subscription for `event`.
    pub fn off(&self, event: &str) -> usize {
        self.state.events.off(event)
    }

    /// Remove the server-wide subscriptions for `event` using `handler`.
    pub fn off_handler(&self, event: &str, handler: &EventHandler) -> usize {
        self.state.events.off_handler(event, handler)
    }

    /// Run `callback` for every newly connected peer.
    pub fn on_connection<F>(&self, callback: F)
    where
        F: Fn(&PeerHandle) + Send + Sync + 'static,
    {
        self.state.hooks.connect.lock().push(Arc::new(callback));
    }

    /// Run `callback` whenever a peer disconnects.
    pub fn on_disconnect<F>(&self, callback: F)
    where
        F: Fn(&PeerHandle) + Send + Sync + 'static,
    {
        self.state.hooks.disconnect.lock().push(Arc::new(callback));
    }

    /// Look up a connected peer.
    pub async fn peer(&self, id: &PeerId) -> Option<PeerHandle> {
        self.state.peers.get(id).await
    }

    /// Snapshot of connected peers.
    pub async fn peers(&self) -> Vec<PeerHandle> {
        self.state.peers.snapshot().await
    }

    /// Number of connected peers.
    pub async fn connection_count(&self) -> usize {
        self.state.peers.len().await
    }

    /// Stop listening and close every peer. Idempotent.
    pub async fn close(&self) {
        if self.state.shutdown.is_shutting_down() {
            return;
        }
        self.state.shutdown.shutdown();
        let closed = self.state.peers.close_all().await;
        info!(peers = closed, "tether server closed");
    }

    /// Whether [`TetherServer::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.state.shutdown.is_shutting_down()
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    /// Registered functions.
    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.state.registry
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    pub(crate) fn state(&self) -> &AppState {
        &self.state
    }
}

/// GET <path>: websocket upgrade, refused with 503 at capacity or during
/// shutdown.
async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if state.shutdown.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }
    let Some(slot) = state.peers.try_reserve(state.config.max_connections) else {
        counter!(WS_CONNECTIONS_REJECTED_TOTAL).increment(1);
        warn!(max = state.config.max_connections, "connection limit reached, refusing upgrade");
        return (StatusCode::SERVICE_UNAVAILABLE, "too many connections").into_response();
    };
    let peer_id = PeerId::new();
    ws.max_message_size(state.config.max_message_size)
        .on_failed_upgrade(|e| warn!(error = %e, "websocket upgrade failed"))
        .on_upgrade(move |socket| run_peer_session(socket, peer_id, state, slot))
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.peers.len().await;
    Json(health::health_check(
        state.start_time,
        connections,
        state.shutdown.is_shutting_down(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics not enabled").into_response(),
    }
}
