//! Client-side connection: issues calls, exchanges events, and follows the
//! transport through open, close and reconnect.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use tether_core::{
    CallId, Codec, CodecError, CodecKind, ConnectionState, Control, Decoded, Envelope,
    EventMessage, Frame, FunctionCall, PING_FUNCTION, Result, Side, TetherError,
};

use crate::correlator::Correlator;
use crate::dispatcher::{EventDispatcher, EventHandler, SubscriptionToken};
use crate::latch::StateLatch;
use crate::registry::PING_REPLY;
use crate::stubs::FunctionSet;
use crate::transport::{CloseInfo, FrameSink, TransportError, TransportEvent};
use crate::validation::Validators;

/// Default timeout for [`Connection::call`].
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_millis(15_000);
/// Default timeout for [`Connection::ping`].
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Callback run on every transport open.
pub type OpenCallback = Arc<dyn Fn() + Send + Sync>;
/// Callback run on every transport close.
pub type CloseCallback = Arc<dyn Fn(&CloseInfo) + Send + Sync>;
/// Callback run on transport errors.
pub type ErrorCallback = Arc<dyn Fn(&TransportError) + Send + Sync>;

#[derive(Default)]
struct Callbacks {
    open: Vec<OpenCallback>,
    close: Vec<CloseCallback>,
    error: Vec<ErrorCallback>,
}

/// Configures and attaches a [`Connection`].
pub struct ConnectionBuilder {
    codec: Arc<dyn Codec>,
    validators: Validators,
    call_timeout: Duration,
    ping_timeout: Duration,
}

impl std::fmt::Debug for ConnectionBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionBuilder")
            .field("call_timeout", &self.call_timeout)
            .field("ping_timeout", &self.ping_timeout)
            .finish_non_exhaustive()
    }
}

impl Default for ConnectionBuilder {
    fn default() -> Self {
        Self {
            codec: CodecKind::default().build(),
            validators: Validators::new(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            ping_timeout: DEFAULT_PING_TIMEOUT,
        }
    }
}

impl ConnectionBuilder {
    /// Builder with the JSON codec and default timeouts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Select a built-in codec.
    #[must_use]
    pub fn codec(mut self, kind: CodecKind) -> Self {
        self.codec = kind.build();
        self
    }

    /// Install a custom codec.
    #[must_use]
    pub fn custom_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    /// Default timeout for calls.
    #[must_use]
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Default timeout for the liveness probe.
    #[must_use]
    pub fn ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    /// Register a validator for outbound calls to `function`.
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

    /// Enable or disable every registered validator.
    #[must_use]
    pub fn validation(mut self, enabled: bool) -> Self {
        self.validators.set_enabled(enabled);
        self
    }

    /// Replace the validator set wholesale.
    #[must_use]
    pub fn validators(mut self, validators: Validators) -> Self {
        self.validators = validators;
        self
    }

    /// Start following a transport's events.
    ///
    /// Spawns the task that drives the connection; must be called inside a
    /// Tokio runtime.
    pub fn attach(self, events: mpsc::Receiver<TransportEvent>) -> Connection {
        let inner = Arc::new(Inner {
            codec: self.codec,
            validators: self.validators,
            call_timeout: self.call_timeout,
            ping_timeout: self.ping_timeout,
            state: StateLatch::new(ConnectionState::Connecting),
            sink: Mutex::new(None),
            correlator: Correlator::new(),
            events: EventDispatcher::new(),
            callbacks: Mutex::new(Callbacks::default()),
            shutdown: CancellationToken::new(),
        });
        drop(tokio::spawn(drive(inner.clone(), events)));
        Connection { inner }
    }
}

struct Inner {
    codec: Arc<dyn Codec>,
    validators: Validators,
    call_timeout: Duration,
    ping_timeout: Duration,
    state: StateLatch,
    sink: Mutex<Option<Arc<dyn FrameSink>>>,
    correlator: Correlator,
    events: EventDispatcher,
    callbacks: Mutex<Callbacks>,
    shutdown: CancellationToken,
}

async fn drive(inner: Arc<Inner>, mut events: mpsc::Receiver<TransportEvent>) {
    loop {
        let event = tokio::select! {
            () = inner.shutdown.cancelled() => break,
            event = events.recv() => event,
        };
        let Some(event) = event else {
            break;
        };
        match event {
            TransportEvent::Open(sink) => inner.handle_open(sink),
            TransportEvent::Message(frame) => inner.handle_frame(&frame),
            TransportEvent::Error(err) => inner.handle_error(&err),
            TransportEvent::Closed(info) => inner.handle_closed(&info),
        }
    }
    inner.finish();
}

impl Inner {
    fn handle_open(&self, sink: Arc<dyn FrameSink>) {
        if self.shutdown.is_cancelled() {
            sink.close();
            return;
        }
        if let Some(stale) = self.sink.lock().replace(sink) {
            stale.close();
        }
        let previous = self.state.set(ConnectionState::Open);
        info!(previous = %previous, "connection open");
        let callbacks = self.callbacks.lock().open.clone();
        for callback in callbacks {
            callback();
        }
    }

    fn handle_frame(&self, frame: &Frame) {
        match self.codec.decode(frame, Side::Client) {
            Ok(Decoded::Control(Control::Ping)) => {
                if let Err(e) = self.send_frame(Frame::pong()) {
                    debug!(error = %e, "failed to answer ping");
                }
            }
            Ok(Decoded::Control(Control::Pong)) => trace!("pong received"),
            Ok(Decoded::Envelope(envelope)) => self.route(envelope),
            Ok(Decoded::Ignored(reason)) => debug!(reason, len = frame.len(), "ignoring frame"),
            Err(e) => warn!(error = %e, len = frame.len(), "dropping undecodable frame"),
        }
    }

    fn route(&self, envelope: Envelope) {
        match envelope {
            Envelope::Result(result) => {
                let _ = self.correlator.resolve(result);
            }
            Envelope::Error(error) => {
                let _ = self.correlator.reject(error);
            }
            Envelope::Event(EventMessage { event, data }) => {
                if let Err(e) = self.validators.check_event(&event, &data) {
                    warn!(event, error = %e, "inbound event failed validation, dropping");
                    return;
                }
                let _ = self.events.dispatch(&event, &data);
            }
            Envelope::Call(call) => {
                debug!(function = %call.function, "client does not serve calls, ignoring");
            }
        }
    }

    fn handle_error(&self, err: &TransportError) {
        let callbacks = self.callbacks.lock().error.clone();
        if callbacks.is_empty() {
            warn!(error = %err, "transport error");
        }
        for callback in callbacks {
            callback(err);
        }
    }

    fn handle_closed(&self, info: &CloseInfo) {
        let _ = self.sink.lock().take();
        if self.shutdown.is_cancelled() {
            return;
        }
        let _ = self.state.set(ConnectionState::Closed);
        let rejected = self.correlator.reject_all(|| TetherError::ConnectionClosed);
        let callbacks = self.callbacks.lock().close.clone();
        if callbacks.is_empty() {
            warn!(
                code = ?info.code,
                reason = %info.reason,
                reconnecting = info.reconnecting,
                rejected,
                "connection closed"
            );
        }
        for callback in callbacks {
            callback(info);
        }
    }

    fn finish(&self) {
        if let Some(sink) = self.sink.lock().take() {
            sink.close();
        }
        if self.state.set(ConnectionState::Closed) != ConnectionState::Closed {
            let rejected = self.correlator.reject_all(|| TetherError::ConnectionClosed);
            debug!(rejected, "transport ended");
        }
    }

    fn send_frame(&self, frame: Frame) -> Result<()> {
        let sink = self.sink.lock().clone();
        let Some(sink) = sink else {
            return Err(TetherError::ConnectionNotOpen {
                state: self.state.get(),
            });
        };
        sink.send(frame).map_err(|e| match e {
            TransportError::Closed => TetherError::ConnectionNotOpen {
                state: ConnectionState::Closed,
            },
            other => TetherError::Unknown {
                message: other.to_string(),
            },
        })
    }

    async fn wait_open_within(&self, timeout: Duration) -> Result<()> {
        match tokio::time::timeout(timeout, self.state.wait_open()).await {
            Ok(outcome) => outcome,
            Err(_elapsed) => Err(TetherError::ConnectionNotOpen {
                state: self.state.get(),
            }),
        }
    }
}

/// A client session over one logical transport.
///
/// Cloning is cheap; clones share the same session.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

impl Connection {
    /// Start configuring a connection.
    pub fn builder() -> ConnectionBuilder {
        ConnectionBuilder::new()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.inner.state.get()
    }

    /// Watch lifecycle transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Whether the connection is closing or closed.
    pub fn is_closed(&self) -> bool {
        self.state().is_closed()
    }

    /// Wait for the transport to open.
    ///
    /// Fails with [`TetherError::ConnectionNotOpen`] if the connection closes
    /// first, for example on a failed initial handshake.
    pub async fn connected(&self) -> Result<()> {
        self.inner.state.wait_open().await
    }

    /// Codec in use.
    pub fn codec_kind(&self) -> CodecKind {
        self.inner.codec.kind()
    }

    /// Call `function` with the default timeout.
    pub async fn call(&self, function: &str, data: Value) -> Result<Value> {
        self.call_with_timeout(function, data, self.inner.call_timeout)
            .await
    }

    /// Call `function`, failing with [`TetherError::Timeout`] after `timeout`.
    ///
    /// The timeout also bounds any wait for the initial open. Validation runs
    /// before anything is sent.
    #[instrument(skip_all, fields(function))]
    pub async fn call_with_timeout(
        &self,
        function: &str,
        data: Value,
        timeout: Duration,
    ) -> Result<Value> {
        let _ = tracing::Span::current().record("function", function);
        let inner = &self.inner;
        inner.validators.check_function(function, &data)?;

        let call_id = CallId::new();
        let frame = inner.codec.encode(&Envelope::Call(FunctionCall {
            function: function.to_owned(),
            call_id: call_id.clone(),
            data,
        }))?;

        let exchange = async {
            inner.state.wait_open().await?;
            let pending = inner.correlator.register(call_id.clone(), function);
            inner.send_frame(frame)?;
            pending.settled().await
        };

        if let Ok(outcome) = tokio::time::timeout(timeout, exchange).await {
            outcome
        } else {
            let _ = inner.correlator.forget(&call_id);
            debug!(call_id = %call_id, ?timeout, "call timed out");
            Err(TetherError::Timeout {
                function: function.to_owned(),
                timeout,
            })
        }
    }

    /// Typed call: serializes `request` and deserializes the response.
    pub async fn call_as<Req, Resp>(&self, function: &str, request: &Req) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let data =
            serde_json::to_value(request).map_err(|e| CodecError::Encode(e.to_string()))?;
        let response = self.call(function, data).await?;
        serde_json::from_value(response)
            .map_err(|e| TetherError::Codec(CodecError::Decode(e.to_string())))
    }

    /// Probe the remote with the reserved liveness function.
    ///
    /// Returns the round-trip time.
    pub async fn ping(&self) -> Result<Duration> {
        let started = Instant::now();
        let reply = self
            .call_with_timeout(PING_FUNCTION, Value::Null, self.inner.ping_timeout)
            .await?;
        if reply != Value::String(PING_REPLY.to_owned()) {
            return Err(TetherError::Unknown {
                message: format!("unexpected ping reply: {reply}"),
            });
        }
        Ok(started.elapsed())
    }

    /// Send an event to the remote.
    ///
    /// Waits for the initial open (bounded by the call timeout) and fails
    /// immediately once closed.
    pub async fn send_event(&self, event: &str, data: Value) -> Result<()> {
        let inner = &self.inner;
        inner.validators.check_event(event, &data)?;
        let frame = inner.codec.encode(&Envelope::Event(EventMessage {
            event: event.to_owned(),
            data,
        }))?;
        inner.wait_open_within(inner.call_timeout).await?;
        inner.send_frame(frame)
    }

    /// Event subscriptions for this connection.
    pub fn events(&self) -> &EventDispatcher {
        &self.inner.events
    }

    /// Subscribe to `event` persistently.
    pub fn on<F>(&self, event: &str, handler: F) -> SubscriptionToken
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner.events.on(event, handler)
    }

    /// Subscribe to the next `event` only.
    pub fn once<F>(&self, event: &str, handler: F) -> SubscriptionToken
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner.events.once(event, handler)
    }

    /// Resolve with the payload of the next `event`.
    pub fn one(&self, event: &str) -> impl Future<Output = Option<Value>> + Send + 'static {
        self.inner.events.one(event)
    }

    /// Remove every subscription for `event`.
    pub fn off(&self, event: &str) -> usize {
        self.inner.events.off(event)
    }

    /// Remove the subscriptions for `event` using `handler`.
    pub fn off_handler(&self, event: &str, handler: &EventHandler) -> usize {
        self.inner.events.off_handler(event, handler)
    }

    /// Run `callback` on every transport open, including reconnects.
    pub fn on_open<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.callbacks.lock().open.push(Arc::new(callback));
    }

    /// Run `callback` whenever the transport closes.
    pub fn on_close<F>(&self, callback: F)
    where
        F: Fn(&CloseInfo) + Send + Sync + 'static,
    {
        self.inner.callbacks.lock().close.push(Arc::new(callback));
    }

    /// Run `callback` on transport errors instead of logging them.
    pub fn on_error<F>(&self, callback: F)
    where
        F: Fn(&TransportError) + Send + Sync + 'static,
    {
        self.inner.callbacks.lock().error.push(Arc::new(callback));
    }

    /// Build callable stubs for a known set of remote functions.
    pub fn stubs<I, S>(&self, functions: I) -> Result<FunctionSet>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FunctionSet::new(self, functions)
    }

    /// Calls awaiting a response.
    pub fn pending_calls(&self) -> usize {
        self.inner.correlator.len()
    }

    /// Token cancelled by [`Connection::close`]; connectors stop reconnecting
    /// when it fires.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Close the connection. Idempotent.
    ///
    /// Outstanding calls fail with [`TetherError::ConnectionClosed`].
    pub fn close(&self) {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return;
        }
        let _ = inner.state.set(ConnectionState::Closing);
        inner.shutdown.cancel();
        let rejected = inner.correlator.reject_all(|| TetherError::ConnectionClosed);
        if let Some(sink) = inner.sink.lock().take() {
            sink.close();
        }
        let _ = inner.state.set(ConnectionState::Closed);
        info!(rejected, "connection closed");

        let callbacks = inner.callbacks.lock().close.clone();
        let info = CloseInfo {
            code: Some(1000),
            reason: "closed locally".to_owned(),
            reconnecting: false,
        };
        for callback in callbacks {
            callback(&info);
        }
    }
}
