//! One accepted websocket peer.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tracing::debug;

use tether_core::{
    Codec, ConnectionState, Envelope, EventMessage, Frame, PeerId, Result, TetherError,
};
use tether_rpc::{
    ChannelSink, EventDispatcher, EventHandler, FrameSink, StateLatch, SubscriptionToken,
    TransportError, Validators,
};

/// Shared handle to a connected peer.
pub type PeerHandle = Arc<Peer>;

/// How a single liveness probe ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Peer answered `"pong"`.
    Answered,
    /// Peer went away before answering.
    Disconnected,
    /// No answer within the timeout.
    TimedOut,
}

/// Server-side state for one transport.
///
/// Handlers and validators are shared with every other peer of the server;
/// event subscriptions and lifecycle state are this peer's own.
pub struct Peer {
    id: PeerId,
    sink: Arc<ChannelSink>,
    codec: Arc<dyn Codec>,
    validators: Arc<Validators>,
    events: EventDispatcher,
    state: StateLatch,
    connected_at: Instant,
    /// Whether the peer has shown activity since the last heartbeat check.
    is_alive: AtomicBool,
    last_seen: Mutex<Instant>,
    /// Count of `"pong"` control frames received.
    pongs: watch::Sender<u64>,
}

impl Peer {
    /// Create an open peer writing through `sink`.
    pub fn new(
        id: PeerId,
        sink: Arc<ChannelSink>,
        codec: Arc<dyn Codec>,
        validators: Arc<Validators>,
    ) -> Self {
        let now = Instant::now();
        let (pongs, _rx) = watch::channel(0);
        Self {
            id,
            sink,
            codec,
            validators,
            events: EventDispatcher::new(),
            state: StateLatch::new(ConnectionState::Open),
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_seen: Mutex::new(now),
            pongs,
        }
    }

    /// Peer identifier.
    pub fn id(&self) -> &PeerId {
        &self.id
    }

    /// Lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Whether the peer is closing or closed.
    pub fn is_closed(&self) -> bool {
        self.state().is_closed() || self.sink.is_closed()
    }

    /// Queue a raw frame.
    pub fn send_frame(&self, frame: Frame) -> Result<()> {
        if self.state().is_closed() {
            return Err(TetherError::ConnectionNotOpen {
                state: self.state(),
            });
        }
        self.sink.send(frame).map_err(|e| match e {
            TransportError::Closed => TetherError::ConnectionNotOpen {
                state: ConnectionState::Closed,
            },
            other => TetherError::Unknown {
                message: other.to_string(),
            },
        })
    }

    /// Send an event to this peer only.
    pub fn send_event(&self, event: &str, data: Value) -> Result<()> {
        self.validators.check_event(event, &data)?;
        let frame = self.codec.encode(&Envelope::Event(EventMessage {
            event: event.to_owned(),
            data,
        }))?;
        self.send_frame(frame)
    }

    /// Encode and queue an envelope.
    pub(crate) fn send_envelope(&self, envelope: &Envelope) -> Result<()> {
        let frame = self.codec.encode(envelope)?;
        self.send_frame(frame)
    }

    /// Event subscriptions for events sent by this peer.
    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }

    /// Subscribe to `event` from this peer.
    pub fn on<F>(&self, event: &str, handler: F) -> SubscriptionToken
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.events.on(event, handler)
    }

    /// Subscribe to the next `event` from this peer.
    pub fn once<F>(&self, event: &str, handler: F) -> SubscriptionToken
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.events.once(event, handler)
    }

    /// Resolve with the payload of the next `event` from this peer.
    pub fn one(&self, event: &str) -> impl Future<Output = Option<Value>> + Send + 'static {
        self.events.one(event)
    }

    /// Remove every subscription for `event`.
    pub fn off(&self, event: &str) -> usize {
        self.events.off(event)
    }

    /// Remove the subscriptions for `event` using `handler`.
    pub fn off_handler(&self, event: &str, handler: &EventHandler) -> usize {
        self.events.off_handler(event, handler)
    }

    /// Close the peer's transport. Idempotent.
    pub fn close(&self) {
        if self.state.set(ConnectionState::Closing).is_closed() {
            let _ = self.state.set(ConnectionState::Closed);
            return;
        }
        self.sink.close();
        debug!(peer_id = %self.id, "peer close requested");
    }

    /// Record that the transport is gone.
    pub(crate) fn mark_closed(&self) {
        let _ = self.state.set(ConnectionState::Closed);
        self.sink.close();
        self.events.clear();
    }

    /// Resolves once the peer's sink has been closed.
    pub async fn closed(&self) {
        self.sink.closed_token().cancelled().await;
    }

    /// Mark the peer alive (any inbound activity).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_seen.lock() = Instant::now();
    }

    /// Check and reset the alive flag for heartbeat.
    ///
    /// Returns `true` if the peer was active since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Time since the last inbound activity.
    pub fn last_seen_elapsed(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Record a `"pong"` control frame.
    pub(crate) fn record_pong(&self) {
        self.pongs.send_modify(|n| *n += 1);
    }

    /// Send `"ping"` and wait for the matching `"pong"`.
    pub async fn probe(&self, timeout: Duration) -> ProbeOutcome {
        let mut pongs = self.pongs.subscribe();
        let _ = pongs.borrow_and_update();
        if self.send_frame(Frame::ping()).is_err() {
            return ProbeOutcome::Disconnected;
        }
        let closed = self.sink.closed_token();
        tokio::select! {
            changed = pongs.changed() => {
                if changed.is_ok() { ProbeOutcome::Answered } else { ProbeOutcome::Disconnected }
            }
            () = closed.cancelled() => ProbeOutcome::Disconnected,
            () = tokio::time::sleep(timeout) => ProbeOutcome::TimedOut,
        }
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Frames dropped because the outbound queue was full.
    pub fn drop_count(&self) -> u64 {
        self.sink.drop_count()
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
