//! Transport contract consumed by the protocol layer.
//!
//! A transport reports its lifecycle as a stream of [`TransportEvent`]s and
//! accepts outbound frames through a [`FrameSink`]. Every `Open` carries a
//! fresh sink, so a reconnecting transport simply emits `Closed` followed by
//! another `Open` and the connection rebinds to the new sink.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use tether_core::Frame;

/// Transport-level failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Outbound queue is full; the frame was dropped.
    #[error("outbound queue full")]
    QueueFull,
    /// Sink has been closed.
    #[error("transport closed")]
    Closed,
    /// Connecting or upgrading failed.
    #[error("handshake failed: {0}")]
    Handshake(String),
    /// Socket read or write failed.
    #[error("transport i/o: {0}")]
    Io(String),
}

/// Outbound half of a live transport.
pub trait FrameSink: Send + Sync {
    /// Queue a frame for delivery without waiting.
    fn send(&self, frame: Frame) -> Result<(), TransportError>;

    /// Begin closing the transport. Idempotent.
    fn close(&self);

    /// Whether [`FrameSink::close`] has been called.
    fn is_closed(&self) -> bool;
}

/// Why a transport went away.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CloseInfo {
    /// Websocket close code, when one was received.
    pub code: Option<u16>,
    /// Close reason text.
    pub reason: String,
    /// Whether the transport will try to open again.
    pub reconnecting: bool,
}

/// Lifecycle notifications from a transport.
pub enum TransportEvent {
    /// Transport is (re)connected; send through this sink from now on.
    Open(Arc<dyn FrameSink>),
    /// One inbound frame.
    Message(Frame),
    /// Non-fatal error report.
    Error(TransportError),
    /// Transport closed.
    Closed(CloseInfo),
}

impl fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open(_) => f.write_str("Open"),
            Self::Message(frame) => f.debug_tuple("Message").field(frame).finish(),
            Self::Error(e) => f.debug_tuple("Error").field(e).finish(),
            Self::Closed(info) => f.debug_tuple("Closed").field(info).finish(),
        }
    }
}

/// [`FrameSink`] backed by a bounded channel drained by a writer task.
///
/// Sends never wait: a full queue drops the frame and counts it.
pub struct ChannelSink {
    tx: mpsc::Sender<Frame>,
    closed: CancellationToken,
    dropped: AtomicU64,
}

impl ChannelSink {
    /// Create a sink and the queue its writer task drains.
    pub fn new(capacity: usize) -> (Arc<Self>, OutboundQueue) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let closed = CancellationToken::new();
        let sink = Arc::new(Self {
            tx,
            closed: closed.clone(),
            dropped: AtomicU64::new(0),
        });
        (sink, OutboundQueue { rx, closed })
    }

    /// Frames dropped because the queue was full.
    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Token cancelled when the sink is closed.
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }
}

impl FrameSink for ChannelSink {
    fn send(&self, frame: Frame) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(TransportError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => Err(TransportError::Closed),
        }
    }

    fn close(&self) {
        self.closed.cancel();
    }

    fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.tx.is_closed()
    }
}

/// Receiving end of a [`ChannelSink`].
pub struct OutboundQueue {
    rx: mpsc::Receiver<Frame>,
    closed: CancellationToken,
}

impl OutboundQueue {
    /// Next frame to write, or `None` once the sink is closed and drained.
    pub async fn next(&mut self) -> Option<Frame> {
        tokio::select! {
            biased;
            frame = self.rx.recv() => frame,
            () = self.closed.cancelled() => self.rx.try_recv().ok(),
        }
    }
}
