//! Transport task: owns the websocket, feeds a connection's event channel,
//! and reconnects per policy.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use tether_core::Frame;
use tether_rpc::{ChannelSink, CloseInfo, FrameSink, OutboundQueue, TransportError, TransportEvent};

use crate::connector::{BoxSocket, Connector};
use crate::reconnect::ReconnectPolicy;
use crate::target::ConnectTarget;

/// How long the writer may take to flush after the socket ends.
const WRITER_DRAIN: Duration = Duration::from_secs(1);

pub(crate) struct TransportTask {
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) target: ConnectTarget,
    pub(crate) policy: ReconnectPolicy,
    pub(crate) outbound_queue: usize,
    pub(crate) events: mpsc::Sender<TransportEvent>,
    pub(crate) shutdown: CancellationToken,
}

impl TransportTask {
    #[instrument(skip_all, fields(target = %self.target))]
    pub(crate) async fn run(self) {
        let mut failures: u32 = 0;
        // Closed is reported once per outage, not once per failed retry.
        let mut reported_closed = false;

        loop {
            let attempt = tokio::select! {
                () = self.shutdown.cancelled() => return,
                attempt = self.connector.connect(&self.target) => attempt,
            };

            match attempt {
                Ok(socket) => {
                    failures = 0;
                    reported_closed = false;
                    let Some(mut close) = self.drive(socket).await else {
                        return;
                    };
                    if self.shutdown.is_cancelled() {
                        return;
                    }
                    close.reconnecting = self.policy.enabled;
                    info!(code = ?close.code, reason = %close.reason, "transport dropped");
                    if !self.emit(TransportEvent::Closed(close)).await {
                        return;
                    }
                    reported_closed = true;
                }
                Err(err) => {
                    failures = failures.saturating_add(1);
                    let reason = err.to_string();
                    debug!(failures, error = %reason, "connect attempt failed");
                    if !self.emit(TransportEvent::Error(err)).await {
                        return;
                    }
                    let giving_up = self.policy.next_delay(failures).is_none();
                    if giving_up || !reported_closed {
                        let close = CloseInfo {
                            code: None,
                            reason,
                            reconnecting: !giving_up,
                        };
                        if !self.emit(TransportEvent::Closed(close)).await {
                            return;
                        }
                        reported_closed = true;
                    }
                }
            }

            let Some(delay) = self.policy.next_delay(failures) else {
                if self.policy.enabled {
                    warn!(failures, "reconnect attempts exhausted");
                }
                return;
            };
            debug!(delay_ms = delay.as_millis(), "reconnecting");
            tokio::select! {
                () = self.shutdown.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn emit(&self, event: TransportEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    /// Pump one socket until it ends. `None` when the connection stopped
    /// listening.
    async fn drive(&self, socket: BoxSocket) -> Option<CloseInfo> {
        let (sink, queue) = ChannelSink::new(self.outbound_queue);
        let sink_closed = sink.closed_token();
        let (ws_tx, mut ws_rx) = socket.split();

        if !self.emit(TransportEvent::Open(sink.clone())).await {
            return None;
        }
        let mut writer = tokio::spawn(write_loop(ws_tx, queue));

        let outcome = loop {
            let msg = tokio::select! {
                () = sink_closed.cancelled() => break Some(CloseInfo {
                    code: Some(1000),
                    reason: "closed locally".into(),
                    reconnecting: false,
                }),
                msg = ws_rx.next() => msg,
            };
            let frame = match msg {
                Some(Ok(Message::Text(text))) => Frame::Text(text.to_string()),
                Some(Ok(Message::Binary(bytes))) => Frame::Binary(bytes),
                Some(Ok(Message::Close(frame))) => break Some(close_info(frame)),
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    let reason = e.to_string();
                    if !self.emit(TransportEvent::Error(TransportError::Io(reason.clone()))).await {
                        break None;
                    }
                    break Some(CloseInfo {
                        code: None,
                        reason,
                        reconnecting: false,
                    });
                }
                None => {
                    break Some(CloseInfo {
                        code: None,
                        reason: "stream ended".into(),
                        reconnecting: false,
                    });
                }
            };
            if !self.emit(TransportEvent::Message(frame)).await {
                break None;
            }
        };

        sink.close();
        if tokio::time::timeout(WRITER_DRAIN, &mut writer).await.is_err() {
            writer.abort();
        }
        outcome
    }
}

fn close_info(frame: Option<CloseFrame>) -> CloseInfo {
    match frame {
        Some(frame) => CloseInfo {
            code: Some(u16::from(frame.code)),
            reason: frame.reason.to_string(),
            reconnecting: false,
        },
        None => CloseInfo {
            code: None,
            reason: "closed by peer".into(),
            reconnecting: false,
        },
    }
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(bytes) => Message::Binary(bytes),
    }
}

async fn write_loop(mut ws_tx: SplitSink<BoxSocket, Message>, mut queue: OutboundQueue) {
    while let Some(frame) = queue.next().await {
        if let Err(e) = ws_tx.send(to_message(frame)).await {
            debug!(error = %e, "websocket write failed");
            return;
        }
    }
    let _ = ws_tx.close().await;
}
