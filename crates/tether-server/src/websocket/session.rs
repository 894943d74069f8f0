//! Peer session lifecycle: one accepted websocket from upgrade through
//! disconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tracing::{debug, info, instrument, warn};

use tether_core::{Frame, PeerId};
use tether_rpc::{ChannelSink, OutboundQueue};

use super::handler::handle_frame;
use super::heartbeat::{HeartbeatResult, run_heartbeat};
use super::peer::Peer;
use super::peers::Slot;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};
use crate::server::AppState;

/// How long the writer gets to flush after the reader stops.
const WRITER_DRAIN: Duration = Duration::from_secs(1);

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(bytes) => Message::Binary(bytes),
    }
}

/// Run a session for an accepted websocket.
///
/// 1. Registers the peer and fires connection callbacks
/// 2. Feeds inbound frames to [`handle_frame`]
/// 3. Drains the peer's outbound queue, sending websocket Ping frames at the
///    heartbeat interval
/// 4. Ends on peer close, server shutdown, heartbeat timeout, or socket loss
/// 5. Unregisters the peer and fires disconnect callbacks
#[instrument(skip_all, fields(peer_id = %peer_id))]
pub async fn run_peer_session(ws: WebSocket, peer_id: PeerId, state: AppState, slot: Slot) {
    let (ws_tx, mut ws_rx) = ws.split();
    let (sink, queue) = ChannelSink::new(state.config.outbound_queue);
    let peer = Arc::new(Peer::new(
        peer_id.clone(),
        sink,
        state.codec.clone(),
        state.validators.clone(),
    ));
    let started = Instant::now();

    info!("peer connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
    state.peers.add(peer.clone()).await;
    state.hooks.fire_connect(&peer);

    let writer = tokio::spawn(write_loop(ws_tx, queue, state.config.heartbeat_interval));
    let writer_abort = writer.abort_handle();

    let heartbeat = run_heartbeat(
        peer.clone(),
        state.config.heartbeat_interval,
        state.config.heartbeat_timeout,
        state.shutdown.token().child_token(),
    );
    tokio::pin!(heartbeat);

    let reason = loop {
        let msg = tokio::select! {
            () = peer.closed() => break "closed locally",
            outcome = &mut heartbeat => match outcome {
                HeartbeatResult::TimedOut => {
                    warn!(timeout = ?state.config.heartbeat_timeout, "peer unresponsive, disconnecting");
                    break "heartbeat timeout";
                }
                HeartbeatResult::Cancelled => break "server shutting down",
            },
            msg = ws_rx.next() => msg,
        };
        match msg {
            Some(Ok(Message::Text(text))) => {
                peer.mark_alive();
                handle_frame(&state, &peer, &Frame::Text(text.to_string()));
            }
            Some(Ok(Message::Binary(data))) => {
                peer.mark_alive();
                handle_frame(&state, &peer, &Frame::Binary(data));
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => peer.mark_alive(),
            Some(Ok(Message::Close(_))) => break "peer sent close",
            Some(Err(e)) => {
                debug!(error = %e, "websocket read failed");
                break "read error";
            }
            None => break "stream ended",
        }
    };

    peer.mark_closed();
    let _ = state.peers.remove(&peer_id).await;
    if tokio::time::timeout(WRITER_DRAIN, writer).await.is_err() {
        writer_abort.abort();
    }

    info!(reason, dropped = peer.drop_count(), "peer disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
    state.hooks.fire_disconnect(&peer);
    drop(slot);
}

/// Forward queued frames to the socket with periodic websocket Pings.
///
/// Sends a Close frame once the queue is closed and drained.
async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut queue: OutboundQueue,
    ping_every: Duration,
) {
    let mut ping_interval = tokio::time::interval(ping_every);
    // Skip the immediate first tick
    let _ = ping_interval.tick().await;

    loop {
        tokio::select! {
            frame = queue.next() => {
                let Some(frame) = frame else {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                };
                if ws_tx.send(to_message(frame)).await.is_err() {
                    break;
                }
            }
            _ = ping_interval.tick() => {
                if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }
}
