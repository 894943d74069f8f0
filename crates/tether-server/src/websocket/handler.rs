//! Inbound frame dispatch for one peer.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use tether_core::{Control, Decoded, Envelope, EventMessage, Frame, Side};

use super::peer::Peer;
use crate::server::AppState;

/// Decode one inbound frame and act on it.
///
/// Calls are answered on a spawned task so a slow handler does not hold up
/// the peer's reader. Malformed or unexpected frames are logged and dropped.
pub fn handle_frame(state: &AppState, peer: &Arc<Peer>, frame: &Frame) {
    match state.codec.decode(frame, Side::Server) {
        Ok(Decoded::Control(Control::Ping)) => {
            if let Err(e) = peer.send_frame(Frame::pong()) {
                debug!(peer_id = %peer.id(), error = %e, "failed to answer ping");
            }
        }
        Ok(Decoded::Control(Control::Pong)) => {
            trace!(peer_id = %peer.id(), "pong received");
            peer.record_pong();
        }
        Ok(Decoded::Envelope(Envelope::Call(call))) => {
            debug!(peer_id = %peer.id(), function = %call.function, call_id = %call.call_id, "dispatching call");
            let state = state.clone();
            let peer = peer.clone();
            drop(tokio::spawn(async move {
                let (function, call_id) = (call.function.clone(), call.call_id.clone());
                let reply = state.registry.dispatch(call, &state.validators).await;
                if let Err(e) = peer.send_envelope(&reply) {
                    // The caller only learns of this through its own timeout.
                    warn!(
                        peer_id = %peer.id(),
                        function,
                        call_id = %call_id,
                        reply = reply.kind(),
                        error = %e,
                        "call reply not delivered"
                    );
                }
            }));
        }
        Ok(Decoded::Envelope(Envelope::Event(EventMessage { event, data }))) => {
            if let Err(e) = state.validators.check_event(&event, &data) {
                warn!(peer_id = %peer.id(), event, error = %e, "inbound event failed validation, dropping");
                return;
            }
            let local = peer.events().dispatch(&event, &data);
            let global = state.events.dispatch(&event, &data);
            trace!(peer_id = %peer.id(), event, handlers = local + global, "event dispatched");
        }
        Ok(Decoded::Envelope(other)) => {
            debug!(peer_id = %peer.id(), kind = other.kind(), "unexpected envelope from peer, ignoring");
        }
        Ok(Decoded::Ignored(reason)) => {
            debug!(peer_id = %peer.id(), reason, len = frame.len(), "ignoring frame");
        }
        Err(e) => {
            warn!(peer_id = %peer.id(), error = %e, len = frame.len(), "dropping undecodable frame");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use assert_matches::assert_matches;
    use serde_json::{Value, json};
    use tether_core::logging::capture_logs;
    use tether_core::{CallId, Codec, FunctionCall, JsonCodec, PeerId};
    use tether_rpc::{ChannelSink, FunctionRegistry, OutboundQueue, Validators, handler_fn};
    use tracing::Level;

    use crate::config::ServerConfig;
    use crate::server::ServerBuilder;

    fn state_with(validators: Validators) -> AppState {
        let mut registry = FunctionRegistry::new();
        registry
            .register("echo", handler_fn(|data: Value| async move { Ok(data) }))
            .unwrap();
        ServerBuilder::new(ServerConfig::default())
            .registry(registry)
            .validators(validators)
            .build()
            .unwrap()
            .state()
            .clone()
    }

    fn peer_for(state: &AppState) -> (Arc<Peer>, OutboundQueue) {
        peer_with_queue(state, 8)
    }

    fn peer_with_queue(state: &AppState, capacity: usize) -> (Arc<Peer>, OutboundQueue) {
        let (sink, queue) = ChannelSink::new(capacity);
        let peer = Peer::new(
            PeerId::from("p"),
            sink,
            state.codec.clone(),
            state.validators.clone(),
        );
        (Arc::new(peer), queue)
    }

    async fn next_envelope(queue: &mut OutboundQueue) -> Envelope {
        let frame = tokio::time::timeout(Duration::from_secs(2), queue.next())
            .await
            .unwrap()
            .unwrap();
        match JsonCodec.decode(&frame, Side::Client).unwrap() {
            Decoded::Envelope(env) => env,
            other => panic!("expected envelope, got {other:?}"),
        }
    }

    fn call_frame(function: &str, data: Value) -> Frame {
        JsonCodec
            .encode(&Envelope::Call(FunctionCall {
                function: function.into(),
                call_id: CallId::from("c1"),
                data,
            }))
            .unwrap()
    }

    #[tokio::test]
    async fn call_is_answered() {
        let state = state_with(Validators::new());
        let (peer, mut queue) = peer_for(&state);
        handle_frame(&state, &peer, &call_frame("echo", json!([1, 2])));
        assert_matches!(
            next_envelope(&mut queue).await,
            Envelope::Result(r) if r.data == json!([1, 2]) && r.call_id.as_str() == "c1"
        );
    }

    #[tokio::test]
    async fn undeliverable_reply_is_logged_as_warning() {
        let (logs, _guard) = capture_logs();
        let state = state_with(Validators::new());
        let (peer, _queue) = peer_with_queue(&state, 1);
        peer.send_frame(Frame::pong()).unwrap();

        handle_frame(&state, &peer, &call_frame("echo", json!(1)));
        tokio::time::timeout(Duration::from_secs(2), async {
            while !logs.has_event(Level::WARN, "call reply not delivered") {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let event = logs
            .events()
            .into_iter()
            .find(|e| e.message.contains("call reply not delivered"))
            .unwrap();
        assert_eq!(event.field("call_id"), Some("c1"));
        assert_eq!(event.field("function"), Some("echo"));
    }

    #[tokio::test]
    async fn missing_function_answers_no_handler() {
        let state = state_with(Validators::new());
        let (peer, mut queue) = peer_for(&state);
        handle_frame(&state, &peer, &call_frame("nope", json!(null)));
        assert_matches!(
            next_envelope(&mut queue).await,
            Envelope::Error(e) if e.code.as_deref() == Some("NO_HANDLER") && e.message.contains("nope")
        );
    }

    #[tokio::test]
    async fn reserved_ping_bypasses_handlers() {
        let state = state_with(Validators::new());
        let (peer, mut queue) = peer_for(&state);
        handle_frame(&state, &peer, &call_frame("__ping", json!(null)));
        assert_matches!(
            next_envelope(&mut queue).await,
            Envelope::Result(r) if r.data == json!("pong")
        );
    }

    #[tokio::test]
    async fn text_ping_answered_with_pong() {
        let state = state_with(Validators::new());
        let (peer, mut queue) = peer_for(&state);
        handle_frame(&state, &peer, &Frame::ping());
        assert_eq!(queue.next().await, Some(Frame::pong()));
    }

    #[tokio::test]
    async fn events_reach_peer_and_server_subscribers() {
        let state = state_with(Validators::new());
        let (peer, _queue) = peer_for(&state);
        let hits = Arc::new(AtomicUsize::new(0));
        let (h1, h2) = (hits.clone(), hits.clone());
        let _ = peer.on("joined", move |_| {
            let _ = h1.fetch_add(1, Ordering::SeqCst);
        });
        let _ = state.events.on("joined", move |_| {
            let _ = h2.fetch_add(1, Ordering::SeqCst);
        });
        let frame = JsonCodec
            .encode(&Envelope::Event(EventMessage {
                event: "joined".into(),
                data: json!("alice"),
            }))
            .unwrap();
        handle_frame(&state, &peer, &frame);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalid_event_is_dropped_with_warning() {
        let (logs, _guard) = capture_logs();
        let mut validators = Validators::new();
        validators.add_event("joined", |_| Err("bad".into())).unwrap();
        let state = state_with(validators);
        let (peer, _queue) = peer_for(&state);
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let _ = peer.on("joined", move |_| {
            let _ = h.fetch_add(1, Ordering::SeqCst);
        });
        let frame = JsonCodec
            .encode(&Envelope::Event(EventMessage {
                event: "joined".into(),
                data: json!(1),
            }))
            .unwrap();
        handle_frame(&state, &peer, &frame);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(logs.has_event(Level::WARN, "failed validation"));
    }

    #[tokio::test]
    async fn garbage_is_logged_and_dropped() {
        let (logs, _guard) = capture_logs();
        let state = state_with(Validators::new());
        let (peer, _queue) = peer_for(&state);
        handle_frame(&state, &peer, &Frame::Text("{oops".into()));
        assert!(logs.has_event(Level::WARN, "undecodable"));
    }
}
