//! Heartbeat liveness monitoring.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;

use super::peer::Peer;

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The peer stopped responding within the timeout window.
    TimedOut,
    /// The heartbeat was cancelled externally.
    Cancelled,
}

/// Watch a peer's activity.
///
/// At each `interval` tick the alive flag is checked and reset. Once
/// `timeout / interval` consecutive ticks (at least one) pass without
/// activity the peer is considered dead.
pub async fn run_heartbeat(
    peer: Arc<Peer>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut check_interval = time::interval(interval);
    let mut missed: u32 = 0;
    let interval_ms = interval.as_millis().max(1);
    let max_missed = u32::try_from(timeout.as_millis() / interval_ms)
        .unwrap_or(u32::MAX)
        .max(1);

    loop {
        tokio::select! {
            _ = check_interval.tick() => {
                if peer.check_alive() {
                    missed = 0;
                } else {
                    missed += 1;
                    if missed >= max_missed {
                        return HeartbeatResult::TimedOut;
                    }
                }
            }
            () = cancel.cancelled() => {
                return HeartbeatResult::Cancelled;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::peer::tests::make_peer;

    #[tokio::test]
    async fn heartbeat_cancelled() {
        let (peer, _q) = make_peer("hb");
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();
        let handle = tokio::spawn(async move {
            run_heartbeat(peer, Duration::from_secs(100), Duration::from_secs(300), cancel2).await
        });
        cancel.cancel();
        assert_eq!(handle.await.unwrap(), HeartbeatResult::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_times_out() {
        let (peer, _q) = make_peer("hb");
        let _ = peer.check_alive();
        let result = run_heartbeat(
            peer,
            Duration::from_millis(100),
            Duration::from_millis(300),
            CancellationToken::new(),
        )
        .await;
        assert_eq!(result, HeartbeatResult::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn active_peer_stays_alive() {
        let (peer, _q) = make_peer("hb");
        let monitored = peer.clone();
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();
        let handle = tokio::spawn(async move {
            run_heartbeat(
                monitored,
                Duration::from_millis(200),
                Duration::from_millis(600),
                cancel2,
            )
            .await
        });
        for _ in 0..10 {
            time::sleep(Duration::from_millis(100)).await;
            peer.mark_alive();
        }
        cancel.cancel();
        assert_eq!(handle.await.unwrap(), HeartbeatResult::Cancelled);
    }
}
