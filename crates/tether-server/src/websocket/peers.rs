//! The live peer set and event fan-out.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use metrics::counter;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use tether_core::{Frame, PeerId};

use super::peer::Peer;
use crate::metrics::WS_BROADCAST_DROPS_TOTAL;

/// Connected peers indexed by id.
pub struct PeerSet {
    peers: RwLock<HashMap<PeerId, Arc<Peer>>>,
    /// Upgrades admitted but not yet finished, including live peers.
    reserved: AtomicUsize,
}

/// Admission slot held for the lifetime of one peer session.
///
/// Dropping it releases the slot, including when an upgrade never completes.
pub struct Slot {
    peers: Arc<PeerSet>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        let _ = self.peers.reserved.fetch_sub(1, Ordering::AcqRel);
    }
}

impl PeerSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            reserved: AtomicUsize::new(0),
        }
    }

    /// Reserve room for one more peer, or `None` when `max` are in use.
    pub fn try_reserve(self: &Arc<Self>, max: usize) -> Option<Slot> {
        self.reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
            .ok()
            .map(|_| Slot {
                peers: self.clone(),
            })
    }

    /// Slots currently reserved.
    pub fn reserved(&self) -> usize {
        self.reserved.load(Ordering::Acquire)
    }

    /// Add a peer.
    pub async fn add(&self, peer: Arc<Peer>) {
        let mut peers = self.peers.write().await;
        let _ = peers.insert(peer.id().clone(), peer);
    }

    /// Remove a peer by id.
    pub async fn remove(&self, id: &PeerId) -> Option<Arc<Peer>> {
        self.peers.write().await.remove(id)
    }

    /// Look up a peer.
    pub async fn get(&self, id: &PeerId) -> Option<Arc<Peer>> {
        self.peers.read().await.get(id).cloned()
    }

    /// Peers connected right now.
    pub async fn snapshot(&self) -> Vec<Arc<Peer>> {
        self.peers.read().await.values().cloned().collect()
    }

    /// Number of connected peers.
    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    /// Whether no peer is connected.
    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }

    /// Queue `frame` to every peer in a snapshot of the set.
    ///
    /// A failed send to one peer is logged and skipped. Returns the number
    /// of peers the frame was queued for.
    pub async fn broadcast(&self, frame: &Frame) -> usize {
        let peers = self.snapshot().await;
        let mut delivered = 0;
        for peer in &peers {
            match peer.send_frame(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
                    warn!(peer_id = %peer.id(), error = %e, "failed to send event to peer");
                }
            }
        }
        debug!(recipients = peers.len(), delivered, "broadcast frame");
        delivered
    }

    /// Close every peer.
    pub async fn close_all(&self) -> usize {
        let peers = self.snapshot().await;
        for peer in &peers {
            peer.close();
        }
        peers.len()
    }
}

impl Default for PeerSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::peer::tests::make_peer;

    #[tokio::test]
    async fn add_and_remove() {
        let set = PeerSet::new();
        let (peer, _q) = make_peer("p1");
        set.add(peer).await;
        assert_eq!(set.len().await, 1);
        assert!(set.get(&PeerId::from("p1")).await.is_some());
        assert!(set.remove(&PeerId::from("p1")).await.is_some());
        assert!(set.is_empty().await);
        assert!(set.remove(&PeerId::from("p1")).await.is_none());
    }

    #[tokio::test]
    async fn broadcast_reaches_every_peer() {
        let set = PeerSet::new();
        let (a, mut qa) = make_peer("a");
        let (b, mut qb) = make_peer("b");
        set.add(a).await;
        set.add(b).await;
        assert_eq!(set.broadcast(&Frame::Text("hi".into())).await, 2);
        assert_eq!(qa.next().await, Some(Frame::Text("hi".into())));
        assert_eq!(qb.next().await, Some(Frame::Text("hi".into())));
    }

    #[tokio::test]
    async fn broadcast_skips_failed_peer() {
        let set = PeerSet::new();
        let (gone, _qg) = make_peer("gone");
        let (live, mut ql) = make_peer("live");
        gone.close();
        set.add(gone).await;
        set.add(live).await;
        assert_eq!(set.broadcast(&Frame::Text("x".into())).await, 1);
        assert_eq!(ql.next().await, Some(Frame::Text("x".into())));
    }

    #[tokio::test]
    async fn broadcast_to_empty_set() {
        let set = PeerSet::default();
        assert_eq!(set.broadcast(&Frame::ping()).await, 0);
    }

    #[tokio::test]
    async fn close_all_closes_peers() {
        let set = PeerSet::new();
        let (a, _qa) = make_peer("a");
        set.add(a.clone()).await;
        assert_eq!(set.close_all().await, 1);
        assert!(a.is_closed());
    }

    #[test]
    fn reservations_respect_cap() {
        let set = Arc::new(PeerSet::new());
        let first = set.try_reserve(2).unwrap();
        let second = set.try_reserve(2).unwrap();
        assert!(set.try_reserve(2).is_none());
        drop(first);
        assert_eq!(set.reserved(), 1);
        assert!(set.try_reserve(2).is_some());
        drop(second);
    }
}
