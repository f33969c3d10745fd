//! Per-peer record owned exclusively by the event loop.
//!
//! Grounded on the parent protocol's `net/peer.rs::Peer`, trimmed to the
//! fields the router/score subsystem actually consult — the sync-state,
//! inventory-relay, and ban-score fields there belong to transport/discovery
//! concerns this crate does not implement.

use crate::signing::PublicKey;
use crate::types::{PeerId, PeerLiveness, PeerProtocol, Topic};
use std::collections::HashSet;
use std::time::Instant;

pub struct PeerRecord {
    pub id: PeerId,
    pub protocol: PeerProtocol,
    pub liveness: PeerLiveness,
    pub connected_at: Instant,
    /// Topics this peer has announced subscribing to (their view, as told to
    /// us — not necessarily our own subscription state).
    pub topics: HashSet<Topic>,
    /// Known public key, if the peer has sent a signed message or was
    /// configured as a direct peer with a known identity.
    pub key: Option<PublicKey>,
    pub is_direct: bool,
}

impl PeerRecord {
    pub fn new(id: PeerId, protocol: PeerProtocol, is_direct: bool) -> Self {
        Self {
            id,
            protocol,
            liveness: PeerLiveness::Connecting,
            connected_at: Instant::now(),
            topics: HashSet::new(),
            key: None,
            is_direct,
        }
    }

    pub fn is_full_mesh(&self) -> bool {
        matches!(self.protocol, PeerProtocol::FullMesh)
    }

    pub fn subscribed_to(&self, topic: &Topic) -> bool {
        self.topics.contains(topic)
    }

    pub fn mark_subscribed(&mut self, topic: Topic) {
        self.topics.insert(topic);
    }

    pub fn mark_unsubscribed(&mut self, topic: &Topic) {
        self.topics.remove(topic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_topic_membership_announcements() {
        let mut p = PeerRecord::new(PeerId(vec![1]), PeerProtocol::FullMesh, false);
        let t = Topic::new("news");
        assert!(!p.subscribed_to(&t));
        p.mark_subscribed(t.clone());
        assert!(p.subscribed_to(&t));
        p.mark_unsubscribed(&t);
        assert!(!p.subscribed_to(&t));
    }

    #[test]
    fn flood_only_peer_is_not_full_mesh() {
        let p = PeerRecord::new(PeerId(vec![1]), PeerProtocol::FloodOnly, false);
        assert!(!p.is_full_mesh());
    }
}
