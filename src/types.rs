//! Core identifiers and protocol constants for the mesh pub/sub router.
//!
//! # Design Goals
//!
//! 1. **Bounded memory usage** — every collection keyed by these types carries
//!    its own cap; nothing here is unbounded by construction.
//! 2. **Cheap comparison** — `PeerId` and message IDs are opaque byte blobs
//!    compared by equality only; no ordering is meaningful across peers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque stable identifier for a remote node, as handed to us by the host
/// transport. We never interpret its bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct PeerId(pub Vec<u8>);

impl PeerId {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

/// A topic name. No hierarchy, no wildcards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct Topic(pub String);

impl Topic {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Topic {
    fn from(s: &str) -> Self {
        Topic(s.to_string())
    }
}

/// Canonical message identifier: `from || seqno` by default, or a
/// topic-configurable digest of the message body. Used for deduplication and
/// for IHAVE/IWANT exchanges — never for application semantics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub Vec<u8>);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

/// Whether a peer negotiated a protocol that understands GRAFT/PRUNE, or only
/// raw flooding. Only full-mesh peers are eligible for mesh membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerProtocol {
    FullMesh,
    FloodOnly,
}

/// Liveness of a peer record as tracked by the router, not the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerLiveness {
    Connecting,
    Connected,
    Disconnecting,
}

// =============================================================================
// PROTOCOL IDENTIFICATION
// =============================================================================

/// Protocol identifier advertised on stream open for the gossip-mesh variant.
pub const PROTOCOL_ID_GOSSIP: &str = "/meshline/gossip/1.0.0";
/// Protocol identifier for the flood-only variant (no mesh, no control block).
pub const PROTOCOL_ID_FLOOD: &str = "/meshline/flood/1.0.0";
/// Protocol identifier for the random-fanout variant.
pub const PROTOCOL_ID_RANDOM_FANOUT: &str = "/meshline/random-fanout/1.0.0";

// =============================================================================
// MESH SIZING DEFAULTS
// =============================================================================
// These mirror the reference gossip-mesh protocol's own defaults. They are
// not security-critical the way a connection cap is, but a misconfigured mesh
// this far from the defaults will either starve (too small) or amplify
// duplicate traffic badly (too large).

/// Target mesh size per topic.
pub const DEFAULT_D: usize = 6;
/// Lower bound before we graft to top up.
pub const DEFAULT_D_LO: usize = 4;
/// Upper bound before we prune the lowest scorers.
pub const DEFAULT_D_HI: usize = 12;
/// Floor of mesh peers kept purely by score during overflow pruning.
pub const DEFAULT_D_SCORE: usize = 4;
/// Number of peers gossiped IHAVE to per heartbeat, outside the mesh.
pub const DEFAULT_D_LAZY: usize = 6;
/// Target number of outbound-only mesh slots (quality diversity).
pub const DEFAULT_D_OUT: usize = 2;

// =============================================================================
// TIMING DEFAULTS
// =============================================================================

/// Heartbeat cadence driving mesh maintenance, gossip, and cache rotation.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 1_000;
/// Delay before the first heartbeat fires after construction, so peers have a
/// moment to connect before the mesh starts pruning an empty set.
pub const DEFAULT_HEARTBEAT_INITIAL_DELAY_MS: u64 = 100;
/// How long an IWANT request is allowed to wait for the followup message
/// before the peer's non-delivery counts against mesh-message-deliveries.
pub const DEFAULT_FOLLOWUP_TIME_MS: u64 = 3_000;
/// Score decay tick cadence; usually equal to the heartbeat interval.
pub const DEFAULT_DECAY_INTERVAL_MS: u64 = 1_000;
/// Idle TTL for a fanout entry before it is dropped at heartbeat.
pub const DEFAULT_FANOUT_TTL_MS: u64 = 60_000;
/// How long a disconnected peer's score state is retained before purge.
pub const DEFAULT_RETAIN_SCORE_MS: u64 = 10 * 60_000;

// =============================================================================
// GOSSIP / CACHE SIZING
// =============================================================================

/// Fraction of eligible non-mesh peers gossiped IHAVE per heartbeat.
pub const DEFAULT_GOSSIP_FACTOR: f64 = 0.25;
/// Number of most-recent message-cache windows advertised via IHAVE.
pub const DEFAULT_GOSSIP_WINDOW: usize = 3;
/// Total number of message-cache windows retained for IWANT fulfillment.
pub const DEFAULT_HISTORY_LENGTH: usize = 5;
/// Maximum message IDs accepted from a single peer's IHAVE per heartbeat.
/// Above this, the excess is spam and penalizes the sender.
pub const DEFAULT_MAX_IHAVE_LENGTH: usize = 5_000;
/// Maximum times a single message is retransmitted to a peer in response to
/// repeated IWANT requests for it.
pub const DEFAULT_GOSSIP_RETRANSMISSION: u32 = 3;

// =============================================================================
// RESOURCE LIMITS
// =============================================================================
// These bound memory the same way the parent protocol's MESSAGE_SIZE_LIMIT
// and MAX_PEERS do: a misbehaving or merely very active peer cannot force
// unbounded allocation.

/// Maximum application payload size accepted in a single message.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;
/// Maximum size of one wire frame (envelope + all batched messages/control).
pub const DEFAULT_MAX_TRANSMISSION_SIZE: usize = 4 * 1024 * 1024;
/// Maximum simultaneous outbound stream-open attempts across all peers.
pub const DEFAULT_MAX_PENDING_CONNS: usize = 16;
/// Capacity of each per-peer outbound queue for gossip-class frames
/// (IHAVE/IWANT/GRAFT/PRUNE). Drop-oldest on overflow.
pub const DEFAULT_GOSSIP_QUEUE_CAPACITY: usize = 256;
/// Capacity of each per-peer outbound queue for message frames. Drop-newest
/// on overflow — an already-queued message is cheaper to keep than to redo
/// the forwarding decision for a replacement.
pub const DEFAULT_MESSAGE_QUEUE_CAPACITY: usize = 512;
/// Capacity multiplier applied to direct peers' queues, who must never be
/// starved by ordinary churn.
pub const DIRECT_PEER_QUEUE_MULTIPLIER: usize = 4;
/// Bound on the deduplication (seen) cache, independent of its TTL-based GC.
pub const DEFAULT_SEEN_CACHE_CAPACITY: usize = 200_000;
/// Eviction batch size when the seen cache hits `DEFAULT_SEEN_CACHE_CAPACITY`
/// before its TTL sweep catches up; amortizes the eviction cost.
pub const SEEN_CACHE_EVICTION_BATCH: usize = 20_000;
/// Global concurrency cap across all topics' validator pools.
pub const DEFAULT_GLOBAL_VALIDATE_CONCURRENCY: usize = 32;
/// Per-topic concurrency cap for that topic's validator pool.
pub const DEFAULT_TOPIC_VALIDATE_CONCURRENCY: usize = 8;
/// Default per-invocation validator timeout.
pub const DEFAULT_VALIDATE_TIMEOUT_MS: u64 = 5_000;

// =============================================================================
// SCORE THRESHOLD DEFAULTS
// =============================================================================
// All three are negative reals by construction (validated in config.rs);
// accept_px / opportunistic_graft are non-negative.

pub const DEFAULT_GOSSIP_THRESHOLD: f64 = -10.0;
pub const DEFAULT_PUBLISH_THRESHOLD: f64 = -50.0;
pub const DEFAULT_GRAYLIST_THRESHOLD: f64 = -80.0;
pub const DEFAULT_ACCEPT_PX_THRESHOLD: f64 = 10.0;
pub const DEFAULT_OPPORTUNISTIC_GRAFT_THRESHOLD: f64 = 5.0;
/// Number of highest-scoring non-mesh peers opportunistically grafted when
/// the mesh's median score falls below `opportunistic_graft_threshold`.
pub const DEFAULT_OPPORTUNISTIC_GRAFT_PEERS: usize = 2;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_displays_as_hex() {
        let id = PeerId::new(vec![0xab, 0xcd]);
        assert_eq!(id.to_string(), "abcd");
    }

    #[test]
    fn topic_from_str() {
        let t: Topic = "blocks".into();
        assert_eq!(t.0, "blocks");
    }

    #[test]
    fn mesh_defaults_are_internally_consistent() {
        assert!(DEFAULT_D_LO <= DEFAULT_D && DEFAULT_D <= DEFAULT_D_HI);
        assert!(DEFAULT_D_OUT < DEFAULT_D_LO);
        assert!(DEFAULT_D_OUT <= DEFAULT_D / 2);
    }
}
