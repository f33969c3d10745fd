//! Construction-time-validated configuration surface.
//!
//! Every field has a default matching the reference gossip-mesh protocol.
//! `Config::validate` is called once, synchronously, inside `Network::new` —
//! no invariant here is re-checked on every heartbeat or every call.

use crate::error::ConfigError;
use crate::score::{PeerScoreParams, PeerScoreThresholds};
use crate::types::*;
use std::time::Duration;

/// Which routing algorithm a `Network` runs for its topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingVariant {
    /// Full GRAFT/PRUNE/IHAVE/IWANT mesh protocol (default).
    Gossip,
    /// Pure broadcast to all known subscribed peers, no mesh state.
    Flood,
    /// Uses the same pipeline as Gossip but skips mesh/control handling,
    /// instead maintaining a uniformly-sampled random peer subset per topic.
    RandomFanout,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub routing_variant: RoutingVariant,

    pub d: usize,
    pub d_lo: usize,
    pub d_hi: usize,
    pub d_score: usize,
    pub d_lazy: usize,
    pub d_out: usize,

    pub heartbeat_interval: Duration,
    pub heartbeat_initial_delay: Duration,
    pub followup_time: Duration,
    pub decay_interval: Duration,
    pub fanout_ttl: Duration,
    pub retain_score: Duration,

    pub gossip_factor: f64,
    pub gossip_window: usize,
    pub history_length: usize,
    pub max_ihave_length: usize,
    pub gossip_retransmission: u32,

    pub max_message_size: usize,
    pub max_transmission_size: usize,
    pub max_pending_conns: usize,
    pub gossip_queue_capacity: usize,
    pub message_queue_capacity: usize,
    pub seen_cache_capacity: usize,
    pub global_validate_concurrency: usize,
    pub topic_validate_concurrency: usize,
    pub validate_timeout: Duration,

    /// Whether outgoing messages are signed. Defaults to `false`, matching
    /// the reference configuration — note this is *not* the safer default;
    /// callers who want signed-and-verified messages must opt in explicitly.
    pub sign_messages: bool,
    /// Whether inbound messages require a valid signature to be accepted.
    /// Same non-obvious default as `sign_messages`.
    pub validate_messages: bool,
    /// When true, a signed message from a peer we have no key for is
    /// rejected rather than accepted unverified.
    pub strict_signature_verification: bool,
    /// Whether Publish() with no eligible peers is an error (false) or a
    /// silent no-op (true).
    pub with_publish_if_no_peers: bool,
    /// Peers retained in every topic's mesh unconditionally, exempt from
    /// score gating and backoff.
    pub direct_peers: Vec<PeerId>,

    pub score_params: PeerScoreParams,
    pub score_thresholds: PeerScoreThresholds,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            routing_variant: RoutingVariant::Gossip,

            d: DEFAULT_D,
            d_lo: DEFAULT_D_LO,
            d_hi: DEFAULT_D_HI,
            d_score: DEFAULT_D_SCORE,
            d_lazy: DEFAULT_D_LAZY,
            d_out: DEFAULT_D_OUT,

            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
            heartbeat_initial_delay: Duration::from_millis(DEFAULT_HEARTBEAT_INITIAL_DELAY_MS),
            followup_time: Duration::from_millis(DEFAULT_FOLLOWUP_TIME_MS),
            decay_interval: Duration::from_millis(DEFAULT_DECAY_INTERVAL_MS),
            fanout_ttl: Duration::from_millis(DEFAULT_FANOUT_TTL_MS),
            retain_score: Duration::from_millis(DEFAULT_RETAIN_SCORE_MS),

            gossip_factor: DEFAULT_GOSSIP_FACTOR,
            gossip_window: DEFAULT_GOSSIP_WINDOW,
            history_length: DEFAULT_HISTORY_LENGTH,
            max_ihave_length: DEFAULT_MAX_IHAVE_LENGTH,
            gossip_retransmission: DEFAULT_GOSSIP_RETRANSMISSION,

            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_transmission_size: DEFAULT_MAX_TRANSMISSION_SIZE,
            max_pending_conns: DEFAULT_MAX_PENDING_CONNS,
            gossip_queue_capacity: DEFAULT_GOSSIP_QUEUE_CAPACITY,
            message_queue_capacity: DEFAULT_MESSAGE_QUEUE_CAPACITY,
            seen_cache_capacity: DEFAULT_SEEN_CACHE_CAPACITY,
            global_validate_concurrency: DEFAULT_GLOBAL_VALIDATE_CONCURRENCY,
            topic_validate_concurrency: DEFAULT_TOPIC_VALIDATE_CONCURRENCY,
            validate_timeout: Duration::from_millis(DEFAULT_VALIDATE_TIMEOUT_MS),

            sign_messages: false,
            validate_messages: false,
            strict_signature_verification: false,
            with_publish_if_no_peers: true,
            direct_peers: Vec::new(),

            score_params: PeerScoreParams::default(),
            score_thresholds: PeerScoreThresholds::default(),
        }
    }
}

impl Config {
    /// Validate every cross-field invariant the router, heartbeat, and score
    /// subsystem assume hold for the lifetime of the `Network`. Called once,
    /// eagerly, before any task is spawned.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.d_lo <= self.d && self.d <= self.d_hi) {
            return Err(ConfigError::MeshBounds {
                dlo: self.d_lo,
                d: self.d,
                dhi: self.d_hi,
            });
        }
        if self.d_out >= self.d_lo {
            return Err(ConfigError::DoutTooLarge {
                dout: self.d_out,
                dlo: self.d_lo,
            });
        }
        if self.d_out > self.d / 2 {
            return Err(ConfigError::DoutExceedsHalfD {
                dout: self.d_out,
                half: self.d / 2,
            });
        }

        let t = &self.score_thresholds;
        if !(t.graylist_threshold <= t.publish_threshold
            && t.publish_threshold <= t.gossip_threshold
            && t.gossip_threshold <= 0.0)
        {
            return Err(ConfigError::ThresholdOrder {
                graylist: t.graylist_threshold,
                publish: t.publish_threshold,
                gossip: t.gossip_threshold,
            });
        }
        if t.accept_px_threshold < 0.0 {
            return Err(ConfigError::NegativeAcceptPx(t.accept_px_threshold));
        }
        if t.opportunistic_graft_threshold < 0.0 {
            return Err(ConfigError::NegativeOpportunisticGraft(
                t.opportunistic_graft_threshold,
            ));
        }

        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::ZeroHeartbeatInterval);
        }
        if self.decay_interval.is_zero() {
            return Err(ConfigError::ZeroDecayInterval);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn rejects_inverted_mesh_bounds() {
        let mut c = Config::default();
        c.d_lo = 20;
        assert!(matches!(c.validate(), Err(ConfigError::MeshBounds { .. })));
    }

    #[test]
    fn rejects_dout_too_large() {
        let mut c = Config::default();
        c.d_out = c.d_lo;
        assert!(matches!(c.validate(), Err(ConfigError::DoutTooLarge { .. })));
    }

    #[test]
    fn rejects_bad_threshold_order() {
        let mut c = Config::default();
        c.score_thresholds.gossip_threshold = 5.0;
        assert!(matches!(c.validate(), Err(ConfigError::ThresholdOrder { .. })));
    }

    #[test]
    fn rejects_zero_heartbeat() {
        let mut c = Config::default();
        c.heartbeat_interval = Duration::ZERO;
        assert!(matches!(c.validate(), Err(ConfigError::ZeroHeartbeatInterval)));
    }
}
