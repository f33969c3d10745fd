//! Peer-score parameter and threshold vectors.
//!
//! Field set and semantics are grounded on
//! `examples/shapengw-rust-libp2p/protocols/gossipsub/src/peer_score/mod.rs`'s
//! `PeerScoreParams`/`PeerScoreThresholds`/`TopicScoreParams`, trimmed to the
//! P1-P7 terms the spec actually names.

use crate::types::*;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct TopicScoreParams {
    pub topic_weight: f64,

    pub time_in_mesh_weight: f64,
    pub time_in_mesh_quantum: Duration,
    pub time_in_mesh_cap: f64,

    pub first_message_deliveries_weight: f64,
    pub first_message_deliveries_cap: f64,
    pub first_message_deliveries_decay: f64,

    pub mesh_message_deliveries_weight: f64,
    pub mesh_message_deliveries_decay: f64,
    pub mesh_message_deliveries_threshold: f64,
    pub mesh_message_deliveries_cap: f64,
    pub mesh_message_deliveries_activation: Duration,

    pub mesh_failure_penalty_weight: f64,
    pub mesh_failure_penalty_decay: f64,

    pub invalid_message_deliveries_weight: f64,
    pub invalid_message_deliveries_decay: f64,
}

impl Default for TopicScoreParams {
    fn default() -> Self {
        Self {
            topic_weight: 1.0,

            time_in_mesh_weight: 1.0,
            time_in_mesh_quantum: Duration::from_secs(1),
            time_in_mesh_cap: 3600.0,

            first_message_deliveries_weight: 1.0,
            first_message_deliveries_cap: 2000.0,
            first_message_deliveries_decay: 0.9,

            mesh_message_deliveries_weight: -1.0,
            mesh_message_deliveries_decay: 0.9,
            mesh_message_deliveries_threshold: 20.0,
            mesh_message_deliveries_cap: 100.0,
            mesh_message_deliveries_activation: Duration::from_secs(5),

            mesh_failure_penalty_weight: -1.0,
            mesh_failure_penalty_decay: 0.9,

            invalid_message_deliveries_weight: -2.0,
            invalid_message_deliveries_decay: 0.9,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PeerScoreParams {
    pub topics: HashMap<Topic, TopicScoreParams>,
    /// Applied to a topic not present in `topics`, if any topic-scoped
    /// activity is observed for it.
    pub default_topic_params: Option<TopicScoreParams>,
    /// Caps the magnitude of the summed per-topic contribution, independent
    /// of each topic's own internal caps.
    pub topic_score_cap: f64,

    pub app_specific_weight: f64,

    pub ip_colocation_factor_weight: f64,
    pub ip_colocation_factor_threshold: f64,
    pub ip_colocation_whitelist: Vec<String>,

    pub behaviour_penalty_weight: f64,
    pub behaviour_penalty_threshold: f64,
    pub behaviour_penalty_decay: f64,

    pub decay_interval: Duration,
    pub decay_to_zero: f64,
    pub retain_score: Duration,
}

impl Default for PeerScoreParams {
    fn default() -> Self {
        Self {
            topics: HashMap::new(),
            default_topic_params: Some(TopicScoreParams::default()),
            topic_score_cap: 3600.0,

            app_specific_weight: 1.0,

            ip_colocation_factor_weight: -1.0,
            ip_colocation_factor_threshold: 1.0,
            ip_colocation_whitelist: Vec::new(),

            behaviour_penalty_weight: -10.0,
            behaviour_penalty_threshold: 0.0,
            behaviour_penalty_decay: 0.2,

            decay_interval: Duration::from_millis(DEFAULT_DECAY_INTERVAL_MS),
            decay_to_zero: 0.01,
            retain_score: Duration::from_millis(DEFAULT_RETAIN_SCORE_MS),
        }
    }
}

impl PeerScoreParams {
    pub fn topic_params(&self, topic: &Topic) -> Option<&TopicScoreParams> {
        self.topics.get(topic).or(self.default_topic_params.as_ref())
    }
}

#[derive(Debug, Clone)]
pub struct PeerScoreThresholds {
    pub gossip_threshold: f64,
    pub publish_threshold: f64,
    pub graylist_threshold: f64,
    pub accept_px_threshold: f64,
    pub opportunistic_graft_threshold: f64,
}

impl Default for PeerScoreThresholds {
    fn default() -> Self {
        Self {
            gossip_threshold: DEFAULT_GOSSIP_THRESHOLD,
            publish_threshold: DEFAULT_PUBLISH_THRESHOLD,
            graylist_threshold: DEFAULT_GRAYLIST_THRESHOLD,
            accept_px_threshold: DEFAULT_ACCEPT_PX_THRESHOLD,
            opportunistic_graft_threshold: DEFAULT_OPPORTUNISTIC_GRAFT_THRESHOLD,
        }
    }
}

/// `factor = decay_to_zero ^ (1 / ticks)`, the per-tick multiplicative decay
/// that takes a counter from its current value to `decay_to_zero` of itself
/// after `ticks` heartbeats. `ticks` is the counter's configured half-life in
/// ticks; callers pass each counter's own decay constant directly here since
/// the per-counter decay fields above already encode the per-tick factor.
pub fn decayed(value: f64, factor: f64, decay_to_zero: f64) -> f64 {
    let next = value * factor;
    if next.abs() < decay_to_zero {
        0.0
    } else {
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_thresholds_are_ordered() {
        let t = PeerScoreThresholds::default();
        assert!(t.graylist_threshold <= t.publish_threshold);
        assert!(t.publish_threshold <= t.gossip_threshold);
        assert!(t.gossip_threshold <= 0.0);
    }

    #[test]
    fn decay_snaps_to_zero_below_threshold() {
        let v = decayed(0.02, 0.5, 0.01);
        assert_eq!(v, 0.0);
    }

    #[test]
    fn decay_keeps_value_above_threshold() {
        let v = decayed(1.0, 0.9, 0.01);
        assert!((v - 0.9).abs() < 1e-9);
    }
}
