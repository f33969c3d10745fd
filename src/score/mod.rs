//! Per-peer, per-topic score computation (P1-P7) and decay.
//!
//! Heavily grounded on
//! `examples/shapengw-rust-libp2p/protocols/gossipsub/src/peer_score/mod.rs`
//! (`PeerScore`, `PeerStats`, `TopicStats`, `deliver_message`,
//! `mark_first_message_delivery`, `refresh_scores`), restructured so the
//! event loop owns this state directly (a plain struct, mutated in place)
//! rather than a standalone component behind a lock.

pub mod params;

pub use params::{decayed, PeerScoreParams, PeerScoreThresholds, TopicScoreParams};

use crate::types::{PeerId, Topic};
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Default)]
struct TopicStats {
    in_mesh: bool,
    graft_time: Option<Instant>,
    mesh_time: Duration,
    first_message_deliveries: f64,
    mesh_message_deliveries: f64,
    mesh_message_deliveries_active: bool,
    mesh_failure_penalty: f64,
    invalid_message_deliveries: f64,
}

struct PeerStats {
    topics: HashMap<Topic, TopicStats>,
    /// Opaque colocation key (e.g. subnet string) supplied by the host at
    /// `add_peer`; peers sharing a key count against each other's P6.
    colocation_key: Option<String>,
    app_specific_score: f64,
    behaviour_penalty: f64,
    connected_at: Instant,
    /// Set when the peer disconnects; the record is purged once
    /// `now - disconnected_at > retain_score`.
    disconnected_at: Option<Instant>,
}

impl PeerStats {
    fn new(colocation_key: Option<String>, now: Instant) -> Self {
        Self {
            topics: HashMap::new(),
            colocation_key,
            app_specific_score: 0.0,
            behaviour_penalty: 0.0,
            connected_at: now,
        disconnected_at: None,
        }
    }
}

pub struct PeerScore {
    params: PeerScoreParams,
    peers: HashMap<PeerId, PeerStats>,
}

impl PeerScore {
    pub fn new(params: PeerScoreParams) -> Self {
        Self {
            params,
            peers: HashMap::new(),
        }
    }

    pub fn add_peer(&mut self, peer: PeerId, colocation_key: Option<String>, now: Instant) {
        self.peers
            .entry(peer)
            .and_modify(|p| p.disconnected_at = None)
            .or_insert_with(|| PeerStats::new(colocation_key, now));
    }

    /// Mark a peer disconnected; its score state survives for `retain_score`.
    pub fn remove_peer(&mut self, peer: &PeerId, now: Instant) {
        if let Some(stats) = self.peers.get_mut(peer) {
            stats.disconnected_at = Some(now);
            for t in stats.topics.values_mut() {
                t.in_mesh = false;
                t.graft_time = None;
            }
        }
    }

    pub fn set_application_score(&mut self, peer: &PeerId, score: f64) {
        if let Some(stats) = self.peers.get_mut(peer) {
            stats.app_specific_score = score;
        }
    }

    pub fn add_behaviour_penalty(&mut self, peer: &PeerId, amount: f64) {
        if let Some(stats) = self.peers.get_mut(peer) {
            stats.behaviour_penalty += amount;
        }
    }

    pub fn graft(&mut self, peer: &PeerId, topic: &Topic, now: Instant) {
        let Some(stats) = self.peers.get_mut(peer) else { return };
        let entry = stats.topics.entry(topic.clone()).or_default();
        entry.in_mesh = true;
        entry.graft_time = Some(now);
        entry.mesh_message_deliveries_active = false;
    }

    /// Handle a prune: if the peer had a deficit against
    /// `mesh_message_deliveries_threshold` while active, penalize via P3b.
    pub fn prune(&mut self, peer: &PeerId, topic: &Topic) {
        let Some(topic_params) = self.params.topic_params(topic).cloned() else { return };
        let Some(stats) = self.peers.get_mut(peer) else { return };
        let Some(entry) = stats.topics.get_mut(topic) else { return };
        if entry.mesh_message_deliveries_active
            && entry.mesh_message_deliveries < topic_params.mesh_message_deliveries_threshold
        {
            let deficit = topic_params.mesh_message_deliveries_threshold - entry.mesh_message_deliveries;
            entry.mesh_failure_penalty += deficit * deficit;
        }
        entry.in_mesh = false;
        entry.graft_time = None;
        entry.mesh_message_deliveries_active = false;
    }

    pub fn mark_first_message_delivery(&mut self, peer: &PeerId, topic: &Topic) {
        let Some(topic_params) = self.params.topic_params(topic).cloned() else { return };
        let Some(stats) = self.peers.get_mut(peer) else { return };
        let entry = stats.topics.entry(topic.clone()).or_default();
        entry.first_message_deliveries =
            (entry.first_message_deliveries + 1.0).min(topic_params.first_message_deliveries_cap);
        if entry.in_mesh {
            entry.mesh_message_deliveries =
                (entry.mesh_message_deliveries + 1.0).min(topic_params.mesh_message_deliveries_cap);
        }
    }

    pub fn mark_duplicate_message_delivery(&mut self, peer: &PeerId, topic: &Topic) {
        let Some(topic_params) = self.params.topic_params(topic).cloned() else { return };
        let Some(stats) = self.peers.get_mut(peer) else { return };
        let entry = stats.topics.entry(topic.clone()).or_default();
        if entry.in_mesh {
            entry.mesh_message_deliveries =
                (entry.mesh_message_deliveries + 1.0).min(topic_params.mesh_message_deliveries_cap);
        }
    }

    pub fn mark_invalid_message_delivery(&mut self, peer: &PeerId, topic: &Topic) {
        let Some(stats) = self.peers.get_mut(peer) else { return };
        let entry = stats.topics.entry(topic.clone()).or_default();
        entry.invalid_message_deliveries += 1.0;
    }

    /// Compute the current score for `peer`. Absent peers score 0.0.
    pub fn score(&self, peer: &PeerId, now: Instant) -> f64 {
        let Some(stats) = self.peers.get(peer) else { return 0.0 };
        let mut total = 0.0;

        for (topic, entry) in &stats.topics {
            let Some(tp) = self.params.topic_params(topic) else { continue };
            let mut topic_score = 0.0;

            let mesh_time = if entry.in_mesh {
                entry.mesh_time
                    + entry
                        .graft_time
                        .map(|g| now.saturating_duration_since(g))
                        .unwrap_or_default()
            } else {
                entry.mesh_time
            };
            let quantum = tp.time_in_mesh_quantum.as_secs_f64().max(1e-9);
            let p1 = (mesh_time.as_secs_f64() / quantum).min(tp.time_in_mesh_cap);
            topic_score += p1 * tp.time_in_mesh_weight;

            let p2 = entry.first_message_deliveries.min(tp.first_message_deliveries_cap);
            topic_score += p2 * tp.first_message_deliveries_weight;

            if entry.mesh_message_deliveries_active {
                let deficit =
                    (tp.mesh_message_deliveries_threshold - entry.mesh_message_deliveries).max(0.0);
                topic_score += deficit * deficit * tp.mesh_message_deliveries_weight;
            }

            topic_score += entry.mesh_failure_penalty * tp.mesh_failure_penalty_weight;
            topic_score +=
                entry.invalid_message_deliveries * entry.invalid_message_deliveries * tp.invalid_message_deliveries_weight;

            total += (topic_score * tp.topic_weight).clamp(-self.params.topic_score_cap, self.params.topic_score_cap);
        }

        total += stats.app_specific_score * self.params.app_specific_weight;

        if let Some(key) = &stats.colocation_key {
            if !self.params.ip_colocation_whitelist.contains(key) {
                let colocated = self
                    .peers
                    .values()
                    .filter(|p| p.colocation_key.as_deref() == Some(key.as_str()))
                    .count() as f64;
                let excess = (colocated - self.params.ip_colocation_factor_threshold).max(0.0);
                total += excess * excess * self.params.ip_colocation_factor_weight;
            }
        }

        let behaviour_excess = (stats.behaviour_penalty - self.params.behaviour_penalty_threshold).max(0.0);
        total += behaviour_excess * behaviour_excess * self.params.behaviour_penalty_weight;

        total
    }

    /// Activate P3 for any (peer, topic) that has been continuously grafted
    /// for at least `mesh_message_deliveries_activation`. Call once per
    /// heartbeat before scoring.
    pub fn activate_mesh_message_deliveries(&mut self, now: Instant) {
        for stats in self.peers.values_mut() {
            for (topic, entry) in stats.topics.iter_mut() {
                if !entry.in_mesh || entry.mesh_message_deliveries_active {
                    continue;
                }
                let Some(tp) = self.params.topics.get(topic).or(self.params.default_topic_params.as_ref()) else {
                    continue;
                };
                if let Some(graft_time) = entry.graft_time {
                    if now.saturating_duration_since(graft_time) >= tp.mesh_message_deliveries_activation {
                        entry.mesh_message_deliveries_active = true;
                    }
                }
            }
        }
    }

    /// Multiplicative decay of every counter, and accrual of time-in-mesh,
    /// snapping each counter to zero once it is below `decay_to_zero`. Also
    /// purges disconnected peers past `retain_score`. Called once per
    /// `decay_interval`.
    pub fn decay_tick(&mut self, now: Instant, tick: Duration) {
        let decay_to_zero = self.params.decay_to_zero;
        let retain_score = self.params.retain_score;

        self.peers.retain(|_, stats| {
            stats
                .disconnected_at
                .is_none_or(|d| now.saturating_duration_since(d) <= retain_score)
        });

        for (peer_topics_owner, stats) in self.peers.iter_mut() {
            let _ = peer_topics_owner;
            stats.behaviour_penalty =
                decayed(stats.behaviour_penalty, self.params.behaviour_penalty_decay, decay_to_zero);

            for (topic, entry) in stats.topics.iter_mut() {
                let Some(tp) = self.params.topics.get(topic).or(self.params.default_topic_params.as_ref()) else {
                    continue;
                };
                if entry.in_mesh {
                    entry.mesh_time += tick;
                }
                entry.first_message_deliveries =
                    decayed(entry.first_message_deliveries, tp.first_message_deliveries_decay, decay_to_zero);
                entry.mesh_message_deliveries =
                    decayed(entry.mesh_message_deliveries, tp.mesh_message_deliveries_decay, decay_to_zero);
                entry.mesh_failure_penalty =
                    decayed(entry.mesh_failure_penalty, tp.mesh_failure_penalty_decay, decay_to_zero);
                entry.invalid_message_deliveries = decayed(
                    entry.invalid_message_deliveries,
                    tp.invalid_message_deliveries_decay,
                    decay_to_zero,
                );
            }
        }
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.peers.contains_key(peer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(n: u8) -> PeerId {
        PeerId(vec![n])
    }

    #[test]
    fn fresh_peer_scores_zero() {
        let score = PeerScore::new(PeerScoreParams::default());
        assert_eq!(score.score(&peer(1), Instant::now()), 0.0);
    }

    #[test]
    fn first_message_delivery_increases_score() {
        let mut score = PeerScore::new(PeerScoreParams::default());
        let now = Instant::now();
        let topic = Topic::new("t");
        score.add_peer(peer(1), None, now);
        score.graft(&peer(1), &topic, now);
        score.mark_first_message_delivery(&peer(1), &topic);
        assert!(score.score(&peer(1), now) > 0.0);
    }

    #[test]
    fn invalid_deliveries_drive_score_negative() {
        let mut score = PeerScore::new(PeerScoreParams::default());
        let now = Instant::now();
        let topic = Topic::new("t");
        score.add_peer(peer(1), None, now);
        for _ in 0..10 {
            score.mark_invalid_message_delivery(&peer(1), &topic);
        }
        assert!(score.score(&peer(1), now) < 0.0);
    }

    #[test]
    fn prune_with_deficit_applies_mesh_failure_penalty() {
        let mut score = PeerScore::new(PeerScoreParams::default());
        let now = Instant::now();
        let topic = Topic::new("t");
        score.add_peer(peer(1), None, now);
        score.graft(&peer(1), &topic, now);
        score.activate_mesh_message_deliveries(now + Duration::from_secs(10));
        score.prune(&peer(1), &topic);
        let after = score.score(&peer(1), now + Duration::from_secs(10));
        assert!(after < 0.0);
    }

    #[test]
    fn retain_score_purges_after_window() {
        let mut params = PeerScoreParams::default();
        params.retain_score = Duration::from_millis(10);
        let mut score = PeerScore::new(params);
        let now = Instant::now();
        score.add_peer(peer(1), None, now);
        score.remove_peer(&peer(1), now);
        score.decay_tick(now + Duration::from_millis(100), Duration::from_millis(100));
        assert!(!score.contains(&peer(1)));
    }

    #[test]
    fn ip_colocation_penalizes_beyond_threshold() {
        let mut params = PeerScoreParams::default();
        params.ip_colocation_factor_threshold = 1.0;
        let mut score = PeerScore::new(params);
        let now = Instant::now();
        score.add_peer(peer(1), Some("1.2.3.0/24".into()), now);
        score.add_peer(peer(2), Some("1.2.3.0/24".into()), now);
        score.add_peer(peer(3), Some("1.2.3.0/24".into()), now);
        assert!(score.score(&peer(1), now) < 0.0);
    }
}
