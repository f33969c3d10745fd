//! Uniform random-subset fanout: no mesh maintenance protocol, just a
//! periodically refreshed uniformly-sampled peer set per topic.

use super::{sample_peers, RouterContext, RouterVariant};
use crate::frame::ControlBlock;
use crate::message::Message;
use crate::peer_io::OutboundItem;
use crate::types::{PeerId, Topic};

pub struct RandomFanoutRouter {
    target: usize,
}

impl RandomFanoutRouter {
    pub fn new() -> Self {
        Self { target: 0 }
    }

    fn refill(&self, ctx: &mut RouterContext, topic: &Topic) {
        let target = self.target_for(ctx);
        let now = ctx.now;
        let current_len = ctx.fanout.members(topic).map_or(0, |m| m.len());
        if current_len >= target {
            ctx.fanout.touch(topic, now);
            return;
        }
        let candidates = ctx.connected_subscribers(topic);
        let existing: Vec<PeerId> = ctx.fanout.members(topic).cloned().unwrap_or_default().into_iter().collect();
        let need = target - current_len;
        let pool: Vec<PeerId> = candidates.into_iter().filter(|p| !existing.contains(p)).collect();
        let chosen = sample_peers(&pool, &PeerId(Vec::new()), need);
        let set = ctx.fanout.ensure(topic.clone(), now);
        for peer in chosen {
            set.insert(peer);
        }
    }

    fn target_for(&self, ctx: &RouterContext) -> usize {
        if self.target == 0 {
            ctx.config.d
        } else {
            self.target
        }
    }
}

impl RouterVariant for RandomFanoutRouter {
    fn add_peer(&mut self, _ctx: &mut RouterContext, _peer: &PeerId) {}

    fn remove_peer(&mut self, ctx: &mut RouterContext, peer: &PeerId) {
        ctx.fanout.remove_peer_everywhere(peer);
    }

    fn join(&mut self, ctx: &mut RouterContext, topic: &Topic) -> Vec<(PeerId, OutboundItem)> {
        self.refill(ctx, topic);
        ctx.all_peer_ids()
            .into_iter()
            .map(|p| (p, OutboundItem::Subscription(topic.clone(), true)))
            .collect()
    }

    fn leave(&mut self, ctx: &mut RouterContext, topic: &Topic) -> Vec<(PeerId, OutboundItem)> {
        ctx.fanout.expire(ctx.now, std::time::Duration::ZERO);
        ctx.all_peer_ids()
            .into_iter()
            .map(|p| (p, OutboundItem::Subscription(topic.clone(), false)))
            .collect()
    }

    fn publish(&mut self, ctx: &mut RouterContext, message: &Message) -> Vec<(PeerId, OutboundItem)> {
        self.refill(ctx, &message.topic);
        ctx.fanout.touch(&message.topic, ctx.now);
        ctx.fanout
            .members(&message.topic)
            .into_iter()
            .flatten()
            .filter(|p| **p != message.from)
            .map(|p| (p.clone(), OutboundItem::Message(message.clone())))
            .collect()
    }

    fn forward(&mut self, ctx: &mut RouterContext, from: &PeerId, message: &Message) -> Vec<(PeerId, OutboundItem)> {
        self.refill(ctx, &message.topic);
        ctx.fanout.touch(&message.topic, ctx.now);
        ctx.fanout
            .members(&message.topic)
            .into_iter()
            .flatten()
            .filter(|p| *p != from)
            .map(|p| (p.clone(), OutboundItem::Message(message.clone())))
            .collect()
    }

    fn handle_control(
        &mut self,
        _ctx: &mut RouterContext,
        _from: &PeerId,
        _control: ControlBlock,
    ) -> Vec<(PeerId, OutboundItem)> {
        Vec::new()
    }

    fn handle_subscription(&mut self, ctx: &mut RouterContext, from: &PeerId, topic: &Topic, subscribe: bool) {
        if let Some(record) = ctx.peers.get_mut(from) {
            if subscribe {
                record.mark_subscribed(topic.clone());
            } else {
                record.mark_unsubscribed(topic);
            }
        }
    }

    fn heartbeat(&mut self, ctx: &mut RouterContext) -> Vec<(PeerId, OutboundItem)> {
        let topics: Vec<Topic> = ctx.joined_topics.to_vec();
        for topic in &topics {
            self.refill(ctx, topic);
        }
        ctx.fanout.expire(ctx.now, ctx.config.fanout_ttl);
        Vec::new()
    }

    /// Literal preserved semantics: with no suggestion, the bar is the
    /// variant's own configured target; with a suggestion, that suggestion
    /// replaces the bar outright rather than combining with the target.
    fn enough_peers(&self, ctx: &RouterContext, topic: &Topic, suggested: usize) -> bool {
        let have = ctx.fanout.members(topic).map_or(0, |m| m.len());
        if suggested == 0 {
            have >= self.target_for(ctx)
        } else {
            have >= suggested
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::BackoffTable;
    use crate::config::Config;
    use crate::mcache::MessageCache;
    use crate::mesh::{FanoutTable, MeshTable};
    use crate::score::{PeerScore, PeerScoreParams};
    use crate::tracing_hooks::default_sink;
    use std::collections::HashMap;
    use std::time::Instant;

    #[test]
    fn enough_peers_uses_target_when_suggestion_is_zero() {
        let config = Config::default();
        let mut peers = HashMap::new();
        let mut mesh = MeshTable::new();
        let mut fanout = FanoutTable::new();
        let mut backoff = BackoffTable::new();
        let mut score = PeerScore::new(PeerScoreParams::default());
        let mut mcache = MessageCache::new(3, 5);
        let topic = Topic::new("t");
        let joined = vec![topic.clone()];
        let trace = default_sink();
        let ctx = RouterContext {
            config: &config,
            peers: &mut peers,
            mesh: &mut mesh,
            fanout: &mut fanout,
            backoff: &mut backoff,
            score: &mut score,
            mcache: &mut mcache,
            joined_topics: &joined,
            trace: &trace,
            now: Instant::now(),
        };
        let router = RandomFanoutRouter::new();
        assert!(!router.enough_peers(&ctx, &topic, 0));
    }

    #[test]
    fn suggested_nonzero_overrides_target() {
        let config = Config::default();
        let mut peers = HashMap::new();
        let mut mesh = MeshTable::new();
        let mut fanout = FanoutTable::new();
        let mut backoff = BackoffTable::new();
        let mut score = PeerScore::new(PeerScoreParams::default());
        let mut mcache = MessageCache::new(3, 5);
        let topic = Topic::new("t");
        fanout.ensure(topic.clone(), Instant::now()).insert(PeerId(vec![1]));
        let joined = vec![topic.clone()];
        let trace = default_sink();
        let ctx = RouterContext {
            config: &config,
            peers: &mut peers,
            mesh: &mut mesh,
            fanout: &mut fanout,
            backoff: &mut backoff,
            score: &mut score,
            mcache: &mut mcache,
            joined_topics: &joined,
            trace: &trace,
            now: Instant::now(),
        };
        let router = RandomFanoutRouter::new();
        assert!(router.enough_peers(&ctx, &topic, 1));
        assert!(!router.enough_peers(&ctx, &topic, 2));
    }
}
