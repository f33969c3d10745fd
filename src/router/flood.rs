//! Pure-broadcast routing: every message goes to every subscribed, connected
//! peer. No mesh, no control block, no score-gated pruning.

use super::{RouterContext, RouterVariant};
use crate::frame::ControlBlock;
use crate::message::Message;
use crate::peer_io::OutboundItem;
use crate::types::{PeerId, Topic};

#[derive(Default)]
pub struct FloodRouter;

impl FloodRouter {
    pub fn new() -> Self {
        Self
    }

    fn broadcast(&self, ctx: &RouterContext, topic: &Topic, exclude: &PeerId, item: impl Fn() -> OutboundItem) -> Vec<(PeerId, OutboundItem)> {
        ctx.connected_subscribers(topic)
            .into_iter()
            .filter(|p| p != exclude)
            .map(|p| (p, item()))
            .collect()
    }
}

impl RouterVariant for FloodRouter {
    fn add_peer(&mut self, _ctx: &mut RouterContext, _peer: &PeerId) {}

    fn remove_peer(&mut self, _ctx: &mut RouterContext, _peer: &PeerId) {}

    fn join(&mut self, ctx: &mut RouterContext, topic: &Topic) -> Vec<(PeerId, OutboundItem)> {
        ctx.all_peer_ids()
            .into_iter()
            .map(|p| (p, OutboundItem::Subscription(topic.clone(), true)))
            .collect()
    }

    fn leave(&mut self, ctx: &mut RouterContext, topic: &Topic) -> Vec<(PeerId, OutboundItem)> {
        ctx.all_peer_ids()
            .into_iter()
            .map(|p| (p, OutboundItem::Subscription(topic.clone(), false)))
            .collect()
    }

    fn publish(&mut self, ctx: &mut RouterContext, message: &Message) -> Vec<(PeerId, OutboundItem)> {
        self.broadcast(ctx, &message.topic, &message.from, || OutboundItem::Message(message.clone()))
    }

    fn forward(&mut self, ctx: &mut RouterContext, from: &PeerId, message: &Message) -> Vec<(PeerId, OutboundItem)> {
        self.broadcast(ctx, &message.topic, from, || OutboundItem::Message(message.clone()))
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

    fn heartbeat(&mut self, _ctx: &mut RouterContext) -> Vec<(PeerId, OutboundItem)> {
        Vec::new()
    }

    fn enough_peers(&self, ctx: &RouterContext, topic: &Topic, suggested: usize) -> bool {
        let have = ctx.connected_subscribers(topic).len();
        if suggested == 0 {
            have > 0
        } else {
            have >= suggested
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::BackoffTable;
    use crate::mcache::MessageCache;
    use crate::mesh::{FanoutTable, MeshTable};
    use crate::peer::PeerRecord;
    use crate::score::{PeerScore, PeerScoreParams};
    use crate::tracing_hooks::default_sink;
    use crate::types::PeerProtocol;
    use std::collections::HashMap;
    use std::time::Instant;

    fn ctx_harness() -> (
        Config,
        HashMap<PeerId, PeerRecord>,
        MeshTable,
        FanoutTable,
        BackoffTable,
        PeerScore,
        MessageCache,
    ) {
        (
            Config::default(),
            HashMap::new(),
            MeshTable::new(),
            FanoutTable::new(),
            BackoffTable::new(),
            PeerScore::new(PeerScoreParams::default()),
            MessageCache::new(3, 5),
        )
    }

    use crate::config::Config;

    #[test]
    fn publish_reaches_every_subscriber_except_origin() {
        let (config, mut peers, mut mesh, mut fanout, mut backoff, mut score, mut mcache) = ctx_harness();
        let topic = Topic::new("t");
        let mut p1 = PeerRecord::new(PeerId(vec![1]), PeerProtocol::FloodOnly, false);
        p1.mark_subscribed(topic.clone());
        let mut p2 = PeerRecord::new(PeerId(vec![2]), PeerProtocol::FloodOnly, false);
        p2.mark_subscribed(topic.clone());
        peers.insert(PeerId(vec![1]), p1);
        peers.insert(PeerId(vec![2]), p2);

        let joined = vec![topic.clone()];
        let trace = default_sink();
        let mut ctx = RouterContext {
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
        let mut router = FloodRouter::new();
        let message = Message {
            from: PeerId(vec![1]),
            seqno: 1,
            data: vec![],
            topic: topic.clone(),
            signature: None,
            key: None,
        };
        let sends = router.publish(&mut ctx, &message);
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].0, PeerId(vec![2]));
    }
}
