//! Full GRAFT/PRUNE/IHAVE/IWANT mesh maintenance.
//!
//! Heartbeat-driven mesh sizing (`d`/`d_lo`/`d_hi`/`d_score`/`d_out`),
//! lazy-push gossip to `d_lazy` non-mesh peers, opportunistic grafting when
//! the mesh's median score sags, and peer exchange on PRUNE are all
//! implemented here; the other two variants never touch any of it.

use super::{sample_peers, RouterContext, RouterVariant};
use crate::frame::{ControlBlock, PruneNotice};
use crate::message::Message;
use crate::peer_io::OutboundItem;
use crate::types::{PeerId, Topic};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Backoff applied whenever we PRUNE a peer ourselves or honor their
/// requested regraft delay. The reference protocol uses one minute; nothing
/// here depends on the exact value, it just needs to be long enough that a
/// pruned peer doesn't immediately re-GRAFT into a mesh that just rejected it.
const PRUNE_BACKOFF: Duration = Duration::from_secs(60);

pub struct GossipRouter {
    /// Times a given message has been retransmitted in response to IWANT,
    /// capped at `gossip_retransmission` regardless of how many peers ask.
    iwant_retransmissions: HashMap<crate::types::MessageId, u32>,
    /// Peers we've already sent an IWANT to this heartbeat, so a peer can't
    /// trigger a second round trip by splitting its IHAVE across multiple
    /// control blocks within the same window.
    ihave_responded: HashSet<PeerId>,
}

impl GossipRouter {
    pub fn new() -> Self {
        Self {
            iwant_retransmissions: HashMap::new(),
            ihave_responded: HashSet::new(),
        }
    }

    fn eligible_for_mesh(&self, ctx: &RouterContext, peer: &PeerId, topic: &Topic) -> bool {
        let Some(record) = ctx.peers.get(peer) else { return false };
        record.is_full_mesh()
            && record.subscribed_to(topic)
            && !ctx.mesh.contains(topic, peer)
            && !ctx.backoff.is_pending(topic, peer, ctx.now)
            && ctx.score.score(peer, ctx.now) >= ctx.config.score_thresholds.gossip_threshold
    }

    fn graft_peer(&self, ctx: &mut RouterContext, topic: &Topic, peer: &PeerId) -> (PeerId, OutboundItem) {
        ctx.mesh.insert(topic.clone(), peer.clone());
        ctx.score.graft(peer, topic, ctx.now);
        ctx.trace.emit(crate::tracing_hooks::TraceEvent::Grafted {
            topic: topic.clone(),
            peer: peer.clone(),
        });
        (peer.clone(), OutboundItem::Graft(topic.clone()))
    }

    fn prune_peer(&self, ctx: &mut RouterContext, topic: &Topic, peer: &PeerId, px: bool) -> (PeerId, OutboundItem) {
        ctx.mesh.remove(topic, peer);
        ctx.score.prune(peer, topic);
        ctx.backoff.set(topic.clone(), peer.clone(), ctx.now, PRUNE_BACKOFF);
        ctx.trace.emit(crate::tracing_hooks::TraceEvent::Pruned {
            topic: topic.clone(),
            peer: peer.clone(),
            backoff_ms: PRUNE_BACKOFF.as_millis() as u64,
        });
        let peers = if px {
            self.px_candidates(ctx, topic, peer)
        } else {
            Vec::new()
        };
        (
            peer.clone(),
            OutboundItem::Prune(PruneNotice {
                topic: topic.clone(),
                peers,
                backoff_ms: PRUNE_BACKOFF.as_millis() as u64,
            }),
        )
    }

    /// Peer exchange candidates offered on PRUNE: other mesh members for the
    /// same topic whose score clears `accept_px_threshold`, excluding the
    /// peer being pruned.
    fn px_candidates(&self, ctx: &RouterContext, topic: &Topic, exclude: &PeerId) -> Vec<crate::frame::PeerExchangePeer> {
        if ctx.score.score(exclude, ctx.now) < ctx.config.score_thresholds.accept_px_threshold {
            return Vec::new();
        }
        ctx.mesh
            .members(topic)
            .iter()
            .filter(|p| *p != exclude)
            .filter(|p| ctx.score.score(p, ctx.now) >= ctx.config.score_thresholds.accept_px_threshold)
            .take(crate::types::DEFAULT_OPPORTUNISTIC_GRAFT_PEERS)
            .map(|p| crate::frame::PeerExchangePeer {
                peer_id: p.clone(),
                signed_record: None,
            })
            .collect()
    }

    fn ensure_direct_peers_grafted(&self, ctx: &mut RouterContext, topic: &Topic) -> Vec<(PeerId, OutboundItem)> {
        let direct: Vec<PeerId> = ctx.config.direct_peers.clone();
        let mut out = Vec::new();
        for peer in direct {
            let connected_and_subscribed = ctx.peers.get(&peer).is_some_and(|p| p.subscribed_to(topic));
            if connected_and_subscribed && !ctx.mesh.contains(topic, &peer) {
                out.push(self.graft_peer(ctx, topic, &peer));
            }
        }
        out
    }
}

impl RouterVariant for GossipRouter {
    fn add_peer(&mut self, _ctx: &mut RouterContext, _peer: &PeerId) {}

    fn remove_peer(&mut self, ctx: &mut RouterContext, peer: &PeerId) {
        ctx.mesh.remove_peer_everywhere(peer);
        ctx.fanout.remove_peer_everywhere(peer);
    }

    fn join(&mut self, ctx: &mut RouterContext, topic: &Topic) -> Vec<(PeerId, OutboundItem)> {
        let mut out: Vec<(PeerId, OutboundItem)> = ctx
            .all_peer_ids()
            .into_iter()
            .map(|p| (p, OutboundItem::Subscription(topic.clone(), true)))
            .collect();

        // Prefer migrating existing fanout peers for this topic straight into
        // the mesh, the same shortcut the reference protocol takes on JOIN.
        if let Some(fanout_members) = ctx.fanout.members(topic).cloned() {
            for peer in fanout_members.iter().take(ctx.config.d) {
                if self.eligible_for_mesh(ctx, peer, topic) {
                    out.push(self.graft_peer(ctx, topic, peer));
                }
            }
        }
        let need = ctx.config.d.saturating_sub(ctx.mesh.len(topic));
        if need > 0 {
            let candidates: Vec<PeerId> = ctx
                .peers
                .values()
                .filter(|p| self.eligible_for_mesh(ctx, &p.id, topic))
                .map(|p| p.id.clone())
                .collect();
            let chosen = sample_peers(&candidates, &PeerId(Vec::new()), need);
            for peer in chosen {
                out.push(self.graft_peer(ctx, topic, &peer));
            }
        }
        out
    }

    fn leave(&mut self, ctx: &mut RouterContext, topic: &Topic) -> Vec<(PeerId, OutboundItem)> {
        let members: Vec<PeerId> = ctx.mesh.members(topic).iter().cloned().collect();
        let mut out: Vec<(PeerId, OutboundItem)> = members
            .iter()
            .map(|peer| self.prune_peer(ctx, topic, peer, false))
            .collect();
        ctx.mesh.drop_topic(topic);
        out.extend(
            ctx.all_peer_ids()
                .into_iter()
                .map(|p| (p, OutboundItem::Subscription(topic.clone(), false))),
        );
        out
    }

    fn publish(&mut self, ctx: &mut RouterContext, message: &Message) -> Vec<(PeerId, OutboundItem)> {
        let id = crate::message::default_message_id(message);
        ctx.mcache.put(id, message.clone(), message.topic.clone());

        if ctx.mesh.len(&message.topic) > 0 {
            return ctx
                .mesh
                .members(&message.topic)
                .iter()
                .filter(|p| **p != message.from)
                .map(|p| (p.clone(), OutboundItem::Message(message.clone())))
                .collect();
        }

        // Not joined (or mesh empty): fall back to a sampled fanout, exactly
        // as random-fanout would, so publishing into an unjoined topic still
        // reaches someone.
        let target = ctx.config.d;
        let current_len = ctx.fanout.members(&message.topic).map_or(0, |m| m.len());
        if current_len < target {
            let candidates = ctx.connected_subscribers(&message.topic);
            let existing: Vec<PeerId> = ctx.fanout.members(&message.topic).cloned().unwrap_or_default().into_iter().collect();
            let pool: Vec<PeerId> = candidates.into_iter().filter(|p| !existing.contains(p)).collect();
            let chosen = sample_peers(&pool, &message.from, target - current_len);
            let set = ctx.fanout.ensure(message.topic.clone(), ctx.now);
            for peer in chosen {
                set.insert(peer);
            }
        }
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
        let id = crate::message::default_message_id(message);
        ctx.mcache.put(id, message.clone(), message.topic.clone());
        ctx.mesh
            .members(&message.topic)
            .iter()
            .filter(|p| *p != from)
            .map(|p| (p.clone(), OutboundItem::Message(message.clone())))
            .collect()
    }

    fn handle_control(
        &mut self,
        ctx: &mut RouterContext,
        from: &PeerId,
        control: ControlBlock,
    ) -> Vec<(PeerId, OutboundItem)> {
        let mut out = Vec::new();

        for topic in control.graft {
            let graylisted = ctx.score.score(from, ctx.now) < ctx.config.score_thresholds.graylist_threshold;
            let joined = ctx.is_locally_joined(&topic);
            if graylisted || !joined || ctx.backoff.is_pending(&topic, from, ctx.now) {
                out.push(self.prune_peer(ctx, &topic, from, false));
                continue;
            }
            if ctx.mesh.len(&topic) >= ctx.config.d_hi {
                out.push(self.prune_peer(ctx, &topic, from, true));
                continue;
            }
            out.push(self.graft_peer(ctx, &topic, from));
        }

        for notice in control.prune {
            ctx.mesh.remove(&notice.topic, from);
            ctx.score.prune(from, &notice.topic);
            ctx.backoff.set(
                notice.topic.clone(),
                from.clone(),
                ctx.now,
                Duration::from_millis(notice.backoff_ms),
            );
            if !notice.peers.is_empty() {
                ctx.trace.emit(crate::tracing_hooks::TraceEvent::PeerExchange {
                    from: from.clone(),
                    candidates: notice.peers.len(),
                });
            }
        }

        for (topic, ids) in control.ihave {
            if !ctx.is_locally_joined(&topic) {
                continue;
            }
            if ctx.score.score(from, ctx.now) < ctx.config.score_thresholds.gossip_threshold {
                continue;
            }
            if ids.len() > ctx.config.max_ihave_length {
                let excess = (ids.len() - ctx.config.max_ihave_length) as f64;
                ctx.score.add_behaviour_penalty(from, excess);
            }
            if self.ihave_responded.contains(from) {
                continue;
            }
            let capped: Vec<_> = ids.into_iter().take(ctx.config.max_ihave_length).collect();
            let wanted: Vec<_> = capped.into_iter().filter(|id| ctx.mcache.get(id).is_none()).collect();
            if !wanted.is_empty() {
                self.ihave_responded.insert(from.clone());
                out.push((from.clone(), OutboundItem::Iwant(wanted)));
            }
        }

        for id in control.iwant {
            let count = self.iwant_retransmissions.entry(id.clone()).or_insert(0);
            if *count >= ctx.config.gossip_retransmission {
                continue;
            }
            if let Some(message) = ctx.mcache.get(&id) {
                *count += 1;
                out.push((from.clone(), OutboundItem::Message(message.clone())));
            }
        }

        out
    }

    fn handle_subscription(&mut self, ctx: &mut RouterContext, from: &PeerId, topic: &Topic, subscribe: bool) {
        if let Some(record) = ctx.peers.get_mut(from) {
            if subscribe {
                record.mark_subscribed(topic.clone());
            } else {
                record.mark_unsubscribed(topic);
                ctx.mesh.remove(topic, from);
            }
        }
    }

    fn heartbeat(&mut self, ctx: &mut RouterContext) -> Vec<(PeerId, OutboundItem)> {
        let mut out = Vec::new();
        ctx.backoff.gc(ctx.now);
        let topics: Vec<Topic> = ctx.joined_topics.to_vec();

        for topic in &topics {
            out.extend(self.ensure_direct_peers_grafted(ctx, topic));

            // Drop graylisted members outright, regardless of mesh size.
            let graylisted: Vec<PeerId> = ctx
                .mesh
                .members(topic)
                .iter()
                .filter(|p| ctx.score.score(p, ctx.now) < ctx.config.score_thresholds.graylist_threshold)
                .cloned()
                .collect();
            for peer in &graylisted {
                out.push(self.prune_peer(ctx, topic, peer, false));
            }

            if ctx.mesh.len(topic) < ctx.config.d_lo {
                let need = ctx.config.d - ctx.mesh.len(topic);
                let candidates: Vec<PeerId> = ctx
                    .peers
                    .values()
                    .filter(|p| self.eligible_for_mesh(ctx, &p.id, topic))
                    .map(|p| p.id.clone())
                    .collect();
                let chosen = sample_peers(&candidates, &PeerId(Vec::new()), need);
                for peer in chosen {
                    out.push(self.graft_peer(ctx, topic, &peer));
                }
            } else if ctx.mesh.len(topic) > ctx.config.d_hi {
                let mut members: Vec<PeerId> = ctx.mesh.members(topic).iter().cloned().collect();
                members.sort_by(|a, b| {
                    ctx.score
                        .score(b, ctx.now)
                        .partial_cmp(&ctx.score.score(a, ctx.now))
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                let direct: std::collections::HashSet<&PeerId> = ctx.config.direct_peers.iter().collect();
                for peer in members.into_iter().skip(ctx.config.d).filter(|p| !direct.contains(p)) {
                    out.push(self.prune_peer(ctx, topic, &peer, true));
                }
            }

            if ctx.mesh.len(topic) > 1 {
                let mut scores: Vec<f64> = ctx.mesh.members(topic).iter().map(|p| ctx.score.score(p, ctx.now)).collect();
                scores.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                let median = scores[scores.len() / 2];
                if median < ctx.config.score_thresholds.opportunistic_graft_threshold {
                    let candidates: Vec<PeerId> = ctx
                        .peers
                        .values()
                        .filter(|p| {
                            self.eligible_for_mesh(ctx, &p.id, topic) && ctx.score.score(&p.id, ctx.now) > median
                        })
                        .map(|p| p.id.clone())
                        .collect();
                    let chosen = sample_peers(
                        &candidates,
                        &PeerId(Vec::new()),
                        crate::types::DEFAULT_OPPORTUNISTIC_GRAFT_PEERS,
                    );
                    let added = chosen.len();
                    for peer in chosen {
                        out.push(self.graft_peer(ctx, topic, &peer));
                    }
                    if added > 0 {
                        ctx.trace.emit(crate::tracing_hooks::TraceEvent::OpportunisticGraft {
                            topic: topic.clone(),
                            added,
                        });
                    }
                }
            }

            // Lazy-push IHAVE gossip to a fraction of non-mesh subscribers.
            let non_mesh: Vec<PeerId> = ctx
                .connected_subscribers(topic)
                .into_iter()
                .filter(|p| !ctx.mesh.contains(topic, p))
                .collect();
            let lazy_count = ((non_mesh.len() as f64) * ctx.config.gossip_factor).ceil() as usize;
            let lazy_count = lazy_count.max(ctx.config.d_lazy.min(non_mesh.len()));
            let ids = ctx.mcache.gossip_ids(topic);
            if !ids.is_empty() {
                for peer in sample_peers(&non_mesh, &PeerId(Vec::new()), lazy_count) {
                    out.push((peer, OutboundItem::Ihave(topic.clone(), ids.clone())));
                }
            }

            if ctx.mesh.len(topic) > 0 {
                ctx.trace.emit(crate::tracing_hooks::TraceEvent::MeshRepaired {
                    topic: topic.clone(),
                    size: ctx.mesh.len(topic),
                });
            }
        }

        ctx.fanout.expire(ctx.now, ctx.config.fanout_ttl);
        ctx.score.activate_mesh_message_deliveries(ctx.now);
        self.iwant_retransmissions.clear();
        self.ihave_responded.clear();
        out
    }

    fn enough_peers(&self, ctx: &RouterContext, topic: &Topic, suggested: usize) -> bool {
        let have = ctx.mesh.len(topic);
        if suggested == 0 {
            have >= ctx.config.d_lo
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
    use crate::peer::PeerRecord;
    use crate::score::{PeerScore, PeerScoreParams};
    use crate::tracing_hooks::default_sink;
    use crate::types::PeerProtocol;
    use std::collections::HashMap;
    use std::time::Instant;

    struct Harness {
        config: Config,
        peers: HashMap<PeerId, PeerRecord>,
        mesh: MeshTable,
        fanout: FanoutTable,
        backoff: BackoffTable,
        score: PeerScore,
        mcache: MessageCache,
        joined: Vec<Topic>,
        trace: std::sync::Arc<dyn crate::tracing_hooks::TraceSink>,
    }

    impl Harness {
        fn new(joined: Vec<Topic>) -> Self {
            Self {
                config: Config::default(),
                peers: HashMap::new(),
                mesh: MeshTable::new(),
                fanout: FanoutTable::new(),
                backoff: BackoffTable::new(),
                score: PeerScore::new(PeerScoreParams::default()),
                mcache: MessageCache::new(3, 5),
                joined,
                trace: default_sink(),
            }
        }

        fn ctx(&mut self) -> RouterContext<'_> {
            RouterContext {
                config: &self.config,
                peers: &mut self.peers,
                mesh: &mut self.mesh,
                fanout: &mut self.fanout,
                backoff: &mut self.backoff,
                score: &mut self.score,
                mcache: &mut self.mcache,
                joined_topics: &self.joined,
                trace: &self.trace,
                now: Instant::now(),
            }
        }
    }

    fn connect(h: &mut Harness, id: u8, topic: &Topic) {
        let peer = PeerId(vec![id]);
        let mut record = PeerRecord::new(peer.clone(), PeerProtocol::FullMesh, false);
        record.mark_subscribed(topic.clone());
        h.peers.insert(peer.clone(), record);
        h.score.add_peer(peer, None, Instant::now());
    }

    #[test]
    fn join_grafts_up_to_target() {
        let topic = Topic::new("t");
        let mut h = Harness::new(vec![topic.clone()]);
        for i in 1..=8u8 {
            connect(&mut h, i, &topic);
        }
        let mut router = GossipRouter::new();
        let mut ctx = h.ctx();
        router.join(&mut ctx, &topic);
        assert_eq!(h.mesh.len(&topic), h.config.d);
    }

    #[test]
    fn publish_reaches_mesh_members_only() {
        let topic = Topic::new("t");
        let mut h = Harness::new(vec![topic.clone()]);
        connect(&mut h, 1, &topic);
        connect(&mut h, 2, &topic);
        h.mesh.insert(topic.clone(), PeerId(vec![1]));
        let mut router = GossipRouter::new();
        let mut ctx = h.ctx();
        let message = Message {
            from: PeerId(vec![9]),
            seqno: 1,
            data: vec![],
            topic: topic.clone(),
            signature: None,
            key: None,
        };
        let sends = router.publish(&mut ctx, &message);
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].0, PeerId(vec![1]));
    }

    #[test]
    fn graft_from_graylisted_peer_is_pruned() {
        let topic = Topic::new("t");
        let mut h = Harness::new(vec![topic.clone()]);
        connect(&mut h, 1, &topic);
        for _ in 0..1000 {
            h.score.mark_invalid_message_delivery(&PeerId(vec![1]), &topic);
        }
        let mut router = GossipRouter::new();
        let mut ctx = h.ctx();
        let control = ControlBlock {
            graft: vec![topic.clone()],
            ..Default::default()
        };
        let out = router.handle_control(&mut ctx, &PeerId(vec![1]), control);
        assert!(matches!(out[0].1, OutboundItem::Prune(_)));
        assert!(!h.mesh.contains(&topic, &PeerId(vec![1])));
    }

    #[test]
    fn ihave_for_unjoined_topic_is_ignored() {
        let topic = Topic::new("t");
        let other = Topic::new("other");
        let mut h = Harness::new(vec![topic.clone()]);
        connect(&mut h, 1, &topic);
        let mut router = GossipRouter::new();
        let mut ctx = h.ctx();
        let control = ControlBlock {
            ihave: vec![(other, vec![crate::types::MessageId(vec![1])])],
            ..Default::default()
        };
        let out = router.handle_control(&mut ctx, &PeerId(vec![1]), control);
        assert!(out.is_empty());
    }

    #[test]
    fn ihave_from_sub_threshold_peer_is_ignored() {
        let topic = Topic::new("t");
        let mut h = Harness::new(vec![topic.clone()]);
        connect(&mut h, 1, &topic);
        for _ in 0..1000 {
            h.score.mark_invalid_message_delivery(&PeerId(vec![1]), &topic);
        }
        let mut router = GossipRouter::new();
        let mut ctx = h.ctx();
        let control = ControlBlock {
            ihave: vec![(topic, vec![crate::types::MessageId(vec![1])])],
            ..Default::default()
        };
        let out = router.handle_control(&mut ctx, &PeerId(vec![1]), control);
        assert!(out.is_empty());
    }

    #[test]
    fn second_ihave_in_same_heartbeat_does_not_trigger_another_iwant() {
        let topic = Topic::new("t");
        let mut h = Harness::new(vec![topic.clone()]);
        connect(&mut h, 1, &topic);
        let mut router = GossipRouter::new();
        let control = ControlBlock {
            ihave: vec![(topic.clone(), vec![crate::types::MessageId(vec![1])])],
            ..Default::default()
        };
        let out_first = router.handle_control(&mut h.ctx(), &PeerId(vec![1]), control.clone());
        assert_eq!(out_first.len(), 1);
        let out_second = router.handle_control(&mut h.ctx(), &PeerId(vec![1]), control);
        assert!(out_second.is_empty());
    }

    #[test]
    fn iwant_is_fulfilled_from_mcache() {
        let topic = Topic::new("t");
        let mut h = Harness::new(vec![topic.clone()]);
        connect(&mut h, 1, &topic);
        let message = Message {
            from: PeerId(vec![9]),
            seqno: 1,
            data: b"hi".to_vec(),
            topic: topic.clone(),
            signature: None,
            key: None,
        };
        let id = crate::message::default_message_id(&message);
        h.mcache.put(id.clone(), message, topic.clone());
        let mut router = GossipRouter::new();
        let mut ctx = h.ctx();
        let control = ControlBlock {
            iwant: vec![id],
            ..Default::default()
        };
        let out = router.handle_control(&mut ctx, &PeerId(vec![1]), control);
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0].1, OutboundItem::Message(_)));
    }
}
