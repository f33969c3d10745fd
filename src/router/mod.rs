//! Tagged-variant router dispatch: gossip mesh, pure flood, or random fanout.
//!
//! The capability surface (`RouterVariant`) is the same across all three; the
//! event loop never matches on which variant is active, it just calls the
//! trait methods and executes whatever sends come back.

mod flood;
mod gossip;
mod random_fanout;

pub use flood::FloodRouter;
pub use gossip::GossipRouter;
pub use random_fanout::RandomFanoutRouter;

use crate::backoff::BackoffTable;
use crate::config::Config;
use crate::frame::ControlBlock;
use crate::mcache::MessageCache;
use crate::mesh::{FanoutTable, MeshTable};
use crate::message::Message;
use crate::peer::PeerRecord;
use crate::peer_io::OutboundItem;
use crate::score::PeerScore;
use crate::tracing_hooks::TraceSink;
use crate::types::{PeerId, Topic};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Mutable state every router variant is allowed to touch. Owned by the
/// event loop; borrowed fresh for each call.
pub struct RouterContext<'a> {
    pub config: &'a Config,
    pub peers: &'a mut HashMap<PeerId, PeerRecord>,
    pub mesh: &'a mut MeshTable,
    pub fanout: &'a mut FanoutTable,
    pub backoff: &'a mut BackoffTable,
    pub score: &'a mut PeerScore,
    pub mcache: &'a mut MessageCache,
    pub joined_topics: &'a [Topic],
    pub trace: &'a Arc<dyn TraceSink>,
    pub now: Instant,
}

impl RouterContext<'_> {
    pub fn is_locally_joined(&self, topic: &Topic) -> bool {
        self.joined_topics.contains(topic)
    }

    fn connected_subscribers(&self, topic: &Topic) -> Vec<PeerId> {
        self.peers
            .values()
            .filter(|p| p.subscribed_to(topic))
            .map(|p| p.id.clone())
            .collect()
    }

    pub fn all_peer_ids(&self) -> Vec<PeerId> {
        self.peers.keys().cloned().collect()
    }
}

/// Capability surface every routing variant implements. Method names mirror
/// the operations the event loop issues: `AddPeer`/`RemovePeer` on transport
/// events, `Join`/`Leave`/`Publish` on local commands, `HandleRPC`-equivalent
/// split into `forward`/`handle_control`/`handle_subscription` so the event
/// loop can run dedup and validation between receiving a frame and asking the
/// router to act on it, and `Heartbeat`/`EnoughPeers` for periodic maintenance.
pub trait RouterVariant: Send {
    fn add_peer(&mut self, ctx: &mut RouterContext, peer: &PeerId);
    fn remove_peer(&mut self, ctx: &mut RouterContext, peer: &PeerId);
    fn join(&mut self, ctx: &mut RouterContext, topic: &Topic) -> Vec<(PeerId, OutboundItem)>;
    fn leave(&mut self, ctx: &mut RouterContext, topic: &Topic) -> Vec<(PeerId, OutboundItem)>;
    fn publish(&mut self, ctx: &mut RouterContext, message: &Message) -> Vec<(PeerId, OutboundItem)>;
    /// Fan out an already-accepted, already-deduplicated message to whatever
    /// peers this variant forwards to (excluding `from`).
    fn forward(&mut self, ctx: &mut RouterContext, from: &PeerId, message: &Message) -> Vec<(PeerId, OutboundItem)>;
    /// Handle a received GRAFT/PRUNE/IHAVE/IWANT block. Flood and
    /// random-fanout ignore this entirely.
    fn handle_control(
        &mut self,
        ctx: &mut RouterContext,
        from: &PeerId,
        control: ControlBlock,
    ) -> Vec<(PeerId, OutboundItem)>;
    fn handle_subscription(&mut self, ctx: &mut RouterContext, from: &PeerId, topic: &Topic, subscribe: bool);
    fn heartbeat(&mut self, ctx: &mut RouterContext) -> Vec<(PeerId, OutboundItem)>;
    /// Whether the given topic currently has enough peers to stop actively
    /// seeking more. `suggested` is caller-supplied (e.g. from a PX hint); 0
    /// means "use this variant's own configured target".
    fn enough_peers(&self, ctx: &RouterContext, topic: &Topic, suggested: usize) -> bool;
}

/// Tagged union over the three variants. Constructed once at `Network::new`
/// time from `Config::routing_variant` and never re-tagged afterward.
pub enum Router {
    Gossip(GossipRouter),
    Flood(FloodRouter),
    RandomFanout(RandomFanoutRouter),
}

impl Router {
    pub fn new(config: &Config) -> Self {
        match config.routing_variant {
            crate::config::RoutingVariant::Gossip => Router::Gossip(GossipRouter::new()),
            crate::config::RoutingVariant::Flood => Router::Flood(FloodRouter::new()),
            crate::config::RoutingVariant::RandomFanout => Router::RandomFanout(RandomFanoutRouter::new()),
        }
    }

    fn as_variant(&mut self) -> &mut dyn RouterVariant {
        match self {
            Router::Gossip(r) => r,
            Router::Flood(r) => r,
            Router::RandomFanout(r) => r,
        }
    }
}

impl RouterVariant for Router {
    fn add_peer(&mut self, ctx: &mut RouterContext, peer: &PeerId) {
        self.as_variant().add_peer(ctx, peer)
    }
    fn remove_peer(&mut self, ctx: &mut RouterContext, peer: &PeerId) {
        self.as_variant().remove_peer(ctx, peer)
    }
    fn join(&mut self, ctx: &mut RouterContext, topic: &Topic) -> Vec<(PeerId, OutboundItem)> {
        self.as_variant().join(ctx, topic)
    }
    fn leave(&mut self, ctx: &mut RouterContext, topic: &Topic) -> Vec<(PeerId, OutboundItem)> {
        self.as_variant().leave(ctx, topic)
    }
    fn publish(&mut self, ctx: &mut RouterContext, message: &Message) -> Vec<(PeerId, OutboundItem)> {
        self.as_variant().publish(ctx, message)
    }
    fn forward(&mut self, ctx: &mut RouterContext, from: &PeerId, message: &Message) -> Vec<(PeerId, OutboundItem)> {
        self.as_variant().forward(ctx, from, message)
    }
    fn handle_control(
        &mut self,
        ctx: &mut RouterContext,
        from: &PeerId,
        control: ControlBlock,
    ) -> Vec<(PeerId, OutboundItem)> {
        self.as_variant().handle_control(ctx, from, control)
    }
    fn handle_subscription(&mut self, ctx: &mut RouterContext, from: &PeerId, topic: &Topic, subscribe: bool) {
        self.as_variant().handle_subscription(ctx, from, topic, subscribe)
    }
    fn heartbeat(&mut self, ctx: &mut RouterContext) -> Vec<(PeerId, OutboundItem)> {
        self.as_variant().heartbeat(ctx)
    }
    fn enough_peers(&self, ctx: &RouterContext, topic: &Topic, suggested: usize) -> bool {
        match self {
            Router::Gossip(r) => r.enough_peers(ctx, topic, suggested),
            Router::Flood(r) => r.enough_peers(ctx, topic, suggested),
            Router::RandomFanout(r) => r.enough_peers(ctx, topic, suggested),
        }
    }
}

/// Pick `count` peers uniformly at random from `pool`, excluding `exclude`.
/// Grounded on the parent protocol's peer-selection shuffle idiom
/// (`net/peer_selector.rs`), using `rand` directly rather than reservoir
/// sampling since candidate pools here are always small (bounded by mesh and
/// connection caps).
pub(crate) fn sample_peers(pool: &[PeerId], exclude: &PeerId, count: usize) -> Vec<PeerId> {
    use rand::seq::SliceRandom;
    let mut candidates: Vec<PeerId> = pool.iter().filter(|p| *p != exclude).cloned().collect();
    candidates.shuffle(&mut rand::thread_rng());
    candidates.truncate(count);
    candidates
}
