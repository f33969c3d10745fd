//! Peer-to-peer publish/subscribe messaging substrate: a gossip-mesh router
//! with GRAFT/PRUNE/IHAVE/IWANT control, a P1-P7 peer-score subsystem, and a
//! single cooperative event loop over a generic stream transport.
//!
//! Everything lives behind [`Network`], the handle applications hold. The
//! event loop itself (`EventLoop`) owns all router/registry/score state and
//! is never touched directly outside this crate.

pub mod backoff;
pub mod config;
pub mod dedup;
pub mod error;
pub mod event_loop;
pub mod frame;
pub mod host;
pub mod mcache;
pub mod message;
pub mod mesh;
pub mod peer;
pub mod peer_io;
pub mod registry;
pub mod router;
pub mod score;
pub mod signing;
pub mod tracing_hooks;
pub mod types;
pub mod validation;

pub use config::{Config, RoutingVariant};
pub use error::{CodecError, ConfigError, NetError, TransportError, ValidationOutcome, ValidationReason};
pub use host::{Host, Incoming, LoopbackHost};
pub use message::Message;
pub use registry::Subscription;
pub use signing::{Keypair, PublicKey};
pub use tracing_hooks::{default_sink, ChannelSink, TraceEvent, TraceSink};
pub use types::{MessageId, PeerId, PeerProtocol, Topic};
pub use validation::{FnValidator, Validator};

use event_loop::{Command, EventLoop};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Application-facing handle. Cloning it is cheap — every clone shares the
/// same background event loop task over a command channel, the way the
/// parent protocol's `Network` wraps a `ConnectionManager` task.
#[derive(Clone)]
pub struct Network {
    commands: mpsc::Sender<Command>,
}

impl Network {
    /// Validate `config`, spawn the event loop task, and return a handle to
    /// it. `keypair` is required only if `config.sign_messages` is set.
    pub fn new(
        self_id: PeerId,
        config: Config,
        keypair: Option<Keypair>,
        host: Arc<dyn Host>,
        incoming: mpsc::UnboundedReceiver<Incoming>,
    ) -> Result<Self, NetError> {
        Self::with_trace(self_id, config, keypair, host, incoming, default_sink())
    }

    /// Same as [`Network::new`] but with a caller-supplied [`TraceSink`],
    /// used by tests that want to observe internal transitions without
    /// scraping `tracing` output.
    pub fn with_trace(
        self_id: PeerId,
        config: Config,
        keypair: Option<Keypair>,
        host: Arc<dyn Host>,
        incoming: mpsc::UnboundedReceiver<Incoming>,
        trace: Arc<dyn TraceSink>,
    ) -> Result<Self, NetError> {
        config.validate()?;
        let config = Arc::new(config);
        let (tx, rx) = mpsc::channel(256);
        let event_loop = EventLoop::new(self_id, config, keypair, host, trace, rx, incoming);
        tokio::spawn(event_loop.run());
        Ok(Self { commands: tx })
    }

    /// Join a topic, optionally registering a validator for inbound messages
    /// on it. Returns a [`Subscription`] whose receiver yields accepted
    /// messages as they arrive.
    pub async fn join(&self, topic: Topic, validator: Option<Arc<dyn Validator>>) -> Result<Subscription, NetError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Join { topic, validator, reply }).await?;
        rx.await.map_err(|_| NetError::LoopShutDown)?
    }

    pub async fn leave(&self, topic: Topic) -> Result<(), NetError> {
        self.send(Command::Leave { topic }).await
    }

    /// Publish `data` to `topic`. Fails with [`NetError::PublishNoPeers`] if
    /// there are no eligible peers and `config.with_publish_if_no_peers` is
    /// `false`.
    pub async fn publish(&self, topic: Topic, data: Vec<u8>) -> Result<(), NetError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Publish { topic, data, reply }).await?;
        rx.await.map_err(|_| NetError::LoopShutDown)?
    }

    /// Dial `peer` through the `Host` and attach it to the router.
    /// `is_direct` marks it as exempt from score-gated pruning and backoff,
    /// with its outbound queues scaled by `DIRECT_PEER_QUEUE_MULTIPLIER`.
    pub async fn connect(&self, peer: PeerId, protocol: PeerProtocol, is_direct: bool) -> Result<(), NetError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Connect {
            peer,
            protocol,
            is_direct,
            reply,
        })
        .await?;
        rx.await.map_err(|_| NetError::LoopShutDown)?
    }

    pub async fn remove_peer(&self, peer: PeerId) -> Result<(), NetError> {
        self.send(Command::RemovePeer { peer }).await
    }

    /// Whether `topic` currently has enough peers that the router would stop
    /// actively seeking more. `suggested` of `0` asks the variant to judge
    /// against its own configured target.
    pub async fn enough_peers(&self, topic: Topic, suggested: usize) -> Result<bool, NetError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::EnoughPeers { topic, suggested, reply })
            .await
            .map_err(|_| NetError::LoopShutDown)?;
        rx.await.map_err(|_| NetError::LoopShutDown)
    }

    /// Stop the event loop. Outstanding subscriptions keep any
    /// already-buffered messages but receive no further ones.
    pub async fn shutdown(&self) -> Result<(), NetError> {
        self.send(Command::Shutdown).await
    }

    async fn send(&self, cmd: Command) -> Result<(), NetError> {
        self.commands.send(cmd).await.map_err(|_| NetError::LoopShutDown)
    }
}
