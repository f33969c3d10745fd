//! The single cooperative worker owning every piece of router/registry/score
//! state. Nothing outside this module ever mutates a `MeshTable`,
//! `PeerScore`, or `Registry` directly; everything reaches it over a
//! command channel and everything leaves it over subscription channels or
//! oneshot replies.

use crate::backoff::BackoffTable;
use crate::config::Config;
use crate::error::{NetError, ValidationOutcome};
use crate::frame::Frame;
use crate::host::{Host, Incoming};
use crate::mcache::MessageCache;
use crate::mesh::{FanoutTable, MeshTable};
use crate::message::Message;
use crate::peer::PeerRecord;
use crate::peer_io::{spawn_reader, spawn_writer, OutboundItem, PeerIoEvent};
use crate::registry::{Registry, Subscription};
use crate::router::{Router, RouterContext, RouterVariant};
use crate::score::PeerScore;
use crate::signing::Keypair;
use crate::tracing_hooks::{TraceEvent, TraceSink};
use crate::types::{PeerId, PeerLiveness, PeerProtocol, Topic, DIRECT_PEER_QUEUE_MULTIPLIER};
use crate::validation::ValidationPipeline;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};

/// Builds a `RouterContext` borrowing only the router-relevant fields of
/// `$self`, leaving `$self.router` itself free to borrow in the same
/// statement. Has to be a macro: a method taking `&mut self` would make the
/// borrow checker treat the whole struct as borrowed for the context's
/// lifetime, since field-disjointness isn't visible across a call boundary.
macro_rules! router_ctx {
    ($self:ident, $joined:expr) => {
        RouterContext {
            config: &$self.config,
            peers: &mut $self.peers,
            mesh: &mut $self.mesh,
            fanout: &mut $self.fanout,
            backoff: &mut $self.backoff,
            score: &mut $self.score,
            mcache: &mut $self.mcache,
            joined_topics: $joined,
            trace: &$self.trace,
            now: Instant::now(),
        }
    };
}

pub enum Command {
    Join {
        topic: Topic,
        validator: Option<Arc<dyn crate::validation::Validator>>,
        reply: oneshot::Sender<Result<Subscription, NetError>>,
    },
    Leave {
        topic: Topic,
    },
    Publish {
        topic: Topic,
        data: Vec<u8>,
        reply: oneshot::Sender<Result<(), NetError>>,
    },
    Connect {
        peer: PeerId,
        protocol: PeerProtocol,
        is_direct: bool,
        reply: oneshot::Sender<Result<(), NetError>>,
    },
    RemovePeer {
        peer: PeerId,
    },
    EnoughPeers {
        topic: Topic,
        suggested: usize,
        reply: oneshot::Sender<bool>,
    },
    Shutdown,
}

/// Owns all protocol state. Constructed by `Network::new`, then moved into
/// its own `tokio::spawn`'d task via [`EventLoop::run`].
pub struct EventLoop {
    self_id: PeerId,
    config: Arc<Config>,
    keypair: Option<Keypair>,
    host: Arc<dyn Host>,

    peers: HashMap<PeerId, PeerRecord>,
    writers: HashMap<PeerId, mpsc::UnboundedSender<OutboundItem>>,
    mesh: MeshTable,
    fanout: FanoutTable,
    backoff: BackoffTable,
    score: PeerScore,
    mcache: MessageCache,
    seen: crate::dedup::SeenCache,
    registry: Registry,
    validation: ValidationPipeline,
    router: Router,
    trace: Arc<dyn TraceSink>,

    next_seqno: u64,

    commands: mpsc::Receiver<Command>,
    incoming: mpsc::UnboundedReceiver<Incoming>,
    io_events: mpsc::Sender<PeerIoEvent>,
    io_events_rx: mpsc::Receiver<PeerIoEvent>,

    /// Posted-back verdicts from validator tasks spawned off the loop, so a
    /// slow or user-supplied validator future never blocks `run`'s `select!`.
    validated_tx: mpsc::UnboundedSender<(PeerId, Message, ValidationOutcome)>,
    validated_rx: mpsc::UnboundedReceiver<(PeerId, Message, ValidationOutcome)>,
}

impl EventLoop {
    pub fn new(
        self_id: PeerId,
        config: Arc<Config>,
        keypair: Option<Keypair>,
        host: Arc<dyn Host>,
        trace: Arc<dyn TraceSink>,
        commands: mpsc::Receiver<Command>,
        incoming: mpsc::UnboundedReceiver<Incoming>,
    ) -> Self {
        let (io_events, io_events_rx) = mpsc::channel(1024);
        let validation = ValidationPipeline::new(
            config.global_validate_concurrency,
            config.topic_validate_concurrency,
            config.validate_timeout,
        );
        let router = Router::new(&config);
        let seen = crate::dedup::SeenCache::new(
            config.seen_cache_capacity,
            crate::types::SEEN_CACHE_EVICTION_BATCH,
            config.followup_time.max(config.heartbeat_interval * 10),
        );
        let score = PeerScore::new(config.score_params.clone());
        let mcache = MessageCache::new(config.gossip_window, config.history_length);
        let (validated_tx, validated_rx) = mpsc::unbounded_channel();
        Self {
            self_id,
            config,
            keypair,
            host,
            peers: HashMap::new(),
            writers: HashMap::new(),
            mesh: MeshTable::new(),
            fanout: FanoutTable::new(),
            backoff: BackoffTable::new(),
            score,
            mcache,
            seen,
            registry: Registry::new(),
            validation,
            router,
            trace,
            next_seqno: 0,
            commands,
            incoming,
            io_events,
            io_events_rx,
            validated_tx,
            validated_rx,
        }
    }

    pub async fn run(mut self) {
        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::time::sleep(self.config.heartbeat_initial_delay).await;

        loop {
            tokio::select! {
                cmd = self.commands.recv() => {
                    match cmd {
                        Some(Command::Shutdown) | None => break,
                        Some(cmd) => self.handle_command(cmd).await,
                    }
                }
                Some(incoming) = self.incoming.recv() => {
                    self.attach_peer(incoming.peer, PeerProtocol::FullMesh, false, incoming.reader, incoming.writer);
                }
                Some(event) = self.io_events_rx.recv() => {
                    self.handle_io_event(event).await;
                }
                Some((peer, message, outcome)) = self.validated_rx.recv() => {
                    self.finish_validated(peer, message, outcome);
                }
                _ = heartbeat.tick() => {
                    self.run_heartbeat();
                }
            }
        }
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Join { topic, validator, reply } => {
                let result = self.do_join(topic, validator);
                let _ = reply.send(result);
            }
            Command::Leave { topic } => self.do_leave(&topic),
            Command::Publish { topic, data, reply } => {
                let result = self.do_publish(topic, data).await;
                let _ = reply.send(result);
            }
            Command::Connect {
                peer,
                protocol,
                is_direct,
                reply,
            } => {
                let result = self.do_connect(peer, protocol, is_direct);
                let _ = reply.send(result);
            }
            Command::RemovePeer { peer } => self.remove_peer(&peer),
            Command::EnoughPeers { topic, suggested, reply } => {
                let joined = self.joined_topics();
                let ctx = router_ctx!(self, &joined);
                let _ = reply.send(self.router.enough_peers(&ctx, &topic, suggested));
            }
            Command::Shutdown => {}
        }
    }

    fn do_join(
        &mut self,
        topic: Topic,
        validator: Option<Arc<dyn crate::validation::Validator>>,
    ) -> Result<Subscription, NetError> {
        if self.registry.is_joined(&topic) {
            return Err(NetError::IncompatibleSubscribe(topic.0));
        }
        if let Some(v) = validator {
            self.validation.register(topic.clone(), v);
        }
        let sub = self
            .registry
            .join(
                topic.clone(),
                self.config.message_queue_capacity,
                self.validation.has_validator(&topic),
                self.trace.clone(),
            )
            .expect("checked is_joined above");
        let sends = {
            let joined = self.joined_topics();
            let mut ctx = router_ctx!(self, &joined);
            self.router.join(&mut ctx, &topic)
        };
        self.dispatch(sends);
        Ok(sub)
    }

    fn do_leave(&mut self, topic: &Topic) {
        self.registry.leave(topic);
        self.validation.unregister(topic);
        let sends = {
            let joined = self.joined_topics();
            let mut ctx = router_ctx!(self, &joined);
            self.router.leave(&mut ctx, topic)
        };
        self.dispatch(sends);
    }

    async fn do_publish(&mut self, topic: Topic, data: Vec<u8>) -> Result<(), NetError> {
        if data.len() > self.config.max_message_size {
            return Err(NetError::Codec(crate::error::CodecError::FrameTooLarge {
                size: data.len(),
                limit: self.config.max_message_size,
            }));
        }
        let seqno = self.next_seqno;
        self.next_seqno += 1;
        let mut message = Message {
            from: self.self_id.clone(),
            seqno,
            data,
            topic: topic.clone(),
            signature: None,
            key: None,
        };
        if self.config.sign_messages {
            if let Some(keypair) = &self.keypair {
                message.signature = Some(keypair.sign(&message));
                message.key = Some(keypair.public.clone());
            }
        }

        {
            let joined = self.joined_topics();
            let ctx = router_ctx!(self, &joined);
            if !self.router.enough_peers(&ctx, &topic, 0) && !self.config.with_publish_if_no_peers {
                return Err(NetError::PublishNoPeers(topic.0));
            }
            let id = crate::message::default_message_id(&message);
            self.seen.insert(id, ctx.now);
        }

        let sends = {
            let joined = self.joined_topics();
            let mut ctx = router_ctx!(self, &joined);
            self.router.publish(&mut ctx, &message)
        };
        if self.registry.is_joined(&topic) {
            self.registry.deliver(&topic, message.clone());
        }
        self.dispatch(sends);
        Ok(())
    }

    fn do_connect(&mut self, peer: PeerId, protocol: PeerProtocol, is_direct: bool) -> Result<(), NetError> {
        let (reader, writer) = self
            .host
            .open_stream(&peer)
            .map_err(NetError::Transport)?;
        self.attach_peer(peer, protocol, is_direct, reader, writer);
        Ok(())
    }

    fn attach_peer<R, W>(&mut self, peer: PeerId, protocol: PeerProtocol, is_direct: bool, reader: R, writer: W)
    where
        R: tokio::io::AsyncRead + Unpin + Send + 'static,
        W: tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let mut record = PeerRecord::new(peer.clone(), protocol, is_direct);
        record.liveness = PeerLiveness::Connected;
        self.peers.insert(peer.clone(), record);
        self.score.add_peer(peer.clone(), None, Instant::now());

        let multiplier = if is_direct { DIRECT_PEER_QUEUE_MULTIPLIER } else { 1 };
        let tx = spawn_writer(
            peer.clone(),
            writer,
            self.config.message_queue_capacity * multiplier,
            self.config.gossip_queue_capacity * multiplier,
            self.config.max_transmission_size,
            self.trace.clone(),
        );
        self.writers.insert(peer.clone(), tx);
        spawn_reader(peer.clone(), reader, self.io_events.clone(), self.config.max_transmission_size);

        let joined = self.joined_topics();
        for topic in &joined {
            if let Some(sender) = self.writers.get(&peer) {
                let _ = sender.send(OutboundItem::Subscription(topic.clone(), true));
            }
        }
        let mut ctx = router_ctx!(self, &joined);
        self.router.add_peer(&mut ctx, &peer);
    }

    fn remove_peer(&mut self, peer: &PeerId) {
        self.peers.remove(peer);
        self.writers.remove(peer);
        self.score.remove_peer(peer, Instant::now());
        let joined = self.joined_topics();
        let mut ctx = router_ctx!(self, &joined);
        self.router.remove_peer(&mut ctx, peer);
    }

    async fn handle_io_event(&mut self, event: PeerIoEvent) {
        match event {
            PeerIoEvent::Closed(peer) => self.remove_peer(&peer),
            PeerIoEvent::Frame(from, frame) => self.handle_frame(from, frame).await,
        }
    }

    async fn handle_frame(&mut self, from: PeerId, frame: Frame) {
        let now = Instant::now();
        let score = self.score.score(&from, now);
        if score < self.config.score_thresholds.graylist_threshold {
            self.trace.emit(TraceEvent::Graylisted { peer: from, score });
            return;
        }

        let Frame {
            subscriptions,
            messages,
            control,
        } = frame;

        if !subscriptions.is_empty() {
            let joined = self.joined_topics();
            for (topic, subscribe) in subscriptions {
                let mut ctx = router_ctx!(self, &joined);
                self.router.handle_subscription(&mut ctx, &from, &topic, subscribe);
            }
        }

        for message in messages {
            self.handle_message(&from, message);
        }

        if let Some(control) = control {
            let sends = {
                let joined = self.joined_topics();
                let mut ctx = router_ctx!(self, &joined);
                self.router.handle_control(&mut ctx, &from, control)
            };
            self.dispatch(sends);
        }
    }

    /// Dedup lookup and signature check run inline; the user validator runs
    /// on its own task via `spawn_validate` so a slow or hung validator never
    /// blocks this loop. The verdict comes back through `validated_rx` and is
    /// applied by `finish_validated`.
    fn handle_message(&mut self, from: &PeerId, message: Message) {
        let id = crate::message::default_message_id(&message);

        if self.seen.contains(&id) {
            self.score.mark_duplicate_message_delivery(from, &message.topic);
            self.trace.emit(TraceEvent::MessageDuplicate {
                topic: message.topic.clone(),
                message_id: id,
                from: from.clone(),
            });
            return;
        }

        if self.config.validate_messages {
            if let Err(reason) = ValidationPipeline::verify_signature(&message, self.config.strict_signature_verification) {
                self.score.mark_invalid_message_delivery(from, &message.topic);
                self.trace.emit(TraceEvent::MessageRejected {
                    topic: message.topic.clone(),
                    message_id: id,
                    from: from.clone(),
                    reason: reason.to_string(),
                });
                return;
            }
        }

        let future = self.validation.spawn_validate(from.clone(), message, self.trace.clone());
        let validated_tx = self.validated_tx.clone();
        tokio::spawn(async move {
            let _ = validated_tx.send(future.await);
        });
    }

    /// Applies a validator verdict posted back from a `spawn_validate` task.
    /// `seen` is only inserted on `Accept`, per the duplicate-vs-retryable
    /// distinction: an `Ignore`d or `Reject`ed message must stay eligible for
    /// a later, valid copy to be delivered.
    fn finish_validated(&mut self, from: PeerId, message: Message, outcome: ValidationOutcome) {
        let id = crate::message::default_message_id(&message);
        match outcome {
            ValidationOutcome::Accept => {}
            ValidationOutcome::Ignore => return,
            ValidationOutcome::Reject(reason) => {
                self.score.mark_invalid_message_delivery(&from, &message.topic);
                self.trace.emit(TraceEvent::MessageRejected {
                    topic: message.topic.clone(),
                    message_id: id,
                    from,
                    reason: reason.to_string(),
                });
                return;
            }
        }

        let now = Instant::now();
        if !self.seen.insert(id.clone(), now) {
            // Another in-flight copy of this message was accepted first.
            self.score.mark_duplicate_message_delivery(&from, &message.topic);
            self.trace.emit(TraceEvent::MessageDuplicate {
                topic: message.topic.clone(),
                message_id: id,
                from,
            });
            return;
        }

        self.score.mark_first_message_delivery(&from, &message.topic);
        if self.registry.is_joined(&message.topic) {
            self.registry.deliver(&message.topic, message.clone());
            self.trace.emit(TraceEvent::MessageDelivered {
                topic: message.topic.clone(),
                message_id: id,
            });
        }

        let sends = {
            let joined = self.joined_topics();
            let mut ctx = router_ctx!(self, &joined);
            self.router.forward(&mut ctx, &from, &message)
        };
        self.dispatch(sends);
    }

    fn run_heartbeat(&mut self) {
        let now = Instant::now();
        self.seen.gc(now);
        self.score.decay_tick(now, self.config.decay_interval);
        let sends = {
            let joined = self.joined_topics();
            let mut ctx = router_ctx!(self, &joined);
            self.router.heartbeat(&mut ctx)
        };
        self.mcache.shift();
        self.dispatch(sends);
    }

    fn joined_topics(&self) -> Vec<Topic> {
        self.registry.joined_topics().cloned().collect()
    }

    pub fn dispatch(&mut self, sends: Vec<(PeerId, OutboundItem)>) {
        for (peer, item) in sends {
            if let Some(tx) = self.writers.get(&peer) {
                let _ = tx.send(item);
            }
        }
    }
}
