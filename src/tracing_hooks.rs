//! Structured observability for the router/score/event-loop state machines.
//!
//! `TraceSink` is the only way outside code observes the invariants the
//! event loop maintains internally; tests register a channel-backed sink
//! instead of scraping `tracing` output.

use crate::types::{MessageId, PeerId, Topic};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum TraceEvent {
    Grafted { topic: Topic, peer: PeerId },
    Pruned { topic: Topic, peer: PeerId, backoff_ms: u64 },
    Graylisted { peer: PeerId, score: f64 },
    MeshRepaired { topic: Topic, size: usize },
    OpportunisticGraft { topic: Topic, added: usize },
    MessageDelivered { topic: Topic, message_id: MessageId },
    MessageDuplicate { topic: Topic, message_id: MessageId, from: PeerId },
    MessageRejected { topic: Topic, message_id: MessageId, from: PeerId, reason: String },
    QueueOverflow { peer: PeerId, dropped_class: &'static str },
    ValidatorTimeout { topic: Topic, message_id: MessageId },
    ValidatorSaturated { topic: Topic },
    PeerExchange { from: PeerId, candidates: usize },
}

/// Registered at `Network::new`; defaults to `TracingSink`.
pub trait TraceSink: Send + Sync {
    fn emit(&self, event: TraceEvent);
}

/// Forwards every event to the `tracing` crate at an event-appropriate
/// level. Security-relevant transitions (graylisting) get a banner divider
/// the way the parent protocol flags misbehavior in its own peer/connection
/// logging.
pub struct TracingSink;

impl TraceSink for TracingSink {
    fn emit(&self, event: TraceEvent) {
        match &event {
            TraceEvent::Graylisted { peer, score } => {
                tracing::warn!("════════════════════════════════════════");
                tracing::warn!("peer {peer} graylisted, score={score:.2}");
                tracing::warn!("════════════════════════════════════════");
            }
            TraceEvent::ValidatorTimeout { topic, message_id } => {
                tracing::warn!(%topic, %message_id, "validator timed out, treating as Ignore");
            }
            TraceEvent::ValidatorSaturated { topic } => {
                tracing::warn!(%topic, "validator pool saturated, new messages ignored");
            }
            TraceEvent::QueueOverflow { peer, dropped_class } => {
                tracing::warn!(%peer, class = dropped_class, "outbound queue overflow, frame dropped");
            }
            TraceEvent::MessageRejected { topic, message_id, from, reason } => {
                tracing::debug!(%topic, %message_id, %from, %reason, "message rejected");
            }
            TraceEvent::Grafted { topic, peer } => {
                tracing::debug!(%topic, %peer, "grafted");
            }
            TraceEvent::Pruned { topic, peer, backoff_ms } => {
                tracing::debug!(%topic, %peer, backoff_ms, "pruned");
            }
            TraceEvent::MeshRepaired { topic, size } => {
                tracing::debug!(%topic, size, "mesh repaired");
            }
            TraceEvent::OpportunisticGraft { topic, added } => {
                tracing::debug!(%topic, added, "opportunistic graft");
            }
            TraceEvent::MessageDelivered { topic, message_id } => {
                tracing::trace!(%topic, %message_id, "delivered to local subscriber");
            }
            TraceEvent::MessageDuplicate { topic, message_id, from } => {
                tracing::trace!(%topic, %message_id, %from, "duplicate");
            }
            TraceEvent::PeerExchange { from, candidates } => {
                tracing::debug!(%from, candidates, "peer exchange candidates received");
            }
        }
    }
}

/// Test/demo double: forwards every event over an unbounded channel so
/// assertions can be made without parsing log lines.
pub struct ChannelSink(pub tokio::sync::mpsc::UnboundedSender<TraceEvent>);

impl TraceSink for ChannelSink {
    fn emit(&self, event: TraceEvent) {
        let _ = self.0.send(event);
    }
}

pub fn default_sink() -> Arc<dyn TraceSink> {
    Arc::new(TracingSink)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_sink_forwards_events() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let sink = ChannelSink(tx);
        sink.emit(TraceEvent::MeshRepaired {
            topic: Topic::new("t"),
            size: 4,
        });
        assert!(matches!(rx.try_recv(), Ok(TraceEvent::MeshRepaired { size: 4, .. })));
    }
}
