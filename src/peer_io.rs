//! Per-peer reader and writer tasks.
//!
//! Grounded on the parent protocol's `net/peer.rs` (`Peer::tx:
//! mpsc::Sender<Message>`) and `net/connection.rs`'s one-task-per-peer shape.
//! The writer task is the sole owner of its peer's two outbound queues
//! (message-class and gossip-class), so no lock is needed even though the
//! event loop feeds it concurrently with other peers' writers — the event
//! loop's send into the writer's mailbox is a cheap unbounded push and never
//! blocks the loop; bounding and the drop policy live inside the writer.

use crate::error::CodecError;
use crate::frame::{read_frame, write_frame, ControlBlock, Frame, PruneNotice};
use crate::message::Message;
use crate::tracing_hooks::TraceSink;
use crate::types::{MessageId, PeerId, Topic};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub enum OutboundItem {
    Subscription(Topic, bool),
    Message(Message),
    Graft(Topic),
    Prune(PruneNotice),
    Ihave(Topic, Vec<MessageId>),
    Iwant(Vec<MessageId>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueueClass {
    Message,
    Gossip,
}

impl OutboundItem {
    fn class(&self) -> QueueClass {
        match self {
            OutboundItem::Message(_) => QueueClass::Message,
            _ => QueueClass::Gossip,
        }
    }
}

/// Event delivered from a peer's reader task (or its shutdown) to the event
/// loop.
pub enum PeerIoEvent {
    Frame(PeerId, Frame),
    Closed(PeerId),
}

struct BoundedQueue {
    items: VecDeque<OutboundItem>,
    capacity: usize,
}

impl BoundedQueue {
    fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(64)),
            capacity,
        }
    }

    /// Drop-oldest: when full, evict the front before pushing.
    fn push_drop_oldest(&mut self, item: OutboundItem) {
        if self.items.len() >= self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    /// Drop-newest: when full, the incoming item is discarded.
    fn push_drop_newest(&mut self, item: OutboundItem) -> bool {
        if self.items.len() >= self.capacity {
            return false;
        }
        self.items.push_back(item);
        true
    }

    fn pop(&mut self) -> Option<OutboundItem> {
        self.items.pop_front()
    }

    fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Spawn the reader task: decodes frames off `stream` and forwards them to
/// the event loop until the stream closes or a codec error occurs.
pub fn spawn_reader<R>(
    peer: PeerId,
    mut stream: R,
    to_loop: mpsc::Sender<PeerIoEvent>,
    max_transmission_size: usize,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match read_frame(&mut stream, max_transmission_size).await {
                Ok(frame) => {
                    if to_loop.send(PeerIoEvent::Frame(peer.clone(), frame)).await.is_err() {
                        break;
                    }
                }
                Err(CodecError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(_) => break,
            }
        }
        let _ = to_loop.send(PeerIoEvent::Closed(peer)).await;
    });
}

/// Spawn the writer task: owns this peer's bounded outbound queues and
/// drains them into batched frames as items arrive. `message_cap`/`gossip_cap`
/// are the caller's responsibility to scale up for direct peers
/// (`DIRECT_PEER_QUEUE_MULTIPLIER`) before calling this.
pub fn spawn_writer<W>(
    peer: PeerId,
    mut stream: W,
    message_cap: usize,
    gossip_cap: usize,
    max_transmission_size: usize,
    trace: Arc<dyn TraceSink>,
) -> mpsc::UnboundedSender<OutboundItem>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut mailbox) = mpsc::unbounded_channel::<OutboundItem>();
    tokio::spawn(async move {
        let mut messages = BoundedQueue::new(message_cap);
        let mut gossip = BoundedQueue::new(gossip_cap);

        loop {
            let item = match mailbox.recv().await {
                Some(item) => item,
                None => break,
            };
            match item.class() {
                QueueClass::Message => {
                    if !messages.push_drop_newest(item) {
                        trace.emit(crate::tracing_hooks::TraceEvent::QueueOverflow {
                            peer: peer.clone(),
                            dropped_class: "message",
                        });
                    }
                }
                QueueClass::Gossip => gossip.push_drop_oldest(item),
            }
            // Drain whatever is pending without waiting for more: messages
            // drain first so gossip hints never starve forwarded traffic.
            while !messages.is_empty() || !gossip.is_empty() {
                let next = messages.pop().or_else(|| gossip.pop());
                let Some(next) = next else { break };
                let frame = item_to_frame(next);
                if write_frame(&mut stream, &frame, max_transmission_size).await.is_err() {
                    return;
                }
            }
        }
    });
    tx
}

fn item_to_frame(item: OutboundItem) -> Frame {
    match item {
        OutboundItem::Subscription(topic, sub) => Frame {
            subscriptions: vec![(topic, sub)],
            ..Default::default()
        },
        OutboundItem::Message(message) => Frame {
            messages: vec![message],
            ..Default::default()
        },
        OutboundItem::Graft(topic) => Frame {
            control: Some(ControlBlock {
                graft: vec![topic],
                ..Default::default()
            }),
            ..Default::default()
        },
        OutboundItem::Prune(notice) => Frame {
            control: Some(ControlBlock {
                prune: vec![notice],
                ..Default::default()
            }),
            ..Default::default()
        },
        OutboundItem::Ihave(topic, ids) => Frame {
            control: Some(ControlBlock {
                ihave: vec![(topic, ids)],
                ..Default::default()
            }),
            ..Default::default()
        },
        OutboundItem::Iwant(ids) => Frame {
            control: Some(ControlBlock {
                iwant: ids,
                ..Default::default()
            }),
            ..Default::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_oldest_evicts_front_on_overflow() {
        let mut q = BoundedQueue::new(2);
        q.push_drop_oldest(OutboundItem::Graft(Topic::new("a")));
        q.push_drop_oldest(OutboundItem::Graft(Topic::new("b")));
        q.push_drop_oldest(OutboundItem::Graft(Topic::new("c")));
        assert_eq!(q.items.len(), 2);
        assert!(matches!(q.items[0], OutboundItem::Graft(ref t) if t.0 == "b"));
    }

    #[test]
    fn drop_newest_rejects_incoming_on_overflow() {
        let mut q = BoundedQueue::new(1);
        assert!(q.push_drop_newest(OutboundItem::Graft(Topic::new("a"))));
        assert!(!q.push_drop_newest(OutboundItem::Graft(Topic::new("b"))));
        assert_eq!(q.items.len(), 1);
    }
}
