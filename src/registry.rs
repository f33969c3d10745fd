//! Local subscription registry: per-topic join state and delivery queues.
//!
//! Grounded on the parent protocol's per-peer bounded-queue pattern
//! (`net/peer.rs`'s `tx: mpsc::Sender<Message>`), here applied to local
//! subscribers rather than remote peers: a subscriber that falls behind has
//! its oldest undelivered message dropped rather than ever being killed.
//! The drop-oldest queue itself is the same shape as `peer_io.rs`'s
//! `BoundedQueue`, fed by an unbounded mailbox so `deliver` never blocks the
//! event loop and drained by a small forwarder task into the subscriber's
//! channel.

use crate::message::Message;
use crate::tracing_hooks::{TraceEvent, TraceSink};
use crate::types::Topic;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Handle returned to the application for a joined topic.
pub struct Subscription {
    pub topic: Topic,
    pub receiver: mpsc::Receiver<Message>,
}

struct LocalTopic {
    sender: mpsc::UnboundedSender<Message>,
    has_validator: bool,
}

/// Bounded, drop-oldest queue: once `capacity` is reached, pushing evicts the
/// front before inserting the new item. Same shape as `peer_io.rs`'s
/// `BoundedQueue`, kept separate since that one also needs a drop-*newest*
/// mode for message-class outbound frames and this one never does.
struct DropOldestQueue {
    items: VecDeque<Message>,
    capacity: usize,
}

impl DropOldestQueue {
    fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(64)),
            capacity: capacity.max(1),
        }
    }

    /// Returns `true` if pushing this item evicted an older one.
    fn push(&mut self, message: Message) -> bool {
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_front();
            true
        } else {
            false
        };
        self.items.push_back(message);
        evicted
    }

    fn pop(&mut self) -> Option<Message> {
        self.items.pop_front()
    }

    fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Forwarder task: holds the bounded, drop-oldest queue between `mailbox`
/// (unbounded, so a producer's `send` never blocks) and `out` (the bounded
/// channel the subscriber actually reads from).
async fn run_forwarder(capacity: usize, mut mailbox: mpsc::UnboundedReceiver<Message>, out: mpsc::Sender<Message>, trace: Arc<dyn TraceSink>) {
    let mut queue = DropOldestQueue::new(capacity);
    loop {
        if queue.is_empty() {
            match mailbox.recv().await {
                Some(message) => {
                    queue.push(message);
                }
                None => return,
            }
            continue;
        }
        tokio::select! {
            received = mailbox.recv() => {
                match received {
                    Some(message) => {
                        if queue.push(message) {
                            trace.emit(TraceEvent::QueueOverflow {
                                peer: crate::types::PeerId(vec![]),
                                dropped_class: "local-subscriber",
                            });
                        }
                    }
                    None => return,
                }
            }
            permit = out.reserve() => {
                match permit {
                    Ok(permit) => {
                        if let Some(message) = queue.pop() {
                            permit.send(message);
                        }
                    }
                    Err(_) => return,
                }
            }
        }
    }
}

#[derive(Default)]
pub struct Registry {
    topics: HashMap<Topic, LocalTopic>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_joined(&self, topic: &Topic) -> bool {
        self.topics.contains_key(topic)
    }

    pub fn joined_topics(&self) -> impl Iterator<Item = &Topic> {
        self.topics.keys()
    }

    /// Join a topic, spawning its forwarder task. Returns the receiver half
    /// for the caller to consume; `None` if already joined.
    pub fn join(&mut self, topic: Topic, queue_capacity: usize, has_validator: bool, trace: Arc<dyn TraceSink>) -> Option<Subscription> {
        if self.topics.contains_key(&topic) {
            return None;
        }
        let (mailbox_tx, mailbox_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::channel(1);
        tokio::spawn(run_forwarder(queue_capacity, mailbox_rx, out_tx, trace));
        self.topics.insert(
            topic.clone(),
            LocalTopic {
                sender: mailbox_tx,
                has_validator,
            },
        );
        Some(Subscription { topic, receiver: out_rx })
    }

    pub fn leave(&mut self, topic: &Topic) -> bool {
        self.topics.remove(topic).is_some()
    }

    pub fn has_validator(&self, topic: &Topic) -> bool {
        self.topics.get(topic).is_some_and(|t| t.has_validator)
    }

    /// Deliver to a joined topic's local subscriber. Never blocks: the
    /// message lands in the forwarder's unbounded mailbox, which applies the
    /// drop-oldest policy against its own bounded queue.
    pub fn deliver(&self, topic: &Topic, message: Message) {
        let Some(local) = self.topics.get(topic) else { return };
        let _ = local.sender.send(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracing_hooks::default_sink;
    use crate::types::PeerId;

    fn msg() -> Message {
        Message {
            from: PeerId(vec![1]),
            seqno: 1,
            data: vec![],
            topic: Topic::new("t"),
            signature: None,
            key: None,
        }
    }

    #[tokio::test]
    async fn join_then_deliver_then_receive() {
        let mut reg = Registry::new();
        let topic = Topic::new("t");
        let mut sub = reg.join(topic.clone(), 4, false, default_sink()).unwrap();
        reg.deliver(&topic, msg());
        let received = sub.receiver.recv().await.unwrap();
        assert_eq!(received.seqno, 1);
    }

    #[tokio::test]
    async fn joining_twice_returns_none() {
        let mut reg = Registry::new();
        let topic = Topic::new("t");
        assert!(reg.join(topic.clone(), 4, false, default_sink()).is_some());
        assert!(reg.join(topic, 4, false, default_sink()).is_none());
    }

    #[tokio::test]
    async fn leave_removes_topic() {
        let mut reg = Registry::new();
        let topic = Topic::new("t");
        reg.join(topic.clone(), 4, false, default_sink());
        assert!(reg.leave(&topic));
        assert!(!reg.is_joined(&topic));
    }

    fn msg_with_seqno(seqno: u64) -> Message {
        Message {
            from: PeerId(vec![1]),
            seqno,
            data: vec![],
            topic: Topic::new("t"),
            signature: None,
            key: None,
        }
    }

    #[test]
    fn drop_oldest_queue_evicts_front_on_overflow() {
        let mut q = DropOldestQueue::new(2);
        assert!(!q.push(msg_with_seqno(0)));
        assert!(!q.push(msg_with_seqno(1)));
        assert!(q.push(msg_with_seqno(2)));
        assert_eq!(q.pop().unwrap().seqno, 1);
        assert_eq!(q.pop().unwrap().seqno, 2);
        assert!(q.pop().is_none());
    }
}
