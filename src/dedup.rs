//! Bounded, TTL-evicted set of seen message IDs.
//!
//! Adapted from the parent protocol's `net/peer.rs::BoundedInvSet` (a
//! `HashSet` paired with an insertion-ordered `VecDeque` for eviction), but
//! retargeted: that type tracked *per-peer* known inventory with pure
//! FIFO-on-capacity eviction, while this one is a single *global* window
//! evicted primarily by TTL at each heartbeat, with FIFO eviction only as a
//! backstop against a capacity burst between heartbeats.

use crate::types::MessageId;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

pub struct SeenCache {
    first_seen: HashMap<MessageId, Instant>,
    order: VecDeque<MessageId>,
    capacity: usize,
    eviction_batch: usize,
    ttl: Duration,
}

impl SeenCache {
    pub fn new(capacity: usize, eviction_batch: usize, ttl: Duration) -> Self {
        Self {
            first_seen: HashMap::with_capacity(capacity.min(1024)),
            order: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            eviction_batch,
            ttl,
        }
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.first_seen.contains_key(id)
    }

    /// Record an ID as seen at `now`. Returns `true` if this is the first
    /// time we have seen it (i.e. the insert actually happened).
    pub fn insert(&mut self, id: MessageId, now: Instant) -> bool {
        if self.first_seen.contains_key(&id) {
            return false;
        }
        if self.first_seen.len() >= self.capacity {
            self.evict_batch();
        }
        self.first_seen.insert(id.clone(), now);
        self.order.push_back(id);
        true
    }

    fn evict_batch(&mut self) {
        for _ in 0..self.eviction_batch {
            match self.order.pop_front() {
                Some(id) => {
                    self.first_seen.remove(&id);
                }
                None => break,
            }
        }
    }

    /// TTL sweep, called once per heartbeat. Removes every entry whose
    /// first-seen timestamp is older than `ttl`.
    pub fn gc(&mut self, now: Instant) {
        while let Some(front) = self.order.front() {
            match self.first_seen.get(front) {
                Some(seen_at) if now.duration_since(*seen_at) > self.ttl => {
                    let id = self.order.pop_front().unwrap();
                    self.first_seen.remove(&id);
                }
                _ => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.first_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.first_seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u8) -> MessageId {
        MessageId(vec![n])
    }

    #[test]
    fn first_insert_is_new_second_is_duplicate() {
        let mut cache = SeenCache::new(10, 2, Duration::from_secs(60));
        let now = Instant::now();
        assert!(cache.insert(id(1), now));
        assert!(!cache.insert(id(1), now));
    }

    #[test]
    fn ttl_gc_evicts_old_entries_only() {
        let mut cache = SeenCache::new(10, 2, Duration::from_millis(10));
        let t0 = Instant::now();
        cache.insert(id(1), t0);
        let t1 = t0 + Duration::from_millis(20);
        cache.insert(id(2), t1);
        cache.gc(t1);
        assert!(!cache.contains(&id(1)));
        assert!(cache.contains(&id(2)));
    }

    #[test]
    fn capacity_overflow_evicts_oldest_first() {
        let mut cache = SeenCache::new(4, 2, Duration::from_secs(3600));
        let now = Instant::now();
        for i in 0..4 {
            cache.insert(id(i), now);
        }
        cache.insert(id(10), now);
        assert!(!cache.contains(&id(0)));
        assert!(!cache.contains(&id(1)));
        assert!(cache.contains(&id(10)));
    }
}
