//! Per-topic mesh and fanout peer sets.

use crate::types::{PeerId, Topic};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

#[derive(Default)]
pub struct MeshTable {
    topics: HashMap<Topic, HashSet<PeerId>>,
}

impl MeshTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn members(&self, topic: &Topic) -> &HashSet<PeerId> {
        static EMPTY: std::sync::OnceLock<HashSet<PeerId>> = std::sync::OnceLock::new();
        self.topics.get(topic).unwrap_or_else(|| EMPTY.get_or_init(HashSet::new))
    }

    pub fn contains(&self, topic: &Topic, peer: &PeerId) -> bool {
        self.topics.get(topic).is_some_and(|m| m.contains(peer))
    }

    pub fn len(&self, topic: &Topic) -> usize {
        self.topics.get(topic).map_or(0, |m| m.len())
    }

    pub fn insert(&mut self, topic: Topic, peer: PeerId) -> bool {
        self.topics.entry(topic).or_default().insert(peer)
    }

    pub fn remove(&mut self, topic: &Topic, peer: &PeerId) -> bool {
        self.topics.get_mut(topic).is_some_and(|m| m.remove(peer))
    }

    pub fn remove_peer_everywhere(&mut self, peer: &PeerId) {
        for members in self.topics.values_mut() {
            members.remove(peer);
        }
    }

    pub fn drop_topic(&mut self, topic: &Topic) -> HashSet<PeerId> {
        self.topics.remove(topic).unwrap_or_default()
    }

    pub fn topics(&self) -> impl Iterator<Item = &Topic> {
        self.topics.keys()
    }
}

struct FanoutEntry {
    members: HashSet<PeerId>,
    last_used: Instant,
}

#[derive(Default)]
pub struct FanoutTable {
    topics: HashMap<Topic, FanoutEntry>,
}

impl FanoutTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn touch(&mut self, topic: &Topic, now: Instant) {
        if let Some(entry) = self.topics.get_mut(topic) {
            entry.last_used = now;
        }
    }

    pub fn members(&self, topic: &Topic) -> Option<&HashSet<PeerId>> {
        self.topics.get(topic).map(|e| &e.members)
    }

    pub fn ensure(&mut self, topic: Topic, now: Instant) -> &mut HashSet<PeerId> {
        &mut self
            .topics
            .entry(topic)
            .or_insert_with(|| FanoutEntry {
                members: HashSet::new(),
                last_used: now,
            })
            .members
    }

    /// Drop fanout entries idle past `ttl`. Returns the dropped topics.
    pub fn expire(&mut self, now: Instant, ttl: Duration) -> Vec<Topic> {
        let expired: Vec<Topic> = self
            .topics
            .iter()
            .filter(|(_, e)| now.duration_since(e.last_used) > ttl)
            .map(|(t, _)| t.clone())
            .collect();
        for t in &expired {
            self.topics.remove(t);
        }
        expired
    }

    pub fn remove_peer_everywhere(&mut self, peer: &PeerId) {
        for entry in self.topics.values_mut() {
            entry.members.remove(peer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mesh_insert_and_remove() {
        let mut mesh = MeshTable::new();
        let t = Topic::new("t");
        let p = PeerId(vec![1]);
        assert!(mesh.insert(t.clone(), p.clone()));
        assert!(mesh.contains(&t, &p));
        assert!(mesh.remove(&t, &p));
        assert!(!mesh.contains(&t, &p));
    }

    #[test]
    fn fanout_expires_after_ttl() {
        let mut fanout = FanoutTable::new();
        let t0 = Instant::now();
        let topic = Topic::new("t");
        fanout.ensure(topic.clone(), t0).insert(PeerId(vec![1]));
        let expired = fanout.expire(t0 + Duration::from_secs(61), Duration::from_secs(60));
        assert_eq!(expired, vec![topic]);
    }

    #[test]
    fn touch_resets_the_idle_clock() {
        let mut fanout = FanoutTable::new();
        let t0 = Instant::now();
        let topic = Topic::new("t");
        fanout.ensure(topic.clone(), t0);
        fanout.touch(&topic, t0 + Duration::from_secs(59));
        let expired = fanout.expire(t0 + Duration::from_secs(61), Duration::from_secs(60));
        assert!(expired.is_empty());
    }
}
