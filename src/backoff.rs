//! (topic, peer) -> earliest-regraft-time table.

use crate::types::{PeerId, Topic};
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Default)]
pub struct BackoffTable {
    deadlines: HashMap<(Topic, PeerId), Instant>,
}

impl BackoffTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pending(&self, topic: &Topic, peer: &PeerId, now: Instant) -> bool {
        self.deadlines
            .get(&(topic.clone(), peer.clone()))
            .is_some_and(|deadline| *deadline > now)
    }

    /// Install a backoff, extending rather than shortening any existing one.
    pub fn set(&mut self, topic: Topic, peer: PeerId, now: Instant, duration: Duration) {
        let deadline = now + duration;
        self.deadlines
            .entry((topic, peer))
            .and_modify(|d| *d = (*d).max(deadline))
            .or_insert(deadline);
    }

    pub fn remaining(&self, topic: &Topic, peer: &PeerId, now: Instant) -> Option<Duration> {
        self.deadlines
            .get(&(topic.clone(), peer.clone()))
            .and_then(|deadline| deadline.checked_duration_since(now))
    }

    /// Drop every expired entry. Called at heartbeat.
    pub fn gc(&mut self, now: Instant) {
        self.deadlines.retain(|_, deadline| *deadline > now);
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}
