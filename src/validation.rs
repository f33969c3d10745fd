//! Pluggable per-topic validation with bounded concurrency.
//!
//! The worker-pool shape (global cap plus a per-topic cap, acquired as
//! semaphore permits rather than spawning unboundedly) is grounded on the
//! parent protocol's `net/rate_limit.rs` (`TokenBucket`, `AdaptiveSubnetLimiter`)
//! two-tier adaptive-limiting idiom, substituting `tokio::sync::Semaphore` for
//! the token bucket since validation is inherently a concurrency cap, not a
//! rate cap.

use crate::error::{ValidationOutcome, ValidationReason};
use crate::message::Message;
use crate::signing;
use crate::tracing_hooks::{TraceEvent, TraceSink};
use crate::types::{PeerId, Topic};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Application-supplied acceptance check for a single topic.
pub trait Validator: Send + Sync {
    fn validate(&self, peer: &PeerId, message: &Message) -> BoxFuture<'_, ValidationOutcome>;
}

/// Wraps a synchronous closure as a [`Validator`], for callers whose check
/// needs no `.await`.
pub struct FnValidator<F>(pub F)
where
    F: Fn(&PeerId, &Message) -> ValidationOutcome + Send + Sync;

impl<F> Validator for FnValidator<F>
where
    F: Fn(&PeerId, &Message) -> ValidationOutcome + Send + Sync,
{
    fn validate(&self, peer: &PeerId, message: &Message) -> BoxFuture<'_, ValidationOutcome> {
        let outcome = (self.0)(peer, message);
        Box::pin(async move { outcome })
    }
}

struct TopicEntry {
    validator: Arc<dyn Validator>,
    semaphore: Arc<Semaphore>,
}

/// Owns every topic's registered validator and enforces global + per-topic
/// concurrency caps. A single instance is shared (read-only after topics are
/// registered) across every validation call the event loop issues.
pub struct ValidationPipeline {
    global: Arc<Semaphore>,
    topic_concurrency: usize,
    timeout: Duration,
    topics: HashMap<Topic, TopicEntry>,
}

impl ValidationPipeline {
    pub fn new(global_concurrency: usize, topic_concurrency: usize, timeout: Duration) -> Self {
        Self {
            global: Arc::new(Semaphore::new(global_concurrency.max(1))),
            topic_concurrency: topic_concurrency.max(1),
            timeout,
            topics: HashMap::new(),
        }
    }

    pub fn register(&mut self, topic: Topic, validator: Arc<dyn Validator>) {
        self.topics.insert(
            topic,
            TopicEntry {
                validator,
                semaphore: Arc::new(Semaphore::new(self.topic_concurrency)),
            },
        );
    }

    pub fn unregister(&mut self, topic: &Topic) {
        self.topics.remove(topic);
    }

    pub fn has_validator(&self, topic: &Topic) -> bool {
        self.topics.contains_key(topic)
    }

    /// Verify the message's signature against its embedded or already-known
    /// key. Called before the user validator runs, whenever verification is
    /// required; a failure here is always a hard reject, never an Ignore.
    pub fn verify_signature(message: &Message, strict: bool) -> Result<(), ValidationReason> {
        let Some(signature) = &message.signature else {
            return Err(ValidationReason::SignatureError);
        };
        let Some(key) = &message.key else {
            if strict {
                return Err(ValidationReason::SignatureError);
            }
            return Ok(());
        };
        signing::verify(key, message, signature).map_err(|_| ValidationReason::SignatureError)
    }

    /// Run the full pipeline for one message: acquire a global permit, then a
    /// per-topic permit, then invoke the registered validator (if any) under
    /// a timeout. Saturation and timeout both resolve to `Ignore`, never
    /// `Reject` -- an overloaded validator is not evidence of misbehavior.
    pub async fn validate(
        &self,
        peer: &PeerId,
        message: &Message,
        trace: &Arc<dyn TraceSink>,
    ) -> ValidationOutcome {
        let Some(entry) = self.topics.get(&message.topic) else {
            return ValidationOutcome::Accept;
        };
        Self::run_validator(
            self.global.clone(),
            entry.semaphore.clone(),
            entry.validator.clone(),
            self.timeout,
            peer,
            message,
            trace,
        )
        .await
    }

    /// Same pipeline as [`ValidationPipeline::validate`], but returns a
    /// `'static` future that borrows nothing from `self` -- every piece it
    /// needs (the per-topic semaphore, the global semaphore, the validator)
    /// is an `Arc` clone taken up front. Callers `tokio::spawn` this onto its
    /// own task so a slow or saturated validator never blocks the caller's
    /// own event loop; the caller posts the returned outcome back to itself
    /// however it likes.
    pub fn spawn_validate(
        &self,
        peer: PeerId,
        message: Message,
        trace: Arc<dyn TraceSink>,
    ) -> BoxFuture<'static, (PeerId, Message, ValidationOutcome)> {
        let Some(entry) = self.topics.get(&message.topic) else {
            return Box::pin(async move { (peer, message, ValidationOutcome::Accept) });
        };
        let global = self.global.clone();
        let topic_semaphore = entry.semaphore.clone();
        let validator = entry.validator.clone();
        let timeout = self.timeout;
        Box::pin(async move {
            let outcome = Self::run_validator(global, topic_semaphore, validator, timeout, &peer, &message, &trace).await;
            (peer, message, outcome)
        })
    }

    async fn run_validator(
        global: Arc<Semaphore>,
        topic_semaphore: Arc<Semaphore>,
        validator: Arc<dyn Validator>,
        timeout: Duration,
        peer: &PeerId,
        message: &Message,
        trace: &Arc<dyn TraceSink>,
    ) -> ValidationOutcome {
        let Ok(_global_permit) = global.try_acquire_owned() else {
            trace.emit(TraceEvent::ValidatorSaturated {
                topic: message.topic.clone(),
            });
            return ValidationOutcome::Ignore;
        };
        let Ok(_topic_permit) = topic_semaphore.try_acquire_owned() else {
            trace.emit(TraceEvent::ValidatorSaturated {
                topic: message.topic.clone(),
            });
            return ValidationOutcome::Ignore;
        };

        match tokio::time::timeout(timeout, validator.validate(peer, message)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                trace.emit(TraceEvent::ValidatorTimeout {
                    topic: message.topic.clone(),
                    message_id: crate::message::default_message_id(message),
                });
                ValidationOutcome::Ignore
            }
        }
    }
}
