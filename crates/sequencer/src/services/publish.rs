//! Publish service trait and in-memory implementation.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::ObjectId;
use event_store::{Event, MessageGroup, Version};
use serde::Serialize;

use super::record_bounded;
use crate::error::SequencerError;

/// Confirmation of a completed publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishReceipt {
    /// Queue the message was delivered to.
    pub queue: String,
    pub published_at: DateTime<Utc>,
}

/// Delivers transformed events to their downstream queue.
#[async_trait]
pub trait PublishService: Send + Sync {
    /// Publishes `event`, which carries its transformed payload.
    async fn publish(&self, event: &Event) -> Result<PublishReceipt, SequencerError>;
}

/// A message delivered by [`InMemoryPublishService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub object_id: ObjectId,
    pub version: Version,
    pub group: MessageGroup,
    pub queue: String,
    pub payload: String,
}

#[derive(Debug, Default)]
struct InMemoryPublishState {
    published: VecDeque<PublishedMessage>,
    published_total: usize,
    record_limit: Option<usize>,
    attempts: usize,
    delay: Duration,
    delays: HashMap<(ObjectId, Version), Duration>,
    fail_on_publish: bool,
    failing: HashSet<(ObjectId, Version)>,
    in_flight: HashSet<ObjectId>,
    overlapping: usize,
}

/// In-memory publish service.
///
/// Records delivered messages in publication order, keeping only the most
/// recent ones once a record limit is set. It also counts publishes that
/// started while another publish for the same object was still running,
/// which the ordering gate must never allow.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPublishService {
    state: Arc<RwLock<InMemoryPublishState>>,
}

impl InMemoryPublishService {
    /// Creates a new in-memory publish service with no latency.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the latency applied to every publish.
    pub fn with_delay(self, delay: Duration) -> Self {
        self.write().delay = delay;
        self
    }

    /// Keeps at most `limit` delivered messages; older ones are discarded.
    pub fn with_record_limit(self, limit: usize) -> Self {
        self.write().record_limit = Some(limit);
        self
    }

    /// Overrides the latency for one version of one object.
    pub fn set_delay_for(&self, object_id: impl Into<ObjectId>, version: Version, delay: Duration) {
        self.write().delays.insert((object_id.into(), version), delay);
    }

    /// Configures the service to fail every publish call.
    pub fn set_fail_on_publish(&self, fail: bool) {
        self.write().fail_on_publish = fail;
    }

    /// Configures the service to fail publishes of one version of one object.
    pub fn set_fail_for(&self, object_id: impl Into<ObjectId>, version: Version, fail: bool) {
        let key = (object_id.into(), version);
        let mut state = self.write();
        if fail {
            state.failing.insert(key);
        } else {
            state.failing.remove(&key);
        }
    }

    /// Recorded published messages, in completion order.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.read().published.iter().cloned().collect()
    }

    /// Published versions of `object_id`, in completion order.
    pub fn published_for(&self, object_id: &ObjectId) -> Vec<Version> {
        self.read()
            .published
            .iter()
            .filter(|m| &m.object_id == object_id)
            .map(|m| m.version)
            .collect()
    }

    /// Number of successful publishes, including ones no longer recorded.
    pub fn publish_count(&self) -> usize {
        self.read().published_total
    }

    /// Number of publish calls, failed ones included.
    pub fn attempt_count(&self) -> usize {
        self.read().attempts
    }

    /// Publishes that overlapped another publish of the same object.
    pub fn overlapping_publishes(&self) -> usize {
        self.read().overlapping
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, InMemoryPublishState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, InMemoryPublishState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Marks an object as having a publish in flight until dropped, so the mark
/// is cleared even when the publish future is cancelled.
struct InFlight<'a> {
    state: &'a RwLock<InMemoryPublishState>,
    object_id: ObjectId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .in_flight
            .remove(&self.object_id);
    }
}

#[async_trait]
impl PublishService for InMemoryPublishService {
    async fn publish(&self, event: &Event) -> Result<PublishReceipt, SequencerError> {
        let key = (event.object_id.clone(), event.version);
        let (delay, fail) = {
            let mut state = self.write();
            state.attempts += 1;
            if !state.in_flight.insert(event.object_id.clone()) {
                state.overlapping += 1;
            }
            let delay = state.delays.get(&key).copied().unwrap_or(state.delay);
            (delay, state.fail_on_publish || state.failing.contains(&key))
        };
        let in_flight = InFlight {
            state: &self.state,
            object_id: event.object_id.clone(),
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        drop(in_flight);

        let mut state = self.write();

        if fail {
            return Err(SequencerError::PublishService(format!(
                "broker refused object {} version {}",
                event.object_id, event.version
            )));
        }
        let payload = event.transformed_payload.clone().ok_or_else(|| {
            SequencerError::PublishService(format!(
                "object {} version {} has no transformed payload",
                event.object_id, event.version
            ))
        })?;

        let queue = event.target_queue().to_string();
        let limit = state.record_limit;
        state.published_total += 1;
        record_bounded(
            &mut state.published,
            limit,
            PublishedMessage {
                object_id: event.object_id.clone(),
                version: event.version,
                group: event.group,
                queue: queue.clone(),
                payload,
            },
        );

        Ok(PublishReceipt {
            queue,
            published_at: Utc::now(),
        })
    }
}
