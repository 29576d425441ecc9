//! Transform service trait and in-memory implementation.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use common::ObjectId;
use event_store::{Event, Version};

use super::record_bounded;
use crate::error::SequencerError;

/// Turns an event's input payload into the payload that gets published.
///
/// May be invoked concurrently for different objects and for different
/// versions of the same object; completion order is not guaranteed.
#[async_trait]
pub trait TransformService: Send + Sync {
    /// Returns the transformed payload for `event`.
    async fn transform(&self, event: &Event) -> Result<String, SequencerError>;
}

#[derive(Debug, Default)]
struct InMemoryTransformState {
    calls: VecDeque<(ObjectId, Version)>,
    calls_total: usize,
    record_limit: Option<usize>,
    delay: Duration,
    delays: HashMap<(ObjectId, Version), Duration>,
    fail_on_transform: bool,
    failing: HashSet<(ObjectId, Version)>,
}

/// In-memory transform service.
///
/// Wraps the input payload in a `<transformed>` element tagged with the
/// message group, after an optional simulated latency. Empty input fails
/// validation.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTransformService {
    state: Arc<RwLock<InMemoryTransformState>>,
}

impl InMemoryTransformService {
    /// Creates a new in-memory transform service with no latency.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the latency applied to every transform.
    pub fn with_delay(self, delay: Duration) -> Self {
        self.write().delay = delay;
        self
    }

    /// Keeps at most `limit` recorded calls; older ones are discarded.
    pub fn with_record_limit(self, limit: usize) -> Self {
        self.write().record_limit = Some(limit);
        self
    }

    /// Overrides the latency for one version of one object.
    pub fn set_delay_for(&self, object_id: impl Into<ObjectId>, version: Version, delay: Duration) {
        self.write().delays.insert((object_id.into(), version), delay);
    }

    /// Configures the service to fail every transform call.
    pub fn set_fail_on_transform(&self, fail: bool) {
        self.write().fail_on_transform = fail;
    }

    /// Configures the service to fail transforms of one version of one object.
    pub fn set_fail_for(&self, object_id: impl Into<ObjectId>, version: Version, fail: bool) {
        let key = (object_id.into(), version);
        let mut state = self.write();
        if fail {
            state.failing.insert(key);
        } else {
            state.failing.remove(&key);
        }
    }

    /// Returns the number of transform invocations, failed ones included.
    pub fn transform_count(&self) -> usize {
        self.read().calls_total
    }

    /// Recorded versions of `object_id` that were sent to transform, in call
    /// order.
    pub fn calls_for(&self, object_id: &ObjectId) -> Vec<Version> {
        self.read()
            .calls
            .iter()
            .filter(|(id, _)| id == object_id)
            .map(|(_, version)| *version)
            .collect()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, InMemoryTransformState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, InMemoryTransformState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl TransformService for InMemoryTransformService {
    async fn transform(&self, event: &Event) -> Result<String, SequencerError> {
        let key = (event.object_id.clone(), event.version);
        let (delay, fail) = {
            let mut state = self.write();
            let limit = state.record_limit;
            state.calls_total += 1;
            record_bounded(&mut state.calls, limit, key.clone());
            let delay = state.delays.get(&key).copied().unwrap_or(state.delay);
            (delay, state.fail_on_transform || state.failing.contains(&key))
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if fail {
            return Err(SequencerError::TransformService(format!(
                "transform rejected for object {} version {}",
                event.object_id, event.version
            )));
        }
        if event.input_payload.trim().is_empty() {
            return Err(SequencerError::TransformService(
                "input payload is empty".to_string(),
            ));
        }

        Ok(format!(
            "<transformed group=\"{}\">{}</transformed>",
            event.group, event.input_payload
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_store::MessageGroup;

    fn event(object_id: &str, version: i64, payload: &str) -> Event {
        Event::fresh(
            object_id,
            Version::new(version),
            MessageGroup::GopsParcelSub,
            payload,
        )
    }

    #[tokio::test]
    async fn test_transform_wraps_payload() {
        let service = InMemoryTransformService::new();
        let output = service.transform(&event("A", 1, "<a/>")).await.unwrap();
        assert_eq!(
            output,
            "<transformed group=\"GOPS_PARCEL_SUB\"><a/></transformed>"
        );
        assert_eq!(service.transform_count(), 1);
    }

    #[tokio::test]
    async fn test_record_limit_keeps_latest_calls() {
        let service = InMemoryTransformService::new().with_record_limit(1);
        service.transform(&event("A", 1, "<a/>")).await.unwrap();
        service.transform(&event("A", 2, "<a/>")).await.unwrap();

        assert_eq!(service.transform_count(), 2);
        assert_eq!(service.calls_for(&ObjectId::new("A")), vec![Version::new(2)]);
    }

    #[tokio::test]
    async fn test_empty_payload_fails_validation() {
        let service = InMemoryTransformService::new();
        let result = service.transform(&event("A", 1, "  ")).await;
        assert!(matches!(result, Err(SequencerError::TransformService(_))));
    }

    #[tokio::test]
    async fn test_fail_on_transform() {
        let service = InMemoryTransformService::new();
        service.set_fail_on_transform(true);
        assert!(service.transform(&event("A", 1, "<a/>")).await.is_err());
        // failed calls still count as invocations
        assert_eq!(service.transform_count(), 1);
    }

    #[tokio::test]
    async fn test_fail_for_single_version() {
        let service = InMemoryTransformService::new();
        service.set_fail_for("A", Version::new(2), true);

        assert!(service.transform(&event("A", 1, "<a/>")).await.is_ok());
        assert!(service.transform(&event("A", 2, "<a/>")).await.is_err());
        assert!(service.transform(&event("B", 2, "<a/>")).await.is_ok());

        service.set_fail_for("A", Version::new(2), false);
        assert!(service.transform(&event("A", 2, "<a/>")).await.is_ok());
    }

    #[tokio::test]
    async fn test_calls_recorded_per_object() {
        let service = InMemoryTransformService::new();
        service.transform(&event("A", 2, "x")).await.unwrap();
        service.transform(&event("B", 1, "x")).await.unwrap();
        service.transform(&event("A", 1, "x")).await.unwrap();

        assert_eq!(
            service.calls_for(&ObjectId::new("A")),
            vec![Version::new(2), Version::new(1)]
        );
    }

    #[tokio::test]
    async fn test_per_version_delay_reorders_completion() {
        let service = InMemoryTransformService::new();
        service.set_delay_for("A", Version::new(1), Duration::from_millis(60));

        let slow_event = event("A", 1, "slow");
        let fast_event = event("A", 2, "fast");
        let slow = service.transform(&slow_event);
        let fast = async {
            let out = service.transform(&fast_event).await;
            (out, std::time::Instant::now())
        };
        let slow = async {
            let out = slow.await;
            (out, std::time::Instant::now())
        };

        let ((slow_out, slow_done), (fast_out, fast_done)) = tokio::join!(slow, fast);
        assert!(slow_out.is_ok() && fast_out.is_ok());
        assert!(fast_done < slow_done);
    }
}
