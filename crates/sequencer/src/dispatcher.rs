//! Dedup & state dispatcher.
//!
//! [`Dispatcher::handle`] routes an event by its processing state and keeps
//! following it until the chain settles: intake hands off to transform,
//! transform hands off to the ordering gate, a completed publish advances the
//! watermark and releases the next buffered version in the same locked step.
//!
//! Collaborator exchanges run without any per-object lock held. A slot is
//! locked only for the synchronous read-modify-write of its history and
//! in-flight markers.

use std::sync::Arc;

use common::ObjectId;
use event_store::{
    Event, EventId, EventStore, HistoryStore, ObjectHistory, ProcessingState, Version,
};
use futures_util::StreamExt;
use futures_util::future::join_all;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::config::SequencerConfig;
use crate::coordinator::PipelineCoordinator;
use crate::error::SequencerError;
use crate::gate::OrderingGate;
use crate::outcome::{Disposition, DropReason, Stage};
use crate::registry::HistoryRegistry;
use crate::services::{PublishService, TransformService};

/// Result of [`Dispatcher::restore`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreSummary {
    /// Histories adopted from the store.
    pub objects: usize,
    /// Buffered versions that were driven again.
    pub resumed: usize,
}

enum Step {
    /// Route the event by its state.
    Dispatch(Event),
    /// Publish an event whose publish slot is already claimed.
    Publish(Event),
    Done(Disposition),
}

enum Gate {
    Drop(DropReason),
    Defer { watermark: Version },
    Publish(Event),
}

struct Inner<E, H, T, P>
where
    T: TransformService,
    P: PublishService,
{
    registry: HistoryRegistry,
    events: E,
    histories: H,
    coordinator: PipelineCoordinator<T, P>,
}

/// Routes events through the ordered transform/publish pipeline.
///
/// Cloning is cheap; clones share the same histories and collaborators.
pub struct Dispatcher<E, H, T, P>
where
    E: EventStore,
    H: HistoryStore,
    T: TransformService,
    P: PublishService,
{
    inner: Arc<Inner<E, H, T, P>>,
}

impl<E, H, T, P> Clone for Dispatcher<E, H, T, P>
where
    E: EventStore,
    H: HistoryStore,
    T: TransformService,
    P: PublishService,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E, H, T, P> Dispatcher<E, H, T, P>
where
    E: EventStore + 'static,
    H: HistoryStore + 'static,
    T: TransformService + 'static,
    P: PublishService + 'static,
{
    pub fn new(events: E, histories: H, transform: T, publish: P, config: SequencerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: HistoryRegistry::new(),
                events,
                histories,
                coordinator: PipelineCoordinator::new(transform, publish, config),
            }),
        }
    }

    /// The event store this dispatcher persists to.
    pub fn event_store(&self) -> &E {
        &self.inner.events
    }

    /// Handles `event` and every step it triggers, and reports how the chain
    /// ended.
    #[tracing::instrument(
        skip(self, event),
        fields(object_id = %event.object_id, version = %event.version, state = %event.state)
    )]
    pub async fn handle(&self, event: Event) -> Disposition {
        let mut step = Step::Dispatch(event);
        loop {
            step = match step {
                Step::Dispatch(event) => self.dispatch(event).await,
                Step::Publish(event) => self.publish(event).await,
                Step::Done(disposition) => return disposition,
            };
        }
    }

    /// Handles `event` on a background task.
    pub fn send(&self, event: Event) -> JoinHandle<Disposition> {
        let dispatcher = self.clone();
        tokio::spawn(async move { dispatcher.handle(event).await })
    }

    /// Drives a buffered version again after a collaborator failure.
    ///
    /// A `RECEIVED` entry is sent to transform again; a `TRANSFORMED` entry is
    /// re-checked against the ordering gate.
    #[tracing::instrument(skip(self))]
    pub async fn replay(&self, object_id: &ObjectId, version: Version) -> Disposition {
        let recorded = self.inner.registry.with_slot(object_id, |slot| {
            match slot.history.get(version) {
                Some(event) => Ok(event.clone()),
                None if slot.history.is_stale(version) => Err(DropReason::Stale),
                None => Err(DropReason::UnknownVersion),
            }
        });

        match recorded {
            Some(Ok(event)) => {
                tracing::info!(state = %event.state, "replaying buffered version");
                self.handle(event).await
            }
            Some(Err(reason)) => Disposition::dropped(reason),
            None => Disposition::dropped(DropReason::UnknownObject),
        }
    }

    /// Adopts every history held by the history store and resumes its
    /// buffered work: `RECEIVED` entries go back to transform and the
    /// releasable `TRANSFORMED` entry, if any, goes to publish.
    ///
    /// Objects already tracked in memory are left alone.
    #[tracing::instrument(skip(self))]
    pub async fn restore(&self) -> Result<RestoreSummary, SequencerError> {
        let mut stream = self.inner.histories.stream_all().await?;
        let mut summary = RestoreSummary::default();
        let mut pending = Vec::new();

        while let Some(history) = stream.next().await {
            let history = history?;
            let mut resumable: Vec<Event> = history
                .versions
                .values()
                .filter(|event| event.state == ProcessingState::Received)
                .cloned()
                .collect();
            resumable.extend(OrderingGate::next_releasable(&history).cloned());

            if !self.inner.registry.install(history) {
                continue;
            }
            summary.objects += 1;
            pending.extend(resumable);
        }

        summary.resumed = pending.len();
        tracing::info!(
            objects = summary.objects,
            resumed = summary.resumed,
            "restored histories"
        );
        join_all(pending.into_iter().map(|event| self.handle(event))).await;
        Ok(summary)
    }

    /// Returns a copy of the object's history.
    pub fn history(&self, object_id: &ObjectId) -> Option<ObjectHistory> {
        self.inner.registry.snapshot(object_id)
    }

    /// Returns the object's watermark.
    pub fn last_processed_version(&self, object_id: &ObjectId) -> Option<Version> {
        self.inner
            .registry
            .with_slot(object_id, |slot| slot.history.last_processed_version)
    }

    /// Object ids with a history, sorted.
    pub fn tracked_objects(&self) -> Vec<ObjectId> {
        self.inner.registry.object_ids()
    }

    async fn dispatch(&self, event: Event) -> Step {
        metrics::counter!("sequencer_events_total", "state" => event.state.as_str()).increment(1);

        match event.state {
            ProcessingState::Fresh => self.intake(event).await,
            ProcessingState::Received => self.transform(event).await,
            ProcessingState::Transformed => self.evaluate(event).await,
            ProcessingState::Published => self.complete_publish(event).await,
            ProcessingState::AckReceived => {
                tracing::info!(
                    object_id = %event.object_id,
                    version = %event.version,
                    "downstream acknowledged"
                );
                Step::Done(Disposition::Acknowledged)
            }
            ProcessingState::AppProcessed => self.mark_processed(event).await,
            _ => {
                tracing::warn!(
                    object_id = %event.object_id,
                    version = %event.version,
                    state = %event.state,
                    "no transition for state, dropping event"
                );
                Step::Done(Disposition::dropped(DropReason::UnexpectedState))
            }
        }
    }

    /// FRESH: dedup, record as RECEIVED, persist.
    async fn intake(&self, event: Event) -> Step {
        let object_id = event.object_id.clone();
        let version = event.version;

        let admitted = self
            .inner
            .registry
            .with_slot_or_create(&object_id, move |slot| {
                if slot.history.is_stale(version) {
                    return Err(DropReason::Stale);
                }
                if slot.history.contains(version) {
                    return Err(DropReason::Duplicate);
                }
                let mut event = event;
                event.state = ProcessingState::Received;
                event.id.get_or_insert_with(EventId::new);
                event.touch();
                slot.history.record(event.clone());
                Ok((event, slot.history.checkpoint()))
            });

        let (event, history) = match admitted {
            Ok(admitted) => admitted,
            Err(reason) => return Step::Done(self.drop_event(&object_id, version, reason)),
        };

        tracing::debug!(%object_id, %version, "event received");
        if let Err(e) = self.inner.events.persist(event.clone()).await {
            self.store_failed(&object_id, version, &e);
        }
        self.save_history(&history).await;
        Step::Dispatch(event)
    }

    /// RECEIVED: request the transform and record its result.
    async fn transform(&self, event: Event) -> Step {
        let object_id = event.object_id;
        let version = event.version;

        let claimed = self.inner.registry.with_slot(&object_id, |slot| {
            let Some(recorded) = slot.history.get(version) else {
                return Err(if slot.history.is_stale(version) {
                    DropReason::Stale
                } else {
                    DropReason::UnknownVersion
                });
            };
            if recorded.state > ProcessingState::Received {
                return Err(DropReason::Stale);
            }
            let recorded = recorded.clone();
            if !slot.transforming.insert(version) {
                return Err(DropReason::InFlight);
            }
            Ok(recorded)
        });

        let recorded = match claimed {
            Some(Ok(recorded)) => recorded,
            Some(Err(reason)) => return Step::Done(self.drop_event(&object_id, version, reason)),
            None => return Step::Done(Disposition::dropped(DropReason::UnknownObject)),
        };

        let result = self.inner.coordinator.request_transform(&recorded).await;

        let payload = match result {
            Ok(payload) => payload,
            Err(e) => {
                self.inner.registry.with_slot(&object_id, |slot| {
                    slot.transforming.remove(&version);
                });
                return Step::Done(Disposition::Halted {
                    stage: Stage::Transform,
                    reason: e.to_string(),
                });
            }
        };

        let transformed = self
            .inner
            .registry
            .with_slot(&object_id, |slot| {
                slot.transforming.remove(&version);
                let entry = slot.history.get_mut(version)?;
                if entry.state != ProcessingState::Received {
                    return None;
                }
                entry.transformed_payload = Some(payload);
                entry.advance(ProcessingState::Transformed).ok()?;
                let event = entry.clone();
                Some((event, slot.history.checkpoint()))
            })
            .flatten();

        let Some((event, history)) = transformed else {
            // published or transformed elsewhere while this exchange ran
            return Step::Done(self.drop_event(&object_id, version, DropReason::Stale));
        };

        tracing::debug!(%object_id, %version, "event transformed");
        self.save_event(&event).await;
        self.save_history(&history).await;
        Step::Dispatch(event)
    }

    /// TRANSFORMED: publish if next in line, otherwise leave buffered.
    async fn evaluate(&self, event: Event) -> Step {
        let object_id = event.object_id.clone();
        let version = event.version;

        let evaluated = self.inner.registry.with_slot(&object_id, move |slot| {
            if slot.history.is_stale(version) {
                return (Gate::Drop(DropReason::Stale), None);
            }
            let Some(recorded) = slot.history.get_mut(version) else {
                return (Gate::Drop(DropReason::UnknownVersion), None);
            };

            // a transform result delivered from outside this dispatcher
            let mut adopted = None;
            if recorded.state == ProcessingState::Received {
                let Some(payload) = event.transformed_payload else {
                    return (Gate::Drop(DropReason::UnexpectedState), None);
                };
                recorded.transformed_payload = Some(payload);
                if recorded.advance(ProcessingState::Transformed).is_err() {
                    return (Gate::Drop(DropReason::UnexpectedState), None);
                }
                adopted = Some(recorded.clone());
            } else if recorded.state != ProcessingState::Transformed {
                return (Gate::Drop(DropReason::Stale), None);
            }
            let recorded = recorded.clone();
            let adopted = adopted.map(|event| (event, slot.history.checkpoint()));

            if !OrderingGate::is_eligible(&slot.history, version) {
                let watermark = slot.history.last_processed_version;
                return (Gate::Defer { watermark }, adopted);
            }
            if slot.publishing.is_some() {
                return (Gate::Drop(DropReason::InFlight), adopted);
            }
            slot.publishing = Some(version);
            (Gate::Publish(recorded), adopted)
        });

        let Some((gate, adopted)) = evaluated else {
            return Step::Done(Disposition::dropped(DropReason::UnknownObject));
        };

        if let Some((event, history)) = adopted {
            self.save_event(&event).await;
            self.save_history(&history).await;
        }

        match gate {
            Gate::Publish(event) => Step::Publish(event),
            Gate::Defer { watermark } => {
                metrics::counter!("sequencer_deferred_total").increment(1);
                tracing::info!(%object_id, %version, %watermark, "not next in line, buffering");
                Step::Done(Disposition::Deferred { version, watermark })
            }
            Gate::Drop(reason) => Step::Done(self.drop_event(&object_id, version, reason)),
        }
    }

    /// Runs the publish exchange for a claimed version.
    async fn publish(&self, event: Event) -> Step {
        match self.inner.coordinator.request_publish(&event).await {
            Ok(_) => {
                metrics::counter!("sequencer_published_total").increment(1);
                let mut event = event;
                event.state = ProcessingState::Published;
                event.touch();
                Step::Dispatch(event)
            }
            Err(e) => {
                self.inner.registry.with_slot(&event.object_id, |slot| {
                    if slot.publishing == Some(event.version) {
                        slot.publishing = None;
                    }
                });
                Step::Done(Disposition::Halted {
                    stage: Stage::Publish,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// PUBLISHED: advance the watermark, purge, and claim the next releasable
    /// version in one locked step.
    async fn complete_publish(&self, event: Event) -> Step {
        let object_id = event.object_id.clone();
        let version = event.version;

        let completed = self.inner.registry.with_slot(&object_id, |slot| {
            if slot.publishing == Some(version) {
                slot.publishing = None;
            }
            if slot.history.is_stale(version) {
                return Err(DropReason::Stale);
            }
            let recorded = slot.history.get(version).cloned();
            slot.history.advance_watermark(version);
            let purged = slot.history.purge_published();

            let next = if slot.publishing.is_none() {
                OrderingGate::next_releasable(&slot.history).cloned()
            } else {
                None
            };
            if let Some(next) = &next {
                slot.publishing = Some(next.version);
            }
            Ok((recorded, purged, next, slot.history.checkpoint()))
        });

        let (recorded, purged, next, history) = match completed {
            Some(Ok(completed)) => completed,
            Some(Err(reason)) => return Step::Done(self.drop_event(&object_id, version, reason)),
            None => return Step::Done(Disposition::dropped(DropReason::UnknownObject)),
        };

        let watermark = history.last_processed_version;
        tracing::info!(%object_id, %watermark, purged = purged.len(), "publish completed");

        let mut published = recorded.unwrap_or(event);
        published.state = ProcessingState::Published;
        published.touch();
        if published.id.is_some() {
            self.save_event(&published).await;
        }
        self.save_history(&history).await;

        match next {
            Some(next) => {
                tracing::info!(%object_id, version = %next.version, "releasing buffered version");
                Step::Publish(next)
            }
            None => Step::Done(Disposition::Advanced { watermark }),
        }
    }

    /// APP_PROCESSED: record the terminal state on the stored event only.
    async fn mark_processed(&self, event: Event) -> Step {
        if self.inner.registry.with_slot(&event.object_id, |_| ()).is_none() {
            tracing::warn!(object_id = %event.object_id, "processed signal for unknown object");
            return Step::Done(Disposition::dropped(DropReason::UnknownObject));
        }
        if event.id.is_none() {
            tracing::warn!(
                object_id = %event.object_id,
                version = %event.version,
                "processed signal without a stored event"
            );
            return Step::Done(Disposition::dropped(DropReason::UnknownVersion));
        }

        let mut event = event;
        event.touch();
        self.save_event(&event).await;
        tracing::info!(object_id = %event.object_id, version = %event.version, "event processed");
        Step::Done(Disposition::Processed)
    }

    fn drop_event(&self, object_id: &ObjectId, version: Version, reason: DropReason) -> Disposition {
        if matches!(reason, DropReason::Duplicate | DropReason::Stale) {
            metrics::counter!("sequencer_duplicates_total").increment(1);
        }
        tracing::warn!(%object_id, %version, ?reason, "dropping event");
        Disposition::dropped(reason)
    }

    async fn save_event(&self, event: &Event) {
        if let Err(e) = self.inner.events.find_and_merge(event).await {
            self.store_failed(&event.object_id, event.version, &e);
        }
    }

    async fn save_history(&self, history: &ObjectHistory) {
        if let Err(e) = self.inner.histories.find_and_merge(history).await {
            metrics::counter!("sequencer_store_failures_total").increment(1);
            tracing::error!(object_id = %history.object_id, error = %e, "failed to merge history");
        }
    }

    fn store_failed(&self, object_id: &ObjectId, version: Version, error: &event_store::EventStoreError) {
        metrics::counter!("sequencer_store_failures_total").increment(1);
        tracing::error!(%object_id, %version, %error, "failed to store event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{InMemoryPublishService, InMemoryTransformService};
    use event_store::{InMemoryEventStore, InMemoryHistoryStore, MessageGroup};

    type TestDispatcher = Dispatcher<
        InMemoryEventStore,
        InMemoryHistoryStore,
        InMemoryTransformService,
        InMemoryPublishService,
    >;

    fn dispatcher() -> (TestDispatcher, InMemoryPublishService) {
        let publish = InMemoryPublishService::new();
        let dispatcher = Dispatcher::new(
            InMemoryEventStore::new(),
            InMemoryHistoryStore::new(),
            InMemoryTransformService::new(),
            publish.clone(),
            SequencerConfig::new(),
        );
        (dispatcher, publish)
    }

    fn fresh(object_id: &str, version: i64) -> Event {
        Event::fresh(object_id, Version::new(version), MessageGroup::default(), "<a/>")
    }

    #[tokio::test]
    async fn test_first_version_publishes_and_advances() {
        let (dispatcher, publish) = dispatcher();

        let outcome = dispatcher.handle(fresh("A", 1)).await;

        assert_eq!(outcome, Disposition::Advanced { watermark: Version::new(1) });
        assert_eq!(publish.published_for(&ObjectId::new("A")), vec![Version::new(1)]);
        assert!(dispatcher.history(&ObjectId::new("A")).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_later_version_is_deferred() {
        let (dispatcher, publish) = dispatcher();

        let outcome = dispatcher.handle(fresh("A", 2)).await;

        assert_eq!(
            outcome,
            Disposition::Deferred {
                version: Version::new(2),
                watermark: Version::new(0),
            }
        );
        assert_eq!(publish.publish_count(), 0);
    }

    #[tokio::test]
    async fn test_redelivered_published_version_is_stale() {
        let (dispatcher, _) = dispatcher();
        dispatcher.handle(fresh("A", 1)).await;
        let outcome = dispatcher.handle(fresh("A", 1)).await;
        assert!(outcome.is_dropped_for(DropReason::Stale));
    }

    #[tokio::test]
    async fn test_ack_is_logged_only() {
        let (dispatcher, _) = dispatcher();
        let outcome = dispatcher
            .handle(fresh("A", 7).with_state(ProcessingState::AckReceived))
            .await;
        assert_eq!(outcome, Disposition::Acknowledged);
        assert!(dispatcher.history(&ObjectId::new("A")).is_none());
    }

    #[tokio::test]
    async fn test_transformed_delivery_for_unknown_object() {
        let (dispatcher, _) = dispatcher();
        let outcome = dispatcher
            .handle(fresh("nobody", 1).with_state(ProcessingState::Transformed))
            .await;
        assert!(outcome.is_dropped_for(DropReason::UnknownObject));
    }

    #[tokio::test]
    async fn test_published_signal_at_highest_version() {
        let (dispatcher, _) = dispatcher();
        dispatcher.handle(fresh("A", 1)).await;

        let outcome = dispatcher
            .handle(fresh("A", i64::MAX).with_state(ProcessingState::Published))
            .await;

        assert_eq!(
            outcome,
            Disposition::Advanced {
                watermark: Version::new(i64::MAX)
            }
        );
        assert!(dispatcher.history(&ObjectId::new("A")).unwrap().is_empty());
        assert!(dispatcher.handle(fresh("A", i64::MAX)).await.is_dropped_for(DropReason::Stale));
    }

    #[tokio::test]
    async fn test_replay_of_unknown_version() {
        let (dispatcher, _) = dispatcher();
        dispatcher.handle(fresh("A", 1)).await;

        let id = ObjectId::new("A");
        assert!(dispatcher.replay(&id, Version::new(1)).await.is_dropped_for(DropReason::Stale));
        assert!(
            dispatcher
                .replay(&id, Version::new(5))
                .await
                .is_dropped_for(DropReason::UnknownVersion)
        );
        assert!(
            dispatcher
                .replay(&ObjectId::new("B"), Version::new(1))
                .await
                .is_dropped_for(DropReason::UnknownObject)
        );
    }
}
