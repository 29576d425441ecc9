use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    Event, EventId, EventQuery, EventStoreError, ObjectHistory, ObjectId, Result,
    store::{EventStore, HistoryStore, HistoryStream, merge_into},
};

/// In-memory event store.
///
/// Used for tests and for running the service without a database.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    events: Arc<RwLock<HashMap<EventId, Event>>>,
    fail_on_merge: Arc<AtomicBool>,
}

impl InMemoryEventStore {
    /// Creates a new empty in-memory event store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of events stored.
    pub async fn event_count(&self) -> usize {
        self.events.read().await.len()
    }

    /// Makes every subsequent `find_and_merge` fail until reset.
    pub fn set_fail_on_merge(&self, fail: bool) {
        self.fail_on_merge.store(fail, Ordering::SeqCst);
    }

    /// Clears all events.
    pub async fn clear(&self) {
        self.events.write().await.clear();
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn persist(&self, mut event: Event) -> Result<Event> {
        let mut store = self.events.write().await;

        let taken = store
            .values()
            .any(|e| e.object_id == event.object_id && e.version == event.version);
        if taken {
            return Err(EventStoreError::DuplicateVersion {
                object_id: event.object_id,
                version: event.version,
            });
        }

        let id = *event.id.get_or_insert_with(EventId::new);
        store.insert(id, event.clone());
        Ok(event)
    }

    async fn find_and_merge(&self, event: &Event) -> Result<Event> {
        if self.fail_on_merge.load(Ordering::SeqCst) {
            return Err(EventStoreError::Unavailable(
                "merge rejected by fault injection".to_string(),
            ));
        }

        let id = event.id.ok_or_else(|| EventStoreError::Unpersisted {
            object_id: event.object_id.clone(),
            version: event.version,
        })?;

        let mut store = self.events.write().await;
        let existing = store
            .get_mut(&id)
            .ok_or(EventStoreError::EventNotFound(id))?;
        merge_into(existing, event);
        Ok(existing.clone())
    }

    async fn get(&self, id: EventId) -> Result<Option<Event>> {
        Ok(self.events.read().await.get(&id).cloned())
    }

    async fn get_events_for_object(&self, object_id: &ObjectId) -> Result<Vec<Event>> {
        let store = self.events.read().await;
        let mut events: Vec<_> = store
            .values()
            .filter(|e| &e.object_id == object_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.version);
        Ok(events)
    }

    async fn query_events(&self, query: EventQuery) -> Result<Vec<Event>> {
        let store = self.events.read().await;
        let mut events: Vec<_> = store
            .values()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();

        events.sort_by(|a, b| {
            a.object_id
                .cmp(&b.object_id)
                .then(a.version.cmp(&b.version))
        });

        let offset = query.offset.unwrap_or(0);
        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(events.into_iter().skip(offset).take(limit).collect())
    }
}

/// In-memory history store.
#[derive(Clone, Default)]
pub struct InMemoryHistoryStore {
    histories: Arc<RwLock<HashMap<ObjectId, ObjectHistory>>>,
    fail_on_merge: Arc<AtomicBool>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored histories.
    pub async fn history_count(&self) -> usize {
        self.histories.read().await.len()
    }

    /// Makes every subsequent `find_and_merge` fail until reset.
    pub fn set_fail_on_merge(&self, fail: bool) {
        self.fail_on_merge.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn find_and_merge(&self, history: &ObjectHistory) -> Result<ObjectHistory> {
        if self.fail_on_merge.load(Ordering::SeqCst) {
            return Err(EventStoreError::Unavailable(
                "merge rejected by fault injection".to_string(),
            ));
        }

        let mut store = self.histories.write().await;
        match store.get_mut(&history.object_id) {
            Some(stored) if !history.supersedes(stored) => {
                tracing::debug!(
                    object_id = %history.object_id,
                    revision = history.revision,
                    stored_revision = stored.revision,
                    "ignoring older history copy"
                );
                Ok(stored.clone())
            }
            Some(stored) => {
                *stored = history.clone();
                Ok(history.clone())
            }
            None => {
                store.insert(history.object_id.clone(), history.clone());
                Ok(history.clone())
            }
        }
    }

    async fn load(&self, object_id: &ObjectId) -> Result<Option<ObjectHistory>> {
        Ok(self.histories.read().await.get(object_id).cloned())
    }

    async fn stream_all(&self) -> Result<HistoryStream> {
        use futures_util::stream;

        let store = self.histories.read().await;
        let mut histories: Vec<_> = store.values().cloned().collect();
        histories.sort_by(|a, b| a.object_id.cmp(&b.object_id));

        let stream = stream::iter(histories.into_iter().map(Ok));
        Ok(Box::pin(stream))
    }
}
