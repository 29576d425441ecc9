use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;

use crate::{Event, EventId, EventQuery, ObjectHistory, ObjectId, Result};

/// A stream of stored histories.
pub type HistoryStream = Pin<Box<dyn Stream<Item = Result<ObjectHistory>> + Send>>;

/// Durable record of individual events.
///
/// Implementations must be thread-safe and tolerate concurrent merges of
/// different versions of the same object (last write wins per id).
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Stores a new event and returns it as stored.
    ///
    /// Assigns an id if the event has none. Fails with `DuplicateVersion`
    /// if the object already has an event with this version.
    async fn persist(&self, event: Event) -> Result<Event>;

    /// Updates an existing event with the desired post-state.
    ///
    /// Update-only: copies `state`, `transformed_payload` and `last_updated`
    /// onto the stored event with the same id and returns the merged result.
    /// Fails with `Unpersisted` if `event.id` is `None` and with
    /// `EventNotFound` if no event has that id.
    async fn find_and_merge(&self, event: &Event) -> Result<Event>;

    /// Retrieves an event by id.
    async fn get(&self, id: EventId) -> Result<Option<Event>>;

    /// Retrieves all events for an object, oldest version first.
    async fn get_events_for_object(&self, object_id: &ObjectId) -> Result<Vec<Event>>;

    /// Retrieves events matching a query, ordered by object id then version.
    async fn query_events(&self, query: EventQuery) -> Result<Vec<Event>>;
}

/// Durable mirror of per-object histories.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Creates the history if absent, otherwise overwrites its watermark and
    /// buffered versions unless the stored copy has a higher revision.
    /// Returns the stored result.
    async fn find_and_merge(&self, history: &ObjectHistory) -> Result<ObjectHistory>;

    /// Loads the history of one object.
    async fn load(&self, object_id: &ObjectId) -> Result<Option<ObjectHistory>>;

    /// Streams every stored history.
    async fn stream_all(&self) -> Result<HistoryStream>;
}

/// Copies the fields a merge is allowed to change onto the stored event.
pub(crate) fn merge_into(existing: &mut Event, update: &Event) {
    existing.state = update.state;
    existing.transformed_payload = update.transformed_payload.clone();
    existing.last_updated = update.last_updated;
}
