use common::ObjectId;
use thiserror::Error;

use crate::{EventId, ProcessingState, Version};

/// Errors that can occur when interacting with the event or history stores.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// No stored event has the given id. Merges are update-only.
    #[error("Event not found: {0}")]
    EventNotFound(EventId),

    /// The event was never persisted, so it has no id to merge on.
    #[error("Event for object {object_id} version {version} has not been persisted")]
    Unpersisted { object_id: ObjectId, version: Version },

    /// An event with the same object id and version is already stored.
    #[error("Duplicate version {version} for object {object_id}")]
    DuplicateVersion { object_id: ObjectId, version: Version },

    /// A state change would move an event backwards or out of a terminal state.
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition {
        from: ProcessingState,
        to: ProcessingState,
    },

    /// A stored column held a value that does not decode into the model.
    #[error("Invalid value {value:?} in column {column}")]
    InvalidColumn { column: &'static str, value: String },

    /// The store is temporarily unable to serve the request.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, EventStoreError>;
