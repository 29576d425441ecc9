//! Storage layer of the ordered event pipeline.
//!
//! Holds the data model (versioned [`Event`]s and the per-object
//! [`ObjectHistory`] that coordinates their ordering) together with the two
//! persistence contracts the sequencer depends on: [`EventStore`] and
//! [`HistoryStore`]. Both come with in-memory and PostgreSQL implementations.

pub mod error;
pub mod event;
pub mod history;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod state;
pub mod store;

pub use common::ObjectId;
pub use error::{EventStoreError, Result};
pub use event::{Event, EventId, MessageGroup, Version};
pub use history::ObjectHistory;
pub use memory::{InMemoryEventStore, InMemoryHistoryStore};
pub use postgres::{PostgresEventStore, PostgresHistoryStore};
pub use query::EventQuery;
pub use state::ProcessingState;
pub use store::{EventStore, HistoryStore, HistoryStream};
