//! Sequencer error types.

use common::ObjectId;
use event_store::{EventStoreError, Version};
use thiserror::Error;

use crate::outcome::Stage;

/// Errors raised by the transform/publish collaborators and their exchanges.
#[derive(Debug, Error)]
pub enum SequencerError {
    /// The transform collaborator rejected or failed the event.
    #[error("Transform service error: {0}")]
    TransformService(String),

    /// The publish collaborator failed to deliver the event.
    #[error("Publish service error: {0}")]
    PublishService(String),

    /// An exchange did not complete within the configured timeout.
    #[error("{stage} of object {object_id} version {version} timed out after {timeout_ms}ms")]
    Timeout {
        stage: Stage,
        object_id: ObjectId,
        version: Version,
        timeout_ms: u128,
    },

    /// A store collaborator failed.
    #[error("Store error: {0}")]
    Store(#[from] EventStoreError),
}

impl SequencerError {
    /// Returns true if this error came from an exchange timing out.
    pub fn is_timeout(&self) -> bool {
        matches!(self, SequencerError::Timeout { .. })
    }
}
