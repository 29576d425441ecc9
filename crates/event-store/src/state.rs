//! Processing state machine of a single event.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::EventStoreError;

/// Where an event is in the transform/publish pipeline.
///
/// State transitions only move forward:
/// ```text
/// Fresh ──► Received ──► Transformed ──► Published ──┬──► AckReceived
///                                                    └──► AppProcessed
/// ```
///
/// The variants are declared in pipeline order, so `Ord` compares how far
/// along two states are. New states may be added; callers matching on this
/// enum must keep a fallback arm.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ProcessingState {
    /// Created by ingress, not yet registered in any history.
    #[default]
    Fresh,

    /// Registered in the object's history, transform requested.
    Received,

    /// Transform completed; waiting for its turn to publish.
    Transformed,

    /// Publish completed.
    Published,

    /// Downstream acknowledged the published message (terminal state).
    AckReceived,

    /// The consuming application processed the message (terminal state).
    AppProcessed,
}

impl ProcessingState {
    /// All states in pipeline order.
    pub const ALL: [ProcessingState; 6] = [
        ProcessingState::Fresh,
        ProcessingState::Received,
        ProcessingState::Transformed,
        ProcessingState::Published,
        ProcessingState::AckReceived,
        ProcessingState::AppProcessed,
    ];

    /// Returns true if this is a terminal (absorbing) state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessingState::AckReceived | ProcessingState::AppProcessed
        )
    }

    /// Returns true if an event in this state may move to `next`.
    pub fn can_advance_to(&self, next: ProcessingState) -> bool {
        !self.is_terminal() && next > *self
    }

    /// Returns the state name as it appears on the wire and in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingState::Fresh => "FRESH",
            ProcessingState::Received => "RECEIVED",
            ProcessingState::Transformed => "TRANSFORMED",
            ProcessingState::Published => "PUBLISHED",
            ProcessingState::AckReceived => "ACK_RECEIVED",
            ProcessingState::AppProcessed => "APP_PROCESSED",
        }
    }
}

impl std::fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingState {
    type Err = EventStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProcessingState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| EventStoreError::InvalidColumn {
                column: "state",
                value: s.to_string(),
            })
    }
}
