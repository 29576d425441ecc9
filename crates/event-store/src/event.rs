use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{EventStoreError, ObjectId, ProcessingState};

/// Unique identifier for a stored event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an event ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-object sequence number of an event.
///
/// Event versions start at 1. Version 0 is the watermark of an object that
/// has not published anything yet.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a new version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the initial watermark (0).
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the first event version (1).
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next version, saturating at `i64::MAX`.
    pub fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Returns the next version, or `None` past `i64::MAX`.
    pub fn checked_next(&self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Version> for i64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

/// Routing classification of an event, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageGroup {
    #[default]
    GopsParcelSub,
    GopsParcelPub,
    EodosEodControlPub,
    GopsEodControlSub,
    GopsEodStatusPub,
    EodosEodStatusSub,
}

impl MessageGroup {
    pub const ALL: [MessageGroup; 6] = [
        MessageGroup::GopsParcelSub,
        MessageGroup::GopsParcelPub,
        MessageGroup::EodosEodControlPub,
        MessageGroup::GopsEodControlSub,
        MessageGroup::GopsEodStatusPub,
        MessageGroup::EodosEodStatusSub,
    ];

    /// Name of the queue that published messages of this group are sent to.
    pub fn target_queue(&self) -> &'static str {
        match self {
            MessageGroup::GopsParcelSub => "gopsParcelSubQueue",
            MessageGroup::GopsEodControlSub => "gopsEodControlSubQueue",
            _ => "defaultQueue",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageGroup::GopsParcelSub => "GOPS_PARCEL_SUB",
            MessageGroup::GopsParcelPub => "GOPS_PARCEL_PUB",
            MessageGroup::EodosEodControlPub => "EODOS_EOD_CONTROL_PUB",
            MessageGroup::GopsEodControlSub => "GOPS_EOD_CONTROL_SUB",
            MessageGroup::GopsEodStatusPub => "GOPS_EOD_STATUS_PUB",
            MessageGroup::EodosEodStatusSub => "EODOS_EOD_STATUS_SUB",
        }
    }
}

impl std::fmt::Display for MessageGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageGroup {
    type Err = EventStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageGroup::ALL
            .into_iter()
            .find(|group| group.as_str() == s)
            .ok_or_else(|| EventStoreError::InvalidColumn {
                column: "message_group",
                value: s.to_string(),
            })
    }
}

/// One versioned unit of work travelling through the pipeline.
///
/// For a fixed `object_id` no two events share a `version`. The `state`
/// only ever moves forward, see [`ProcessingState`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Storage identity, assigned when the event is first persisted.
    pub id: Option<EventId>,

    /// The object this event is ordered against.
    pub object_id: ObjectId,

    /// Position of this event in the object's sequence.
    pub version: Version,

    /// Routing classification.
    pub group: MessageGroup,

    /// Current processing state.
    pub state: ProcessingState,

    /// Payload as received from ingress.
    pub input_payload: String,

    /// Payload produced by the transform stage.
    pub transformed_payload: Option<String>,

    pub created: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl Event {
    /// Creates a new, unpersisted event in the `Fresh` state.
    pub fn fresh(
        object_id: impl Into<ObjectId>,
        version: Version,
        group: MessageGroup,
        input_payload: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            object_id: object_id.into(),
            version,
            group,
            state: ProcessingState::Fresh,
            input_payload: input_payload.into(),
            transformed_payload: None,
            created: now,
            last_updated: now,
        }
    }

    /// Returns a copy of this event carrying a different state.
    ///
    /// No transition check is made; this is how a signal for an existing
    /// event (an acknowledgement, a re-delivery) is expressed.
    pub fn with_state(mut self, state: ProcessingState) -> Self {
        self.state = state;
        self
    }

    /// Moves the event forward to `next` and bumps `last_updated`.
    pub fn advance(&mut self, next: ProcessingState) -> Result<(), EventStoreError> {
        if !self.state.can_advance_to(next) {
            return Err(EventStoreError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        self.touch();
        Ok(())
    }

    /// Sets `last_updated` to now.
    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }

    /// Name of the queue this event is published to.
    pub fn target_queue(&self) -> &'static str {
        self.group.target_queue()
    }
}
