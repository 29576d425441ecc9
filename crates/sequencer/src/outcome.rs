//! How the handling of an event ended.

use event_store::Version;
use serde::Serialize;

/// External exchange an event can be waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Transform,
    Publish,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Transform => "transform",
            Stage::Publish => "publish",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an event was discarded without changing any history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// The version is already buffered for this object.
    Duplicate,
    /// The version is at or below the watermark, or the recorded entry is
    /// already further along than the delivered state.
    Stale,
    /// An exchange for this version is already running.
    InFlight,
    /// No history exists for the object.
    UnknownObject,
    /// The object is known but this version is not buffered.
    UnknownVersion,
    /// The dispatcher has no transition for the delivered state.
    UnexpectedState,
}

/// Final result of [`Dispatcher::handle`](crate::Dispatcher::handle).
///
/// One call follows an event through every step it triggers, including the
/// release of buffered successors, and reports the last one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Disposition {
    /// Discarded, history untouched.
    Dropped { reason: DropReason },

    /// Transformed but not next in line; buffered until the watermark
    /// reaches `version - 1`.
    Deferred {
        version: Version,
        watermark: Version,
    },

    /// A collaborator exchange failed. The event stays at its last recorded
    /// state until replayed or released.
    Halted { stage: Stage, reason: String },

    /// A publish completed and the watermark moved to `watermark`. No
    /// buffered successor was ready.
    Advanced { watermark: Version },

    /// A downstream acknowledgement was logged.
    Acknowledged,

    /// The event was marked as processed by the consuming application.
    Processed,
}

impl Disposition {
    pub fn dropped(reason: DropReason) -> Self {
        Disposition::Dropped { reason }
    }

    /// Returns true if the event was discarded for `reason`.
    pub fn is_dropped_for(&self, reason: DropReason) -> bool {
        matches!(self, Disposition::Dropped { reason: r } if *r == reason)
    }
}
