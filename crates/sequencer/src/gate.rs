//! Publication ordering rule.

use event_store::{Event, ObjectHistory, ProcessingState, Version};

/// Decides which version of an object may publish next.
///
/// A version is eligible iff it is exactly one above the object's watermark,
/// which yields gap-free, strictly ascending publication regardless of the
/// order in which versions arrive or finish transforming.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderingGate;

impl OrderingGate {
    /// Returns true if `version` is next in line for `history`.
    pub fn is_eligible(history: &ObjectHistory, version: Version) -> bool {
        history.last_processed_version.checked_next() == Some(version)
    }

    /// Returns the buffered entry that may publish now, if any: the version
    /// right above the watermark, provided its transform has completed.
    pub fn next_releasable(history: &ObjectHistory) -> Option<&Event> {
        history
            .get(history.last_processed_version.checked_next()?)
            .filter(|event| event.state == ProcessingState::Transformed)
    }
}
