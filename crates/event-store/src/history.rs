//! Per-object coordination record.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Event, ObjectId, Version};

/// Processing history of one object id.
///
/// `last_processed_version` is the watermark: the highest version whose
/// publish has completed. `versions` buffers every received version that has
/// not been purged yet, keyed (and therefore iterated) in version order.
///
/// After [`purge_published`](Self::purge_published) runs, no entry at or
/// below the watermark remains.
///
/// `revision` orders copies of the same history. Stores keep the copy with
/// the highest revision, so a copy written late never replaces a newer one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectHistory {
    pub object_id: ObjectId,
    pub last_processed_version: Version,
    pub versions: BTreeMap<Version, Event>,
    #[serde(default)]
    pub revision: i64,
}

impl ObjectHistory {
    /// Creates an empty history with the watermark at 0.
    pub fn new(object_id: ObjectId) -> Self {
        Self {
            object_id,
            last_processed_version: Version::initial(),
            versions: BTreeMap::new(),
            revision: 0,
        }
    }

    /// Bumps the revision and returns a copy to be written to a store.
    pub fn checkpoint(&mut self) -> ObjectHistory {
        self.revision += 1;
        self.clone()
    }

    /// Returns true if this copy may replace `stored`.
    pub fn supersedes(&self, stored: &ObjectHistory) -> bool {
        self.revision >= stored.revision
    }

    /// Returns true if `version` is buffered.
    pub fn contains(&self, version: Version) -> bool {
        self.versions.contains_key(&version)
    }

    pub fn get(&self, version: Version) -> Option<&Event> {
        self.versions.get(&version)
    }

    pub fn get_mut(&mut self, version: Version) -> Option<&mut Event> {
        self.versions.get_mut(&version)
    }

    /// Returns true if `version` is at or below the watermark, i.e. already
    /// published (or never valid, for version 0).
    pub fn is_stale(&self, version: Version) -> bool {
        version <= self.last_processed_version
    }

    /// Inserts or replaces the entry for the event's version.
    pub fn record(&mut self, event: Event) -> Option<Event> {
        self.versions.insert(event.version, event)
    }

    /// Moves the watermark up to `version`. Never moves it down.
    ///
    /// Returns true if the watermark changed.
    pub fn advance_watermark(&mut self, version: Version) -> bool {
        if version > self.last_processed_version {
            self.last_processed_version = version;
            true
        } else {
            false
        }
    }

    /// Removes every entry at or below the watermark and returns the removed
    /// versions in ascending order.
    pub fn purge_published(&mut self) -> Vec<Version> {
        let retained = match self.last_processed_version.checked_next() {
            Some(next) => self.versions.split_off(&next),
            None => BTreeMap::new(),
        };
        let purged = std::mem::replace(&mut self.versions, retained);
        purged.into_keys().collect()
    }

    /// Buffered versions in ascending order.
    pub fn pending_versions(&self) -> Vec<Version> {
        self.versions.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}
