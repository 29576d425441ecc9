//! Per-object serialized state.
//!
//! Every object id owns one [`ObjectSlot`] behind its own mutex. All
//! read-modify-write of a history happens inside a synchronous closure passed
//! to [`HistoryRegistry::with_slot`], so the lock can never be held across an
//! `.await` on a collaborator. Different object ids never contend.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use common::ObjectId;
use event_store::{ObjectHistory, Version};

/// History of one object plus the exchanges currently running for it.
#[derive(Debug)]
pub struct ObjectSlot {
    pub history: ObjectHistory,
    /// Versions with a transform exchange in flight.
    pub transforming: BTreeSet<Version>,
    /// Version with a publish exchange in flight. The gate admits at most
    /// one version per object, so one marker is enough.
    pub publishing: Option<Version>,
}

impl ObjectSlot {
    fn new(history: ObjectHistory) -> Self {
        Self {
            history,
            transforming: BTreeSet::new(),
            publishing: None,
        }
    }
}

/// Keyed store of object slots.
#[derive(Debug, Default)]
pub struct HistoryRegistry {
    slots: RwLock<HashMap<ObjectId, Arc<Mutex<ObjectSlot>>>>,
}

impl HistoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, object_id: &ObjectId) -> Option<Arc<Mutex<ObjectSlot>>> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(object_id)
            .cloned()
    }

    fn slot_or_create(&self, object_id: &ObjectId) -> Arc<Mutex<ObjectSlot>> {
        if let Some(slot) = self.slot(object_id) {
            return slot;
        }
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots
            .entry(object_id.clone())
            .or_insert_with(|| {
                tracing::info!(%object_id, "no history for object, creating one");
                Arc::new(Mutex::new(ObjectSlot::new(ObjectHistory::new(
                    object_id.clone(),
                ))))
            })
            .clone()
    }

    /// Runs `f` on the slot of `object_id` while holding its lock.
    ///
    /// Returns `None` if the object has no history.
    pub fn with_slot<R>(&self, object_id: &ObjectId, f: impl FnOnce(&mut ObjectSlot) -> R) -> Option<R> {
        let slot = self.slot(object_id)?;
        let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        Some(f(&mut guard))
    }

    /// Like [`with_slot`](Self::with_slot), creating an empty history first
    /// if the object is new.
    pub fn with_slot_or_create<R>(
        &self,
        object_id: &ObjectId,
        f: impl FnOnce(&mut ObjectSlot) -> R,
    ) -> R {
        let slot = self.slot_or_create(object_id);
        let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Adopts a history loaded from storage. Returns false, leaving the
    /// registry untouched, if the object is already tracked.
    pub fn install(&self, history: ObjectHistory) -> bool {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        if slots.contains_key(&history.object_id) {
            return false;
        }
        slots.insert(
            history.object_id.clone(),
            Arc::new(Mutex::new(ObjectSlot::new(history))),
        );
        true
    }

    /// Returns a copy of the object's history.
    pub fn snapshot(&self, object_id: &ObjectId) -> Option<ObjectHistory> {
        self.with_slot(object_id, |slot| slot.history.clone())
    }

    /// Object ids currently tracked, in sorted order.
    pub fn object_ids(&self) -> Vec<ObjectId> {
        let mut ids: Vec<_> = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.slots.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
