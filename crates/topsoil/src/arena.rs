//! The identity arena: one live handle per persisted row.
//!
//! Every proxy the database hands out for `(model, id)` shares the handle
//! stored here, so a write through one copy is seen by all of them and a
//! delete marks all of them stale. Slots are removed on delete, drop and
//! close; each slot records the generation it was issued under.

use std::collections::HashMap;
use std::sync::Weak;
use topsoil_core::{ModelHandle, ModelInfo, ModelStore, StaleReason};

#[derive(Default)]
pub(crate) struct Arena {
    slots: HashMap<(&'static str, i64), ModelHandle>,
    generation: u64,
}

impl Arena {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// The live handle for `(model, id)`, issuing a new one on a miss.
    pub(crate) fn get_or_issue(
        &mut self,
        model: &'static ModelInfo,
        id: i64,
        store: &Weak<dyn ModelStore>,
    ) -> ModelHandle {
        if let Some(handle) = self.slots.get(&(model.name, id)) {
            tracing::trace!(model = model.name, id, "arena hit");
            return handle.clone();
        }
        self.generation += 1;
        let handle = ModelHandle::bound(model, id, store.clone(), self.generation);
        self.slots.insert((model.name, id), handle.clone());
        handle
    }

    /// Adopt a handle that was just bound to `id`.
    pub(crate) fn adopt(&mut self, id: i64, handle: ModelHandle) {
        self.generation += 1;
        self.slots.insert((handle.model().name, id), handle);
    }

    /// Remove the slot of a deleted row and invalidate its handle.
    pub(crate) fn evict(&mut self, model: &ModelInfo, id: i64) {
        if let Some(handle) = self.slots.remove(&(model.name, id)) {
            handle.mark_stale(StaleReason::Deleted);
        }
    }

    /// Invalidate and remove every handle of `model`.
    pub(crate) fn evict_model(&mut self, model: &ModelInfo, reason: StaleReason) -> usize {
        let mut evicted = 0;
        self.slots.retain(|(name, _), handle| {
            if *name == model.name {
                handle.mark_stale(reason);
                evicted += 1;
                false
            } else {
                true
            }
        });
        evicted
    }

    /// Invalidate and remove every handle.
    pub(crate) fn clear(&mut self, reason: StaleReason) -> usize {
        let evicted = self.slots.len();
        for (_, handle) in self.slots.drain() {
            handle.mark_stale(reason);
        }
        evicted
    }
}
