//! Per-client baseline cache
//!
//! One process-wide instance is shared by handle between request contexts.
//! Each client id owns its own lock, so concurrent work for different clients
//! never contends and work for the same client is serialized.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

type Slot = Arc<Mutex<Option<Value>>>;

/// Map from client id to the last snapshot that client is known to hold
#[derive(Debug, Default)]
pub struct ClientStateCache {
    slots: Mutex<HashMap<String, Slot>>,
}

impl ClientStateCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the cached baseline for a client
    pub fn get(&self, client_id: &str) -> Option<Value> {
        let slot = self.slots.lock().get(client_id).cloned()?;
        let baseline = slot.lock();
        baseline.clone()
    }

    /// Replace the cached baseline for a client
    pub fn put(&self, client_id: &str, snapshot: Value) {
        let slot = self.slot(client_id);
        *slot.lock() = Some(snapshot);
    }

    /// Drop the baseline for one client, or for every client when `None`
    pub fn clear(&self, client_id: Option<&str>) {
        match client_id {
            Some(id) => {
                if let Some(slot) = self.get_slot(id) {
                    *slot.lock() = None;
                    self.prune(id, &slot);
                    debug!("Cleared baseline for client {}", id);
                }
            }
            None => {
                let slots: Vec<(String, Slot)> = self
                    .slots
                    .lock()
                    .iter()
                    .map(|(id, slot)| (id.clone(), slot.clone()))
                    .collect();
                for (id, slot) in &slots {
                    *slot.lock() = None;
                    self.prune(id, slot);
                }
                debug!("Cleared baselines for {} clients", slots.len());
            }
        }
    }

    /// Whether a baseline is cached for this client
    pub fn contains(&self, client_id: &str) -> bool {
        self.get_slot(client_id)
            .map(|slot| slot.lock().is_some())
            .unwrap_or(false)
    }

    /// Number of clients with a cached baseline
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| slot.lock().is_some())
            .count()
    }

    /// Whether no client has a cached baseline
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of all clients with a cached baseline, sorted
    pub fn client_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .slots
            .lock()
            .iter()
            .filter(|(_, slot)| slot.lock().is_some())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Run `f` with exclusive access to one client's baseline.
    ///
    /// The baseline is read, diffed and replaced inside a single critical
    /// section, so two encodes for the same client can never observe the same
    /// pre-update baseline. `f` must only commit on success.
    pub(crate) fn with_baseline<R>(
        &self,
        client_id: &str,
        f: impl FnOnce(&mut Option<Value>) -> R,
    ) -> R {
        let slot = self.slot(client_id);
        let mut baseline = slot.lock();
        let result = f(&mut baseline);
        let empty = baseline.is_none();
        drop(baseline);

        if empty {
            self.prune(client_id, &slot);
        }
        result
    }

    fn get_slot(&self, client_id: &str) -> Option<Slot> {
        self.slots.lock().get(client_id).cloned()
    }

    fn slot(&self, client_id: &str) -> Slot {
        self.slots
            .lock()
            .entry(client_id.to_string())
            .or_default()
            .clone()
    }

    // Slots are only handed out under the map lock, so a slot whose sole
    // holders are the map and the caller cannot receive a later write.
    fn prune(&self, client_id: &str, slot: &Slot) {
        let mut slots = self.slots.lock();
        let unused_and_empty = slots.get(client_id).is_some_and(|current| {
            Arc::ptr_eq(current, slot)
                && Arc::strong_count(current) == 2
                && current.try_lock().is_some_and(|b| b.is_none())
        });
        if unused_and_empty {
            slots.remove(client_id);
        }
    }
}
