//! Single-flight registry for import batches
//!
//! At most one execution may run for a given batch id at a time. The guard
//! is RAII: dropping it releases the batch, so every exit path (success,
//! abort, timeout, panic unwind) frees the slot.

use std::collections::HashSet;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

/// Global single-flight registry singleton
pub static IMPORT_LOCKS: Lazy<SingleFlight> = Lazy::new(SingleFlight::default);

/// RAII guard holding the batch slot. Keep it alive for the duration of the
/// attempt sequence.
pub struct FlightGuard {
    batch_id: i64,
    registry: SingleFlight,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.registry.active.lock().remove(&self.batch_id);
    }
}

/// Mutual-exclusion keys, one per in-flight batch id
#[derive(Clone, Default)]
pub struct SingleFlight {
    active: Arc<Mutex<HashSet<i64>>>,
}

impl SingleFlight {
    /// Try to acquire the slot for a batch. Returns None when another
    /// execution already holds it.
    pub fn try_acquire(&self, batch_id: i64) -> Option<FlightGuard> {
        if !self.active.lock().insert(batch_id) {
            return None;
        }
        Some(FlightGuard {
            batch_id,
            registry: self.clone(),
        })
    }

    /// Whether a batch currently has an execution in flight
    pub fn is_active(&self, batch_id: i64) -> bool {
        self.active.lock().contains(&batch_id)
    }
}
