// ── Callback registry ──
//
// Per-device ordered listener lists. Listeners are never removed.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::error;

/// A status-change callback. Runs on the scheduler task; keep it short.
pub type Listener = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
pub(crate) struct CallbackRegistry {
    listeners: DashMap<String, Vec<Listener>>,
}

impl CallbackRegistry {
    /// Append a listener. Registering the same callback twice makes it fire
    /// twice.
    pub(crate) fn register(&self, device_id: &str, listener: Listener) {
        self.listeners
            .entry(device_id.to_owned())
            .or_default()
            .push(listener);
    }

    pub(crate) fn count(&self, device_id: &str) -> usize {
        self.listeners.get(device_id).map_or(0, |l| l.len())
    }

    /// Call every listener for `device_id` in registration order. A panic
    /// in one listener is logged and the rest still run.
    pub(crate) fn notify(&self, device_id: &str) {
        // Clone out so listeners may register more listeners.
        let listeners = match self.listeners.get(device_id) {
            Some(entry) => entry.value().clone(),
            None => return,
        };

        for (index, listener) in listeners.iter().enumerate() {
            if catch_unwind(AssertUnwindSafe(listener.as_ref())).is_err() {
                error!(device = %device_id, index, "status listener panicked");
            }
        }
    }
}
