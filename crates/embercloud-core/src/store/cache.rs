// ── Status cache ──
//
// Latest status document per device. Reads are lock-free `DashMap`
// snapshots; writes only happen on the scheduler task.

use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use serde_json::Value;
use tracing::trace;

use crate::model::{self, Section};
use crate::store::registry::{CallbackRegistry, Listener};

/// One device's most recent status.
#[derive(Debug, Clone)]
pub struct StatusRecord {
    /// The decoded document, with `status.connected` patched to match
    /// [`connected`](Self::connected).
    pub document: Value,
    pub connected: bool,
}

/// Status records plus the listeners that watch them.
#[derive(Default)]
pub struct StatusCache {
    records: DashMap<String, StatusRecord>,
    registry: CallbackRegistry,
    transport_established: AtomicBool,
}

impl StatusCache {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Transport flag ───────────────────────────────────────────────

    pub fn set_transport_established(&self, established: bool) {
        self.transport_established
            .store(established, Ordering::Release);
    }

    pub fn transport_established(&self) -> bool {
        self.transport_established.load(Ordering::Acquire)
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Replace the record for `device_id` and notify its listeners.
    ///
    /// The record is connected only while the broker session is up and the
    /// document does not itself report the device as disconnected.
    pub fn record_status(&self, device_id: &str, mut document: Value) {
        let connected =
            self.transport_established() && model::reported_connected(&document).unwrap_or(true);
        patch_connected(&mut document, connected);

        self.records.insert(
            device_id.to_owned(),
            StatusRecord {
                document,
                connected,
            },
        );
        trace!(device = %device_id, connected, "status recorded");

        self.registry.notify(device_id);
    }

    /// Force every existing record offline, then fire the listeners of
    /// every device in `directory` (recorded or not).
    pub fn mark_all_disconnected<S: AsRef<str>>(&self, directory: &[S]) {
        for mut entry in self.records.iter_mut() {
            let record = entry.value_mut();
            record.connected = false;
            patch_connected(&mut record.document, false);
        }

        for device_id in directory {
            self.registry.notify(device_id.as_ref());
        }
    }

    pub fn register_listener(&self, device_id: &str, listener: Listener) {
        self.registry.register(device_id, listener);
    }

    pub fn listener_count(&self, device_id: &str) -> usize {
        self.registry.count(device_id)
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn record(&self, device_id: &str) -> Option<StatusRecord> {
        self.records.get(device_id).map(|r| r.value().clone())
    }

    pub fn section(&self, device_id: &str, section: Section) -> Option<Value> {
        self.records
            .get(device_id)
            .and_then(|r| r.document.get(section.key()).cloned())
    }

    pub fn connectivity(&self, device_id: &str) -> bool {
        self.records.get(device_id).is_some_and(|r| r.connected)
    }

    /// Whether any directory device is connected and mid-cook.
    ///
    /// `None` while some device has no record yet, since the answer is
    /// unknown until every device has reported.
    pub fn any_device_active<S: AsRef<str>>(&self, directory: &[S]) -> Option<bool> {
        let mut active = false;
        for device_id in directory {
            let record = self.records.get(device_id.as_ref())?;
            active |= model::is_active(record.connected, &record.document);
        }
        Some(active)
    }
}

fn patch_connected(document: &mut Value, connected: bool) {
    if let Some(status) = document.get_mut("status").and_then(Value::as_object_mut) {
        status.insert("connected".into(), Value::Bool(connected));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn counter(cache: &StatusCache, device: &str) -> Arc<AtomicUsize> {
        let hits = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&hits);
        cache.register_listener(
            device,
            Arc::new(move || {
                inner.fetch_add(1, Ordering::SeqCst);
            }),
        );
        hits
    }

    #[test]
    fn record_status_marks_connected_and_fires_once() {
        let cache = StatusCache::new();
        cache.set_transport_established(true);
        let hits = counter(&cache, "grillA");

        cache.record_status(
            "grillA",
            json!({ "status": { "connected": true, "system_status": 5, "grill": 225 } }),
        );

        assert!(cache.connectivity("grillA"));
        assert_eq!(cache.section("grillA", Section::Status).unwrap()["connected"], json!(true));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn record_without_transport_is_disconnected() {
        let cache = StatusCache::new();
        cache.record_status("grillA", json!({ "status": { "connected": true } }));

        assert!(!cache.connectivity("grillA"));
        assert_eq!(
            cache.section("grillA", Section::Status).unwrap()["connected"],
            json!(false)
        );
    }

    #[test]
    fn device_reported_offline_stays_offline() {
        let cache = StatusCache::new();
        cache.set_transport_established(true);
        cache.record_status("grillA", json!({ "status": { "connected": false } }));
        assert!(!cache.connectivity("grillA"));
    }

    #[test]
    fn reads_on_missing_device() {
        let cache = StatusCache::new();
        assert!(cache.record("ghost").is_none());
        assert!(cache.section("ghost", Section::Details).is_none());
        assert!(!cache.connectivity("ghost"));
    }

    #[test]
    fn sections_are_returned_individually() {
        let cache = StatusCache::new();
        cache.record_status(
            "grillA",
            json!({
                "status": {},
                "details": { "friendlyName": "Deck" },
                "limits": { "max_grill_temp": 500 }
            }),
        );

        assert_eq!(
            cache.section("grillA", Section::Details),
            Some(json!({ "friendlyName": "Deck" }))
        );
        assert_eq!(
            cache.section("grillA", Section::Limits),
            Some(json!({ "max_grill_temp": 500 }))
        );
        assert_eq!(cache.section("grillA", Section::Settings), None);
    }

    #[test]
    fn mark_all_disconnected_fires_every_directory_listener() {
        let cache = StatusCache::new();
        cache.set_transport_established(true);
        let a = counter(&cache, "grillA");
        let b = counter(&cache, "grillB");

        cache.record_status("grillA", json!({ "status": { "connected": true } }));
        cache.mark_all_disconnected(&["grillA", "grillB"]);

        assert!(!cache.connectivity("grillA"));
        assert_eq!(
            cache.section("grillA", Section::Status).unwrap()["connected"],
            json!(false)
        );
        assert_eq!(a.load(Ordering::SeqCst), 2);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn duplicate_listeners_both_fire() {
        let cache = StatusCache::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let listener: Listener = {
            let hits = Arc::clone(&hits);
            Arc::new(move || {
                hits.fetch_add(1, Ordering::SeqCst);
            })
        };
        cache.register_listener("grillA", Arc::clone(&listener));
        cache.register_listener("grillA", listener);

        cache.record_status("grillA", json!({ "status": {} }));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(cache.listener_count("grillA"), 2);
    }

    #[test]
    fn activity_is_unknown_until_every_device_reports() {
        let cache = StatusCache::new();
        cache.set_transport_established(true);
        let directory = ["grillA", "grillB"];

        cache.record_status("grillA", json!({ "status": { "system_status": 5 } }));
        assert_eq!(cache.any_device_active(&directory), None);

        cache.record_status("grillB", json!({ "status": { "system_status": 3 } }));
        assert_eq!(cache.any_device_active(&directory), Some(true));

        cache.record_status("grillA", json!({ "status": { "system_status": 9 } }));
        assert_eq!(cache.any_device_active(&directory), Some(false));
    }
}
