// ── Status document helpers ──
//
// Device status documents are opaque JSON. The core only reads
// `status.connected` and `status.system_status`; everything else is
// handed to consumers section by section.

use std::ops::RangeInclusive;

use serde_json::Value;

use crate::error::CoreError;

/// Topic namespace the vendor publishes device updates under.
pub const DEFAULT_TOPIC_PREFIX: &str = "prod/thing/update";

/// `system_status` values that mean the device is doing something
/// (igniting through cooling down).
pub const ACTIVE_SYSTEM_STATUS: RangeInclusive<i64> = 4..=8;

/// Top-level sections of a status document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Status,
    Details,
    Limits,
    Settings,
    Features,
}

impl Section {
    pub fn key(self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Details => "details",
            Self::Limits => "limits",
            Self::Settings => "settings",
            Self::Features => "features",
        }
    }
}

pub fn update_topic(prefix: &str, device_id: &str) -> String {
    format!("{}/{device_id}", prefix.trim_end_matches('/'))
}

/// Inverse of [`update_topic`]. `None` for topics outside the prefix.
pub fn device_from_topic<'a>(prefix: &str, topic: &'a str) -> Option<&'a str> {
    let rest = topic.strip_prefix(prefix.trim_end_matches('/'))?;
    let device = rest.strip_prefix('/')?;
    (!device.is_empty() && !device.contains('/')).then_some(device)
}

/// Parse an inbound payload. Anything other than a JSON object is rejected.
pub fn decode_status(topic: &str, payload: &[u8]) -> Result<Value, CoreError> {
    let document: Value =
        serde_json::from_slice(payload).map_err(|e| CoreError::MessageDecodeFailed {
            topic: topic.to_owned(),
            message: e.to_string(),
        })?;

    if !document.is_object() {
        return Err(CoreError::MessageDecodeFailed {
            topic: topic.to_owned(),
            message: "status document is not a JSON object".into(),
        });
    }
    Ok(document)
}

/// `status.connected` as the device reported it.
pub fn reported_connected(document: &Value) -> Option<bool> {
    document.get("status")?.get("connected")?.as_bool()
}

pub fn system_status(document: &Value) -> Option<i64> {
    document.get("status")?.get("system_status")?.as_i64()
}

/// True when the device is reachable and mid-cook.
pub fn is_active(connected: bool, document: &Value) -> bool {
    connected && system_status(document).is_some_and(|s| ACTIVE_SYSTEM_STATUS.contains(&s))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn topic_round_trip_with_custom_prefix() {
        let topic = update_topic("updates", "grillA");
        assert_eq!(topic, "updates/grillA");
        assert_eq!(device_from_topic("updates", &topic), Some("grillA"));
    }

    #[test]
    fn foreign_topics_are_rejected() {
        assert_eq!(device_from_topic("prod/thing/update", "prod/thing/other/x"), None);
        assert_eq!(device_from_topic("prod/thing/update", "prod/thing/update/"), None);
        assert_eq!(device_from_topic("prod/thing/update", "prod/thing/updatex/a"), None);
        assert_eq!(device_from_topic("prod/thing/update", "prod/thing/update/a/b"), None);
    }

    #[test]
    fn decode_rejects_non_objects() {
        assert!(decode_status("t", b"{\"status\":{}}").is_ok());
        assert!(matches!(
            decode_status("t", b"[1,2]"),
            Err(CoreError::MessageDecodeFailed { .. })
        ));
        assert!(matches!(
            decode_status("t", b"not json"),
            Err(CoreError::MessageDecodeFailed { .. })
        ));
    }

    #[test]
    fn activity_requires_connection_and_cooking_status() {
        let cooking = json!({ "status": { "connected": true, "system_status": 5 } });
        let idle = json!({ "status": { "connected": true, "system_status": 3 } });
        let shutdown = json!({ "status": { "connected": true, "system_status": 9 } });

        assert!(is_active(true, &cooking));
        assert!(!is_active(false, &cooking));
        assert!(!is_active(true, &idle));
        assert!(!is_active(true, &shutdown));
        assert!(!is_active(true, &json!({})));
    }
}
