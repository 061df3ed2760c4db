//! Op payload definitions
//!
//! Defines the `d` payloads of non-dispatch frames in both directions.

use chat_core::PresenceStatus;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Payload for op 10 (Hello)
///
/// Sent by the server immediately after the upgrade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloPayload {
    /// Heartbeat interval in milliseconds
    pub heartbeat_interval: u64,
}

impl HelloPayload {
    #[must_use]
    pub fn with_interval(heartbeat_interval: u64) -> Self {
        Self { heartbeat_interval }
    }
}

/// Payload for op 2 (Identify)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyPayload {
    /// Bearer credential, with or without the `Bearer ` prefix
    pub token: String,

    /// Optional client properties
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<IdentifyProperties>,
}

/// Client connection properties, logged on identify
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentifyProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
}

/// Payload for op 1 (Heartbeat)
///
/// Clients send either `{"timestamp": ...}`, a bare number, or nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeartbeatPayload {
    pub timestamp: Option<Value>,
}

impl HeartbeatPayload {
    #[must_use]
    pub fn from_data(d: Option<&Value>) -> Self {
        let timestamp = match d {
            Some(Value::Object(map)) => map.get("timestamp").filter(|v| !v.is_null()).cloned(),
            Some(Value::Null) | None => None,
            Some(other) => Some(other.clone()),
        };
        Self { timestamp }
    }
}

/// Payload for op 11 (Heartbeat ACK)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatAckPayload {
    /// The client's timestamp echoed back, or server time in ms when none was sent
    pub timestamp: Value,
}

/// Payload for op 3 (Presence Update)
///
/// `online` clears any manual status, `idle` reports client inactivity,
/// `dnd` and `invisible` are manual choices. `offline` is accepted as a
/// synonym for `invisible`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceUpdatePayload {
    pub status: String,
}

impl PresenceUpdatePayload {
    /// Valid status values
    pub const VALID_STATUSES: &'static [&'static str] =
        &["online", "idle", "dnd", "invisible", "offline"];

    /// Check if the status is valid
    #[must_use]
    pub fn is_valid_status(&self) -> bool {
        Self::VALID_STATUSES.contains(&self.status.as_str())
    }

    /// The requested status, with `offline` folded into `invisible`
    #[must_use]
    pub fn requested_status(&self) -> Option<PresenceStatus> {
        match PresenceStatus::parse(&self.status)? {
            PresenceStatus::Offline => Some(PresenceStatus::Invisible),
            status => Some(status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_heartbeat_payload_shapes() {
        let object = json!({"timestamp": 1_700_000_000_000_i64});
        assert_eq!(
            HeartbeatPayload::from_data(Some(&object)).timestamp,
            Some(json!(1_700_000_000_000_i64))
        );
        assert_eq!(HeartbeatPayload::from_data(Some(&json!(41))).timestamp, Some(json!(41)));
        assert_eq!(HeartbeatPayload::from_data(Some(&Value::Null)).timestamp, None);
        assert_eq!(HeartbeatPayload::from_data(Some(&json!({}))).timestamp, None);
        assert_eq!(HeartbeatPayload::from_data(None).timestamp, None);
    }

    #[test]
    fn test_presence_update_validation() {
        let valid = PresenceUpdatePayload { status: "idle".to_string() };
        assert!(valid.is_valid_status());
        assert_eq!(valid.requested_status(), Some(PresenceStatus::Idle));

        let offline = PresenceUpdatePayload { status: "offline".to_string() };
        assert_eq!(offline.requested_status(), Some(PresenceStatus::Invisible));

        let invalid = PresenceUpdatePayload { status: "busy".to_string() };
        assert!(!invalid.is_valid_status());
        assert_eq!(invalid.requested_status(), None);
    }

    #[test]
    fn test_identify_payload_without_properties() {
        let payload: IdentifyPayload = serde_json::from_value(json!({"token": "abc"})).unwrap();
        assert_eq!(payload.token, "abc");
        assert!(payload.properties.is_none());
    }
}
