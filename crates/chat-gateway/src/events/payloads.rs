//! Event payload definitions
//!
//! Only the payloads the gateway itself produces or inspects are typed here.
//! Everything else published by backend services passes through untouched.

use chat_core::{PresenceRecord, PresenceStatus, Principal, Snowflake, Topic, UserTier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// === Connection Events ===

/// READY event payload
///
/// Sent once, after the initial subscription set is installed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyEvent {
    /// Gateway protocol version
    pub v: i32,

    pub user: UserPayload,

    pub session_id: String,

    /// Topics the connection starts out subscribed to, `user:<self>` included
    pub topics: Vec<Topic>,

    pub heartbeat_interval: u64,
}

impl ReadyEvent {
    pub const PROTOCOL_VERSION: i32 = 1;
}

/// The identified user as carried in READY
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPayload {
    pub id: Snowflake,
    pub username: String,
    pub tier: UserTier,
}

impl From<&Principal> for UserPayload {
    fn from(principal: &Principal) -> Self {
        Self {
            id: principal.user_id,
            username: principal.username.clone(),
            tier: principal.tier,
        }
    }
}

// === Presence Events ===

/// PRESENCE_UPDATE event payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceEvent {
    pub user_id: Snowflake,
    /// Public status; `invisible` is never sent
    pub status: PresenceStatus,
    pub last_change_at: DateTime<Utc>,
}

impl From<&PresenceRecord> for PresenceEvent {
    fn from(record: &PresenceRecord) -> Self {
        Self {
            user_id: record.user_id,
            status: record.status.public(),
            last_change_at: record.last_change_at,
        }
    }
}

// === Internal Control Events ===

/// SUBSCRIPTION_UPDATE payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionUpdateEvent {
    /// Falls back to the addressed `user:` topic when absent
    #[serde(default, alias = "userId")]
    pub user_id: Snowflake,
    #[serde(default)]
    pub subscribe: Vec<Topic>,
    #[serde(default)]
    pub unsubscribe: Vec<Topic>,
}

/// SUBSCRIPTION_RESYNC payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionResyncEvent {
    #[serde(alias = "userId")]
    pub user_id: Snowflake,
}

// === Field extraction ===

/// Read an id field by its snake_case name, also trying the camelCase
/// spelling. Ids may be JSON strings or numbers.
#[must_use]
pub fn snowflake_field(data: &Value, snake_case: &str) -> Option<Snowflake> {
    data.get(snake_case)
        .or_else(|| data.get(to_camel_case(snake_case).as_str()))
        .and_then(Snowflake::from_json)
}

/// The user a membership event is about: `user_id`, `userId`, or `user.id`
#[must_use]
pub fn subject_user_id(data: &Value) -> Option<Snowflake> {
    snowflake_field(data, "user_id")
        .or_else(|| data.get("user").and_then(|user| snowflake_field(user, "id")))
}

fn to_camel_case(snake_case: &str) -> String {
    let mut out = String::with_capacity(snake_case.len());
    let mut upper = false;
    for c in snake_case.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.push(c.to_ascii_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}
