//! Event envelope and channel keys.
//!
//! An envelope is published once, on the bus key of its primary topic:
//! `{prefix}:{topic}`, e.g. `gateway:guild:123`.

use std::sync::atomic::{AtomicU64, Ordering};

use chat_core::{Snowflake, Topic};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The unit carried by the broadcast bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique per publish; clients dedupe on it
    pub id: Uuid,
    pub event_type: String,
    /// Target topics; the first one is the primary and picks the bus key
    pub topics: Vec<Topic>,
    pub data: serde_json::Value,
    /// Instance that published the envelope
    #[serde(default)]
    pub origin_id: String,
    /// Monotonic per origin
    #[serde(default)]
    pub sequence_hint: u64,
    /// Never delivered to this user's connections
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_user: Option<Snowflake>,
}

impl EventEnvelope {
    /// Create an envelope for one topic. Origin and sequence are stamped on publish.
    #[must_use]
    pub fn new(event_type: impl Into<String>, topic: Topic, data: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            topics: vec![topic],
            data,
            origin_id: String::new(),
            sequence_hint: 0,
            exclude_user: None,
        }
    }

    /// Add a secondary topic
    #[must_use]
    pub fn also_to(mut self, topic: Topic) -> Self {
        if !self.topics.contains(&topic) {
            self.topics.push(topic);
        }
        self
    }

    /// Skip every connection of `user_id`
    #[must_use]
    pub fn excluding(mut self, user_id: Snowflake) -> Self {
        self.exclude_user = Some(user_id);
        self
    }

    pub fn primary_topic(&self) -> Option<Topic> {
        self.topics.first().copied()
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}

/// Bus key for a topic
pub fn channel_key(prefix: &str, topic: &Topic) -> String {
    format!("{prefix}:{topic}")
}

/// Pattern matching every topic key under `prefix`
pub fn all_topics_pattern(prefix: &str) -> String {
    format!("{prefix}:*")
}

/// Recover the topic from a bus key
pub fn topic_from_key(prefix: &str, key: &str) -> Option<Topic> {
    key.strip_prefix(prefix)?
        .strip_prefix(':')
        .and_then(|rest| Topic::parse(rest).ok())
}

/// Glob match supporting a single trailing `*`, which is all the gateway uses
pub fn key_matches(pattern: &str, key: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => pattern == key,
    }
}

/// Stamps origin and per-origin sequence onto outgoing envelopes
#[derive(Debug)]
pub struct OriginStamp {
    origin_id: String,
    next: AtomicU64,
}

impl OriginStamp {
    pub fn new(origin_id: impl Into<String>) -> Self {
        Self {
            origin_id: origin_id.into(),
            next: AtomicU64::new(1),
        }
    }

    pub fn origin_id(&self) -> &str {
        &self.origin_id
    }

    pub fn stamp(&self, envelope: &mut EventEnvelope) {
        if envelope.origin_id.is_empty() {
            envelope.origin_id.clone_from(&self.origin_id);
        }
        envelope.sequence_hint = self.next.fetch_add(1, Ordering::Relaxed);
    }
}
