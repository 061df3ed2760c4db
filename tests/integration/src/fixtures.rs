//! Test fixtures and data generators
//!
//! Provides reusable test data for integration tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chat_cache::EventEnvelope;
use chat_core::{
    DndSchedule, DomainError, MembershipStore, Principal, RepoResult, Snowflake, Topic, UserTier,
};
use parking_lot::RwLock;
use serde_json::{json, Value};

/// Counter for unique test ids
static COUNTER: AtomicI64 = AtomicI64::new(1_000);

/// Get a unique id for test data
pub fn unique_id() -> Snowflake {
    Snowflake::new(COUNTER.fetch_add(1, Ordering::SeqCst))
}

pub fn guild(id: Snowflake) -> Topic {
    Topic::Guild(id)
}

pub fn channel(id: Snowflake) -> Topic {
    Topic::Channel(id)
}

pub fn principal(user_id: Snowflake) -> Principal {
    Principal::new(user_id, format!("user{user_id}"), UserTier::Free)
}

/// Membership store standing in for the relational database
#[derive(Debug, Default)]
pub struct MemoryMembershipStore {
    topics: RwLock<HashMap<Snowflake, HashSet<Topic>>>,
    schedules: RwLock<HashMap<Snowflake, DndSchedule>>,
    failing: RwLock<bool>,
}

impl MemoryMembershipStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, user_id: Snowflake, topic: Topic) {
        self.topics.write().entry(user_id).or_default().insert(topic);
    }

    pub fn leave(&self, user_id: Snowflake, topic: Topic) {
        if let Some(topics) = self.topics.write().get_mut(&user_id) {
            topics.remove(&topic);
        }
    }

    pub fn set_schedule(&self, user_id: Snowflake, schedule: DndSchedule) {
        self.schedules.write().insert(user_id, schedule);
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.write() = failing;
    }

    fn check(&self) -> RepoResult<()> {
        if *self.failing.read() {
            return Err(DomainError::StoreUnavailable("store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MembershipStore for MemoryMembershipStore {
    async fn user_topics(&self, user_id: Snowflake) -> RepoResult<HashSet<Topic>> {
        self.check()?;
        Ok(self.topics.read().get(&user_id).cloned().unwrap_or_default())
    }

    async fn dnd_schedule(&self, user_id: Snowflake) -> RepoResult<Option<DndSchedule>> {
        self.check()?;
        Ok(self.schedules.read().get(&user_id).copied())
    }
}

// ============================================================================
// Envelopes
// ============================================================================

/// A message posted in a guild channel
pub fn message_create(guild_id: Snowflake, channel_id: Snowflake, content: &str) -> EventEnvelope {
    EventEnvelope::new(
        "MESSAGE_CREATE",
        Topic::Guild(guild_id),
        json!({
            "id": unique_id(),
            "guild_id": guild_id,
            "channel_id": channel_id,
            "content": content,
        }),
    )
    .also_to(Topic::Channel(channel_id))
}

/// A member removed (kicked) from a guild
pub fn member_remove(guild_id: Snowflake, user_id: Snowflake) -> EventEnvelope {
    EventEnvelope::new(
        "GUILD_MEMBER_REMOVE",
        Topic::Guild(guild_id),
        json!({
            "guild_id": guild_id,
            "user": { "id": user_id },
        }),
    )
}

/// Ask every gateway to refetch a user's memberships
pub fn subscription_resync(user_id: Snowflake) -> EventEnvelope {
    EventEnvelope::new(
        "SUBSCRIPTION_RESYNC",
        Topic::User(user_id),
        json!({ "user_id": user_id }),
    )
}

/// Identify frame for `token`
pub fn identify(token: &str) -> Value {
    json!({
        "op": 2,
        "d": {
            "token": token,
            "properties": { "os": "linux", "browser": "integration-tests", "device": "ci" },
        },
    })
}

/// Heartbeat frame
pub fn heartbeat(timestamp: i64) -> Value {
    json!({ "op": 1, "d": { "timestamp": timestamp } })
}
