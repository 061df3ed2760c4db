//! # chat-cache
//!
//! Redis-backed shared state for gateway processes.
//!
//! ## Features
//!
//! - **Connection Pool**: Managed Redis connection pool with deadpool
//! - **Broadcast Bus**: Cross-process envelope distribution over pub/sub, with
//!   a bounded outbox and reconnect backoff, plus an in-memory twin for tests
//! - **Presence Ledger**: Per-user live connection sets and presence records
//!
//! ## Example
//!
//! ```ignore
//! use chat_cache::{BroadcastBus, EventEnvelope, RedisBus, RedisPool, RedisPoolConfig};
//!
//! let pool = RedisPool::new(RedisPoolConfig::default())?;
//! let bus = RedisBus::new(pool.clone(), &bus_config, "gw-1");
//!
//! // Fire-and-forget publish
//! bus.publish(EventEnvelope::new("MESSAGE_CREATE", Topic::Guild(guild_id), data))?;
//!
//! // Receive everything under the prefix
//! let mut rx = bus.subscribe("gateway:*").await?;
//! ```

pub mod pool;
pub mod presence;
pub mod pubsub;

// Re-export pool types
pub use pool::{RedisPool, RedisPoolConfig, RedisPoolError, RedisResult};

// Re-export presence types
pub use presence::{
    LedgerError, LedgerResult, MemoryPresenceLedger, PresenceLedger, RedisPresenceLedger,
};

// Re-export pubsub types
pub use pubsub::{
    all_topics_pattern, channel_key, key_matches, topic_from_key, BroadcastBus, BusError,
    BusResult, BusStats, EventEnvelope, MemoryBus, MemoryHub, OriginStamp, RedisBus,
    stop_requested,
};
