//! Presence ledger backends.
//!
//! Every gateway process records an `instance:connection` member per live
//! connection, so a user's aggregate connection count spans all processes.
//! Each member carries a deadline and must be renewed before it passes;
//! members left behind by a crashed process age out on their own. The
//! derived [`PresenceRecord`] is mirrored next to it for other services to
//! read.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chat_core::{PresenceRecord, Snowflake};
use parking_lot::Mutex;
use redis::AsyncCommands;
use tokio::time::Instant;

use crate::pool::{RedisPool, RedisPoolError};

/// Key prefix for the presence record
const PRESENCE_PREFIX: &str = "presence:";
/// Key prefix for the sorted set of live connection members, scored by deadline
const SESSIONS_PREFIX: &str = "presence_sessions:";

/// Member lifetime when the owner does not configure one
pub const DEFAULT_MEMBER_TTL: Duration = Duration::from_secs(180);

/// Error type for ledger operations
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error(transparent)]
    Redis(#[from] RedisPoolError),

    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt presence record: {0}")]
    Corrupt(#[from] serde_json::Error),
}

impl From<redis::RedisError> for LedgerError {
    fn from(e: redis::RedisError) -> Self {
        Self::Redis(RedisPoolError::Redis(e))
    }
}

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;

#[async_trait]
pub trait PresenceLedger: Send + Sync {
    /// Record or renew a live connection; returns the user's unexpired
    /// connection count across processes
    async fn attach(&self, user_id: Snowflake, member: &str) -> LedgerResult<u64>;

    /// Push a member's deadline forward; owners call this well within
    /// [`PresenceLedger::member_ttl`]
    async fn renew(&self, user_id: Snowflake, member: &str) -> LedgerResult<()> {
        self.attach(user_id, member).await.map(|_| ())
    }

    /// Forget a connection; returns how many unexpired members remain
    async fn detach(&self, user_id: Snowflake, member: &str) -> LedgerResult<u64>;

    async fn connection_count(&self, user_id: Snowflake) -> LedgerResult<u64>;

    /// How long an unrenewed member keeps counting
    fn member_ttl(&self) -> Duration;

    async fn store(&self, record: &PresenceRecord) -> LedgerResult<()>;

    async fn load(&self, user_id: Snowflake) -> LedgerResult<Option<PresenceRecord>>;
}

fn sessions_key(user_id: Snowflake) -> String {
    format!("{SESSIONS_PREFIX}{user_id}")
}

fn presence_key(user_id: Snowflake) -> String {
    format!("{PRESENCE_PREFIX}{user_id}")
}

/// Redis implementation. Deadlines are wall-clock milliseconds, so gateway
/// clocks are assumed to agree to well within the member TTL.
#[derive(Debug, Clone)]
pub struct RedisPresenceLedger {
    pool: RedisPool,
    member_ttl: Duration,
}

impl RedisPresenceLedger {
    #[must_use]
    pub fn new(pool: RedisPool) -> Self {
        Self {
            pool,
            member_ttl: DEFAULT_MEMBER_TTL,
        }
    }

    #[must_use]
    pub fn with_member_ttl(mut self, ttl: Duration) -> Self {
        self.member_ttl = ttl;
        self
    }

    fn key_ttl_secs(&self) -> i64 {
        self.member_ttl.as_secs().max(1) as i64 + 1
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[async_trait]
impl PresenceLedger for RedisPresenceLedger {
    async fn attach(&self, user_id: Snowflake, member: &str) -> LedgerResult<u64> {
        let mut conn = self.pool.get().await?;
        let key = sessions_key(user_id);
        let now = now_ms();
        let deadline = now + self.member_ttl.as_millis() as i64;

        let (_, _, _, count): (i64, i64, i64, u64) = redis::pipe()
            .atomic()
            .zadd(&key, member, deadline)
            .zrembyscore(&key, "-inf", now)
            .expire(&key, self.key_ttl_secs())
            .zcard(&key)
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn detach(&self, user_id: Snowflake, member: &str) -> LedgerResult<u64> {
        let mut conn = self.pool.get().await?;
        let key = sessions_key(user_id);

        let (_, _, count): (i64, i64, u64) = redis::pipe()
            .atomic()
            .zrem(&key, member)
            .zrembyscore(&key, "-inf", now_ms())
            .zcard(&key)
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn connection_count(&self, user_id: Snowflake) -> LedgerResult<u64> {
        let mut conn = self.pool.get().await?;
        let key = sessions_key(user_id);

        let (_, count): (i64, u64) = redis::pipe()
            .atomic()
            .zrembyscore(&key, "-inf", now_ms())
            .zcard(&key)
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }

    fn member_ttl(&self) -> Duration {
        self.member_ttl
    }

    async fn store(&self, record: &PresenceRecord) -> LedgerResult<()> {
        let body = serde_json::to_string(record)?;
        let mut conn = self.pool.get().await?;
        conn.set::<_, _, ()>(presence_key(record.user_id), body).await?;
        Ok(())
    }

    async fn load(&self, user_id: Snowflake) -> LedgerResult<Option<PresenceRecord>> {
        let mut conn = self.pool.get().await?;
        let body: Option<String> = conn.get(presence_key(user_id)).await?;
        body.map(|b| serde_json::from_str(&b))
            .transpose()
            .map_err(LedgerError::from)
    }
}

/// In-memory implementation for tests and single-process runs.
/// Deadlines follow the tokio clock so paused-time tests can expire members.
/// Can be switched to failing mode to exercise fallbacks.
#[derive(Debug)]
pub struct MemoryPresenceLedger {
    sessions: Mutex<HashMap<Snowflake, HashMap<String, Instant>>>,
    records: Mutex<HashMap<Snowflake, PresenceRecord>>,
    failing: AtomicBool,
    member_ttl: Duration,
}

impl Default for MemoryPresenceLedger {
    fn default() -> Self {
        Self {
            sessions: Mutex::default(),
            records: Mutex::default(),
            failing: AtomicBool::new(false),
            member_ttl: DEFAULT_MEMBER_TTL,
        }
    }
}

impl MemoryPresenceLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_member_ttl(mut self, ttl: Duration) -> Self {
        self.member_ttl = ttl;
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> LedgerResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(LedgerError::Unavailable("memory ledger failing".to_string()))
        } else {
            Ok(())
        }
    }

    /// Drop expired members and return how many are left
    fn live_count(sessions: &mut HashMap<Snowflake, HashMap<String, Instant>>, user_id: Snowflake) -> u64 {
        let now = Instant::now();
        let remaining = match sessions.get_mut(&user_id) {
            Some(members) => {
                members.retain(|_, deadline| *deadline > now);
                members.len() as u64
            }
            None => 0,
        };
        if remaining == 0 {
            sessions.remove(&user_id);
        }
        remaining
    }
}

#[async_trait]
impl PresenceLedger for MemoryPresenceLedger {
    async fn attach(&self, user_id: Snowflake, member: &str) -> LedgerResult<u64> {
        self.check()?;
        let mut sessions = self.sessions.lock();
        sessions
            .entry(user_id)
            .or_default()
            .insert(member.to_string(), Instant::now() + self.member_ttl);
        Ok(Self::live_count(&mut sessions, user_id))
    }

    async fn detach(&self, user_id: Snowflake, member: &str) -> LedgerResult<u64> {
        self.check()?;
        let mut sessions = self.sessions.lock();
        if let Some(members) = sessions.get_mut(&user_id) {
            members.remove(member);
        }
        Ok(Self::live_count(&mut sessions, user_id))
    }

    async fn connection_count(&self, user_id: Snowflake) -> LedgerResult<u64> {
        self.check()?;
        Ok(Self::live_count(&mut self.sessions.lock(), user_id))
    }

    fn member_ttl(&self) -> Duration {
        self.member_ttl
    }

    async fn store(&self, record: &PresenceRecord) -> LedgerResult<()> {
        self.check()?;
        self.records.lock().insert(record.user_id, record.clone());
        Ok(())
    }

    async fn load(&self, user_id: Snowflake) -> LedgerResult<Option<PresenceRecord>> {
        self.check()?;
        Ok(self.records.lock().get(&user_id).cloned())
    }
}
