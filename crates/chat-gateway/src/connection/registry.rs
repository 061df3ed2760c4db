//! Connection registry
//!
//! Tracks every identified connection of this process, keyed by id and by
//! user. The registry is sharded by user id; each shard keeps both maps
//! under one lock, so a connection is never visible in one map and missing
//! from the other.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chat_core::{Principal, Snowflake};
use parking_lot::RwLock;
use serde::Serialize;

use super::Connection;

const SHARD_BITS: u32 = 6;
const SHARD_COUNT: usize = 1 << SHARD_BITS;
const SHARD_MASK: u64 = (SHARD_COUNT as u64) - 1;

/// Process-unique connection id. The low bits name the registry shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    const fn shard(self) -> usize {
        (self.0 & SHARD_MASK) as usize
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of removing a connection
#[derive(Debug)]
pub struct Unregistered {
    pub connection: Arc<Connection>,
    pub user_id: Snowflake,
    /// Connections the user still has in this process
    pub remaining: usize,
}

#[derive(Default)]
struct Shard {
    connections: HashMap<ConnectionId, Arc<Connection>>,
    by_user: HashMap<Snowflake, HashSet<ConnectionId>>,
}

pub struct ConnectionRegistry {
    shards: Box<[RwLock<Shard>]>,
    next: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| RwLock::new(Shard::default())).collect(),
            next: AtomicU64::new(1),
        }
    }

    fn shard_of_user(user_id: Snowflake) -> usize {
        (user_id.into_inner() as u64 & SHARD_MASK) as usize
    }

    /// Bind `principal` to `connection` and insert it into both maps
    pub fn register(&self, connection: &Arc<Connection>, principal: Principal) -> ConnectionId {
        let user_id = principal.user_id;
        let shard = Self::shard_of_user(user_id);
        let counter = self.next.fetch_add(1, Ordering::Relaxed);
        let id = ConnectionId((counter << SHARD_BITS) | shard as u64);

        if !connection.bind(id, principal) {
            tracing::warn!(
                session_id = %connection.session_id(),
                "Connection was already bound, keeping its first identity"
            );
        }
        let id = connection.id().unwrap_or(id);

        let mut guard = self.shards[id.shard()].write();
        guard.connections.insert(id, Arc::clone(connection));
        guard.by_user.entry(user_id).or_default().insert(id);
        drop(guard);

        tracing::debug!(connection_id = %id, user_id = %user_id, "Connection registered");
        id
    }

    /// Remove from both maps. `None` if the id was not registered.
    pub fn unregister(&self, id: ConnectionId) -> Option<Unregistered> {
        let mut guard = self.shards[id.shard()].write();
        let connection = guard.connections.remove(&id)?;
        let user_id = connection.user_id().unwrap_or_default();

        let remaining = match guard.by_user.get_mut(&user_id) {
            Some(ids) => {
                ids.remove(&id);
                ids.len()
            }
            None => 0,
        };
        if remaining == 0 {
            guard.by_user.remove(&user_id);
        }
        drop(guard);

        tracing::debug!(connection_id = %id, user_id = %user_id, remaining, "Connection unregistered");
        Some(Unregistered {
            connection,
            user_id,
            remaining,
        })
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.shards[id.shard()].read().connections.get(&id).cloned()
    }

    /// Ids of every local connection of `user_id`
    pub fn connections_for(&self, user_id: Snowflake) -> Vec<ConnectionId> {
        self.shards[Self::shard_of_user(user_id)]
            .read()
            .by_user
            .get(&user_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Every local connection of `user_id`
    pub fn connections_of(&self, user_id: Snowflake) -> Vec<Arc<Connection>> {
        let guard = self.shards[Self::shard_of_user(user_id)].read();
        guard
            .by_user
            .get(&user_id)
            .map(|ids| ids.iter().filter_map(|id| guard.connections.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    pub fn user_connection_count(&self, user_id: Snowflake) -> usize {
        self.shards[Self::shard_of_user(user_id)]
            .read()
            .by_user
            .get(&user_id)
            .map_or(0, HashSet::len)
    }

    /// Point-in-time copy of all connections; no lock is held afterwards
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.shards
            .iter()
            .flat_map(|shard| shard.read().connections.values().cloned().collect::<Vec<_>>())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().connections.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn user_count(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().by_user.len()).sum()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connections", &self.len())
            .field("users", &self.user_count())
            .finish()
    }
}
