//! Individual WebSocket connection
//!
//! Represents a single WebSocket connection and its lifecycle state. A
//! connection is owned by the process that accepted it; other parts of the
//! gateway reach it only through the registry by [`ConnectionId`].

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chat_core::{Principal, Snowflake};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use super::outbound::OutboundQueue;
use super::registry::ConnectionId;

/// Connection state
///
/// `Connecting → Identified → Ready → Closing → Closed`. Every forward step
/// happens at most once; any open state may jump to `Closing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ConnectionState {
    /// Upgraded, waiting for Identify
    Connecting = 0,
    /// Token verified and registered; subscriptions being installed
    Identified = 1,
    /// Subscriptions installed, READY sent
    Ready = 2,
    /// Being torn down
    Closing = 3,
    /// Removed from every structure
    Closed = 4,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Identified,
            2 => Self::Ready,
            3 => Self::Closing,
            _ => Self::Closed,
        }
    }

    pub const fn is_open(self) -> bool {
        matches!(self, Self::Connecting | Self::Identified | Self::Ready)
    }
}

/// A single WebSocket connection
pub struct Connection {
    /// Unique session ID, reported to the client in READY
    session_id: String,

    state: AtomicU8,

    /// Set once at registration
    id: OnceLock<ConnectionId>,
    principal: OnceLock<Principal>,

    opened_at: DateTime<Utc>,

    /// Last heartbeat received (or the upgrade time)
    last_heartbeat: Mutex<Instant>,

    /// Last dispatch sequence number written
    sequence: AtomicU64,

    /// Snapshot or resync failed; the supervisor retries
    needs_resync: AtomicBool,

    /// A resync was requested before subscriptions were installed
    resync_pending: AtomicBool,

    outbound: OutboundQueue,
}

impl Connection {
    /// Create a new connection in the `Connecting` state
    pub fn new(queue_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            session_id: Uuid::new_v4().simple().to_string(),
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            id: OnceLock::new(),
            principal: OnceLock::new(),
            opened_at: Utc::now(),
            last_heartbeat: Mutex::new(Instant::now()),
            sequence: AtomicU64::new(0),
            needs_resync: AtomicBool::new(false),
            resync_pending: AtomicBool::new(false),
            outbound: OutboundQueue::new(queue_capacity),
        })
    }

    /// Get the session ID
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Get the current state
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    /// Compare-and-swap `from → to`; false if the state was not `from`
    pub fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Move any open state to `Closing`. Exactly one caller wins.
    pub fn begin_close(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if !ConnectionState::from_u8(current).is_open() {
                return false;
            }
            match self.state.compare_exchange(
                current,
                ConnectionState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn mark_closed(&self) {
        self.state.store(ConnectionState::Closed as u8, Ordering::Release);
    }

    /// Bind the registry id and principal. Only the first call takes effect.
    pub(crate) fn bind(&self, id: ConnectionId, principal: Principal) -> bool {
        self.id.set(id).is_ok() && self.principal.set(principal).is_ok()
    }

    pub fn id(&self) -> Option<ConnectionId> {
        self.id.get().copied()
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.principal.get()
    }

    /// Get the user ID (if identified)
    pub fn user_id(&self) -> Option<Snowflake> {
        self.principal.get().map(|p| p.user_id)
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    /// Record a heartbeat received
    pub fn record_heartbeat(&self) {
        *self.last_heartbeat.lock() = Instant::now();
    }

    pub fn last_heartbeat(&self) -> Instant {
        *self.last_heartbeat.lock()
    }

    /// Time since the last heartbeat, measured at `now`
    pub fn silence_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_heartbeat())
    }

    /// Get the next sequence number
    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Get the current sequence number
    pub fn current_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    pub fn flag_resync(&self) {
        self.needs_resync.store(true, Ordering::Release);
    }

    pub fn needs_resync(&self) -> bool {
        self.needs_resync.load(Ordering::Acquire)
    }

    pub fn clear_resync(&self) {
        self.needs_resync.store(false, Ordering::Release);
    }

    pub fn defer_resync(&self) {
        self.resync_pending.store(true, Ordering::Release);
    }

    pub fn take_deferred_resync(&self) -> bool {
        self.resync_pending.swap(false, Ordering::AcqRel)
    }

    pub fn outbound(&self) -> &OutboundQueue {
        &self.outbound
    }

    pub fn queue_depth(&self) -> usize {
        self.outbound.depth()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("session_id", &self.session_id)
            .field("id", &self.id())
            .field("state", &self.state())
            .field("user_id", &self.user_id())
            .field("sequence", &self.current_sequence())
            .field("queue_depth", &self.queue_depth())
            .finish()
    }
}
