//! Connection manager
//!
//! Owns the connection lifecycle for one process: identify installs the
//! initial subscription set exactly once on the `Identified → Ready` step,
//! and close removes the connection from the registry and the subscription
//! table before it returns, so no later dispatch can target it.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chat_common::GatewayConfig;
use chat_core::{MembershipStore, Principal, Snowflake, Topic};
use serde::Serialize;
use tokio::time::Instant;

use super::{Connection, ConnectionId, ConnectionRegistry, ConnectionState, Enqueued, EventFrame, Frame, QueueError};
use crate::events::{GatewayEventType, ReadyEvent, UserPayload};
use crate::handlers::HandlerError;
use crate::presence::{PresenceTracker, ScheduleFetch};
use crate::protocol::CloseCode;
use crate::subscriptions::SubscriptionTable;

/// Point-in-time gateway counters, served on `/stats`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GatewayStats {
    pub connections: usize,
    pub users: usize,
    pub topics: usize,
    pub subscribed_connections: usize,
    pub tracked_presence: usize,
}

pub struct ConnectionManager {
    registry: Arc<ConnectionRegistry>,
    subscriptions: SubscriptionTable,
    presence: Arc<PresenceTracker>,
    store: Arc<dyn MembershipStore>,
    config: GatewayConfig,
}

impl ConnectionManager {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        presence: Arc<PresenceTracker>,
        store: Arc<dyn MembershipStore>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            registry,
            subscriptions: SubscriptionTable::new(),
            presence,
            store,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn subscriptions(&self) -> &SubscriptionTable {
        &self.subscriptions
    }

    pub fn presence(&self) -> &Arc<PresenceTracker> {
        &self.presence
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// A freshly upgraded socket, not yet registered anywhere
    pub fn open(&self) -> Arc<Connection> {
        let connection = Connection::new(self.config.outbound_queue_capacity);
        tracing::debug!(session_id = %connection.session_id(), "Connection opened");
        connection
    }

    /// Bind a verified principal and bring the connection to `Ready`.
    ///
    /// READY is queued before any subscription exists, so it is always the
    /// first dispatch the client sees.
    pub async fn identify(
        &self,
        connection: &Arc<Connection>,
        principal: Principal,
    ) -> Result<ConnectionId, HandlerError> {
        if !connection.transition(ConnectionState::Connecting, ConnectionState::Identified) {
            return Err(if connection.is_open() {
                HandlerError::AlreadyAuthenticated
            } else {
                HandlerError::Closed
            });
        }

        let user_id = principal.user_id;
        let user = UserPayload::from(&principal);
        let id = self.registry.register(connection, principal);

        if !connection.is_open() {
            // Closed while registering; close() may not have seen the id
            self.registry.unregister(id);
            return Err(HandlerError::Closed);
        }

        let (mut topics, schedule) = match self.store.snapshot(user_id).await {
            Ok(snapshot) => (snapshot.topics, ScheduleFetch::Fetched(snapshot.dnd_schedule)),
            Err(e) => {
                tracing::warn!(
                    connection_id = %id,
                    user_id = %user_id,
                    error = %e,
                    "Membership snapshot failed, starting with own topic only"
                );
                connection.flag_resync();
                (HashSet::new(), ScheduleFetch::Unavailable)
            }
        };
        topics.insert(Topic::User(user_id));

        let mut listed: Vec<Topic> = topics.iter().copied().collect();
        listed.sort();
        let ready = ReadyEvent {
            v: ReadyEvent::PROTOCOL_VERSION,
            user,
            session_id: connection.session_id().to_string(),
            topics: listed,
            heartbeat_interval: self.config.heartbeat_interval_ms,
        };
        let data = serde_json::to_value(&ready)
            .map_err(|e| HandlerError::Internal(format!("READY encode: {e}")))?;
        connection
            .outbound()
            .push(Frame::Event(EventFrame::new(None, GatewayEventType::Ready.as_str(), data)))?;

        self.subscriptions.attach(id);
        for topic in &topics {
            self.subscriptions.subscribe(id, *topic);
        }

        if !connection.transition(ConnectionState::Identified, ConnectionState::Ready) {
            self.subscriptions.detach(id);
            self.registry.unregister(id);
            return Err(HandlerError::Closed);
        }

        tracing::info!(
            session_id = %connection.session_id(),
            connection_id = %id,
            user_id = %user_id,
            topics = topics.len(),
            "Connection ready"
        );

        self.presence.connection_opened(user_id, id, schedule).await;
        if !connection.is_open() {
            // Lost a race with close(); its presence notice may have come first
            let remaining = self.registry.user_connection_count(user_id);
            self.presence.connection_closed(user_id, id, remaining);
            return Err(HandlerError::Closed);
        }

        if connection.take_deferred_resync() {
            self.resync_connection(connection).await;
        }

        Ok(id)
    }

    /// Tear a connection down with `code`. Idempotent; only the first call
    /// does anything. Returns once the connection is out of every structure.
    pub fn close(&self, connection: &Arc<Connection>, code: CloseCode) -> bool {
        if !connection.begin_close() {
            return false;
        }
        connection.outbound().close(code);

        if let Some(id) = connection.id() {
            self.subscriptions.detach(id);
            if let Some(removed) = self.registry.unregister(id) {
                self.presence
                    .connection_closed(removed.user_id, id, removed.remaining);
            }
        }
        connection.mark_closed();

        tracing::info!(
            session_id = %connection.session_id(),
            connection_id = ?connection.id(),
            user_id = ?connection.user_id(),
            close_code = code.as_u16(),
            reason = ?code,
            "Connection closed"
        );
        true
    }

    /// Queue a frame; a connection that cannot take a critical frame is
    /// evicted as a slow consumer
    pub fn push(&self, connection: &Arc<Connection>, frame: Frame) -> Result<Enqueued, QueueError> {
        let result = connection.outbound().push(frame);
        if let Err(QueueError::SlowConsumer) = result {
            tracing::warn!(
                session_id = %connection.session_id(),
                connection_id = ?connection.id(),
                depth = connection.queue_depth(),
                "Outbound queue full of critical frames, evicting slow consumer"
            );
            self.close(connection, CloseCode::SlowConsumer);
        }
        result
    }

    /// Refetch the user's topics and apply the difference. On store
    /// failure the connection stays flagged for the next sweep.
    pub async fn resync_connection(&self, connection: &Arc<Connection>) -> bool {
        let (Some(id), Some(user_id)) = (connection.id(), connection.user_id()) else {
            return false;
        };

        let snapshot = match self.store.snapshot(user_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                connection.flag_resync();
                tracing::warn!(
                    connection_id = %id,
                    user_id = %user_id,
                    error = %e,
                    "Subscription resync failed, will retry"
                );
                return false;
            }
        };

        let mut wanted = snapshot.topics;
        wanted.insert(Topic::User(user_id));

        let Some(diff) = self.subscriptions.resync_membership(id, &wanted) else {
            return false;
        };
        connection.clear_resync();
        self.presence
            .refresh_schedule(user_id, snapshot.dnd_schedule)
            .await;

        if !diff.is_empty() {
            tracing::debug!(
                connection_id = %id,
                user_id = %user_id,
                added = diff.added.len(),
                removed = diff.removed.len(),
                "Subscriptions resynced"
            );
        }
        true
    }

    /// Resync every local connection of `user_id`. Connections still
    /// installing their snapshot apply it right after.
    pub async fn request_resync(&self, user_id: Snowflake) -> usize {
        let mut resynced = 0;
        for connection in self.registry.connections_of(user_id) {
            match connection.state() {
                ConnectionState::Ready => {
                    if self.resync_connection(&connection).await {
                        resynced += 1;
                    }
                }
                ConnectionState::Identified => connection.defer_resync(),
                _ => {}
            }
        }
        resynced
    }

    /// Targeted changes for every local connection of `user_id`. Another
    /// user's private topic is never subscribed and the own one is never
    /// dropped.
    pub fn apply_update(&self, user_id: Snowflake, subscribe: &[Topic], unsubscribe: &[Topic]) -> usize {
        let own = Topic::User(user_id);
        let mut touched = 0;
        for connection in self.registry.connections_of(user_id) {
            let Some(id) = connection.id() else {
                continue;
            };
            match connection.state() {
                ConnectionState::Ready => {}
                ConnectionState::Identified => {
                    connection.defer_resync();
                    continue;
                }
                _ => continue,
            }

            for topic in subscribe.iter().filter(|t| !t.is_user()) {
                self.subscriptions.subscribe(id, *topic);
            }
            for topic in unsubscribe.iter().filter(|t| **t != own) {
                self.subscriptions.unsubscribe(id, topic);
            }
            touched += 1;
        }

        if touched > 0 {
            tracing::debug!(
                user_id = %user_id,
                connections = touched,
                subscribe = subscribe.len(),
                unsubscribe = unsubscribe.len(),
                "Subscription update applied"
            );
        }
        touched
    }

    /// A guild or channel is gone for everyone. Connections still
    /// installing a snapshot may have read it before the drop, so they
    /// refetch once installed.
    pub fn drop_topic(&self, topic: &Topic) -> usize {
        let dropped = self.subscriptions.drop_topic(topic);
        if !dropped.is_empty() {
            tracing::debug!(topic = %topic, connections = dropped.len(), "Topic dropped");
        }
        for connection in self.registry.snapshot() {
            if connection.state() == ConnectionState::Identified {
                connection.defer_resync();
            }
        }
        dropped.len()
    }

    /// Resync Ready connections; with `only_flagged`, just those whose last
    /// snapshot or resync failed
    pub async fn resync_sweep(&self, only_flagged: bool) -> usize {
        let mut resynced = 0;
        for connection in self.registry.snapshot() {
            if connection.state() != ConnectionState::Ready {
                continue;
            }
            if only_flagged && !connection.needs_resync() {
                continue;
            }
            if self.resync_connection(&connection).await {
                resynced += 1;
            }
        }
        resynced
    }

    /// Close identified connections silent for longer than `timeout`
    pub fn close_stale(&self, now: Instant, timeout: Duration) -> usize {
        let mut closed = 0;
        for connection in self.registry.snapshot() {
            if !matches!(connection.state(), ConnectionState::Identified | ConnectionState::Ready) {
                continue;
            }
            let silence = connection.silence_at(now);
            if silence > timeout {
                tracing::info!(
                    session_id = %connection.session_id(),
                    user_id = ?connection.user_id(),
                    silence_ms = silence.as_millis(),
                    "Heartbeat missed"
                );
                if self.close(&connection, CloseCode::HeartbeatTimeout) {
                    closed += 1;
                }
            }
        }
        closed
    }

    /// Close every registered connection with `code`
    pub fn close_all(&self, code: CloseCode) -> usize {
        self.registry
            .snapshot()
            .iter()
            .filter(|connection| self.close(connection, code))
            .count()
    }

    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            connections: self.registry.len(),
            users: self.registry.user_count(),
            topics: self.subscriptions.topic_count(),
            subscribed_connections: self.subscriptions.connection_count(),
            tracked_presence: self.presence.tracked_users(),
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
