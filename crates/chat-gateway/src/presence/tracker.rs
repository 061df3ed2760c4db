//! Presence tracker
//!
//! Derives each locally connected user's status from their connections,
//! manual choice, idle reports and do-not-disturb schedule, and announces
//! changes as `PRESENCE_UPDATE` on the bus.
//!
//! Precedence, highest first:
//! 1. no live connections after the grace period: `offline`
//! 2. manual `invisible` (announced as `offline`)
//! 3. manual `dnd`
//! 4. active DND schedule: `dnd`
//! 5. client-reported idle: `idle`
//! 6. `online`

use std::sync::Arc;
use std::time::Duration;

use chat_cache::{stop_requested, BroadcastBus, EventEnvelope, PresenceLedger};
use chat_core::{DndSchedule, MembershipStore, PresenceRecord, PresenceStatus, Snowflake, Topic};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::connection::{ConnectionId, ConnectionRegistry};
use crate::events::{GatewayEventType, PresenceEvent};

/// Inputs to [`resolve_status`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PresenceInputs {
    pub live: bool,
    pub manual: Option<PresenceStatus>,
    pub schedule_active: bool,
    pub idle: bool,
}

/// Effective status. May return `Invisible`; use [`PresenceStatus::public`]
/// before showing it to anyone else.
pub fn resolve_status(inputs: PresenceInputs) -> PresenceStatus {
    if !inputs.live {
        return PresenceStatus::Offline;
    }
    match inputs.manual {
        Some(PresenceStatus::Invisible) => return PresenceStatus::Invisible,
        Some(PresenceStatus::Dnd) => return PresenceStatus::Dnd,
        _ => {}
    }
    if inputs.schedule_active {
        PresenceStatus::Dnd
    } else if inputs.idle {
        PresenceStatus::Idle
    } else {
        PresenceStatus::Online
    }
}

/// Whether the membership snapshot delivered a DND schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleFetch {
    Fetched(Option<DndSchedule>),
    /// Store unavailable; keep whatever is already known
    Unavailable,
}

#[derive(Debug)]
struct UserPresence {
    manual: Option<PresenceStatus>,
    idle: bool,
    schedule: Option<DndSchedule>,
    /// Last public status announced
    announced: PresenceStatus,
    last_change_at: DateTime<Utc>,
    /// The last announcement failed and must be retried
    pending: bool,
    grace: Option<JoinHandle<()>>,
}

impl UserPresence {
    fn new() -> Self {
        Self {
            manual: None,
            idle: false,
            schedule: None,
            announced: PresenceStatus::Offline,
            last_change_at: Utc::now(),
            pending: false,
            grace: None,
        }
    }

    fn effective_at(&self, now: DateTime<Utc>) -> PresenceStatus {
        resolve_status(PresenceInputs {
            live: true,
            manual: self.manual,
            schedule_active: self.schedule.is_some_and(|s| s.is_active_at(now)),
            idle: self.idle,
        })
        .public()
    }

    fn cancel_grace(&mut self) -> bool {
        match self.grace.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }
}

pub struct PresenceTracker {
    users: DashMap<Snowflake, UserPresence>,
    ledger: Arc<dyn PresenceLedger>,
    store: Arc<dyn MembershipStore>,
    bus: Arc<dyn BroadcastBus>,
    registry: Arc<ConnectionRegistry>,
    instance_id: String,
    offline_grace: Duration,
}

impl PresenceTracker {
    pub fn new(
        ledger: Arc<dyn PresenceLedger>,
        store: Arc<dyn MembershipStore>,
        bus: Arc<dyn BroadcastBus>,
        registry: Arc<ConnectionRegistry>,
        instance_id: impl Into<String>,
        offline_grace: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            users: DashMap::new(),
            ledger,
            store,
            bus,
            registry,
            instance_id: instance_id.into(),
            offline_grace,
        })
    }

    fn ledger_member(&self, connection_id: ConnectionId) -> String {
        format!("{}:{connection_id}", self.instance_id)
    }

    /// A connection of `user_id` became ready
    pub async fn connection_opened(
        &self,
        user_id: Snowflake,
        connection_id: ConnectionId,
        schedule: ScheduleFetch,
    ) {
        if let Err(e) = self.ledger.attach(user_id, &self.ledger_member(connection_id)).await {
            tracing::warn!(user_id = %user_id, error = %e, "Presence ledger attach failed, using local count");
        }

        {
            let mut entry = self.users.entry(user_id).or_insert_with(UserPresence::new);
            if entry.cancel_grace() {
                tracing::debug!(user_id = %user_id, "Reconnected within grace period");
            }
            if let ScheduleFetch::Fetched(schedule) = schedule {
                entry.schedule = schedule;
            }
        }

        self.reevaluate(user_id).await;
    }

    /// A connection of `user_id` was removed. Returns immediately; ledger
    /// bookkeeping and the offline timer run in the background.
    pub fn connection_closed(
        self: &Arc<Self>,
        user_id: Snowflake,
        connection_id: ConnectionId,
        local_remaining: usize,
    ) {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            tracker
                .handle_closed(user_id, connection_id, local_remaining)
                .await;
        });
    }

    async fn handle_closed(
        self: Arc<Self>,
        user_id: Snowflake,
        connection_id: ConnectionId,
        local_remaining: usize,
    ) {
        let remaining = match self.ledger.detach(user_id, &self.ledger_member(connection_id)).await {
            Ok(count) => (count as usize).max(local_remaining),
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Presence ledger detach failed, using local count");
                local_remaining
            }
        };

        if local_remaining > 0 {
            return;
        }
        if remaining > 0 {
            tracing::debug!(user_id = %user_id, remaining, "User still held by another process");
        }

        // Even when another process seems to hold the user, its member may
        // belong to a crashed process; the grace loop waits it out.
        self.start_grace(user_id);
    }

    fn forget_if_idle_locally(&self, user_id: Snowflake) {
        let registry = &self.registry;
        self.users.remove_if(&user_id, |_, presence| {
            presence.grace.is_none() && registry.user_connection_count(user_id) == 0
        });
    }

    fn start_grace(self: &Arc<Self>, user_id: Snowflake) {
        let Some(mut entry) = self.users.get_mut(&user_id) else {
            return;
        };
        if entry.grace.is_some() {
            return;
        }

        let tracker = Arc::clone(self);
        let grace = self.offline_grace;
        entry.grace = Some(tokio::spawn(async move {
            let closed_at = Instant::now();
            loop {
                tokio::time::sleep(grace).await;
                if !tracker.grace_expired(user_id, closed_at.elapsed()).await {
                    break;
                }
            }
        }));
        tracing::debug!(user_id = %user_id, grace_ms = grace.as_millis(), "Offline grace period started");
    }

    /// Returns true while the timer must keep running: the user has no
    /// local connections and the only remaining ledger members may still
    /// be stale ones that have not reached their deadline.
    async fn grace_expired(&self, user_id: Snowflake, waited: Duration) -> bool {
        let local = self.registry.user_connection_count(user_id);
        let total = match self.ledger.connection_count(user_id).await {
            Ok(count) => (count as usize).max(local),
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Presence ledger count failed, using local count");
                local
            }
        };

        if total > 0 {
            if local == 0 && waited < self.ledger.member_ttl() {
                return true;
            }
            if let Some(mut entry) = self.users.get_mut(&user_id) {
                entry.grace = None;
            }
            if local == 0 {
                // Another process renewed its member and owns the announcements
                self.forget_if_idle_locally(user_id);
            }
            return false;
        }

        let registry = &self.registry;
        let removed = self
            .users
            .remove_if(&user_id, |_, _| registry.user_connection_count(user_id) == 0);
        let Some((_, previous)) = removed else {
            return false;
        };

        if previous.announced != PresenceStatus::Offline || previous.pending {
            let record = PresenceRecord::offline(user_id);
            tracing::debug!(user_id = %user_id, "Presence went offline");
            if !self.announce(&record).await {
                tracing::warn!(user_id = %user_id, "Offline presence could not be announced");
            }
        }
        false
    }

    /// New DND schedule from a membership resync
    pub async fn refresh_schedule(&self, user_id: Snowflake, schedule: Option<DndSchedule>) {
        {
            let Some(mut entry) = self.users.get_mut(&user_id) else {
                return;
            };
            if entry.schedule == schedule {
                return;
            }
            entry.schedule = schedule;
        }
        self.reevaluate(user_id).await;
    }

    /// Apply a client presence request (op 3)
    pub async fn set_status(&self, user_id: Snowflake, requested: PresenceStatus) {
        {
            let Some(mut entry) = self.users.get_mut(&user_id) else {
                return;
            };
            match requested {
                PresenceStatus::Online => {
                    entry.manual = None;
                    entry.idle = false;
                }
                PresenceStatus::Idle => entry.idle = true,
                PresenceStatus::Dnd => entry.manual = Some(PresenceStatus::Dnd),
                PresenceStatus::Invisible | PresenceStatus::Offline => {
                    entry.manual = Some(PresenceStatus::Invisible);
                }
            }
        }
        self.reevaluate(user_id).await;
    }

    /// Recompute and announce if the public status changed or a previous
    /// announcement is still pending
    pub async fn reevaluate(&self, user_id: Snowflake) {
        let now = Utc::now();
        let record = {
            let Some(mut entry) = self.users.get_mut(&user_id) else {
                return;
            };
            let status = entry.effective_at(now);
            if status == entry.announced && !entry.pending {
                return;
            }
            if status != entry.announced {
                entry.announced = status;
                entry.last_change_at = now;
            }
            entry.pending = false;
            PresenceRecord {
                user_id,
                status,
                last_change_at: entry.last_change_at,
            }
        };

        tracing::debug!(user_id = %user_id, status = record.status.as_str(), "Presence changed");

        if !self.announce(&record).await {
            if let Some(mut entry) = self.users.get_mut(&user_id) {
                entry.pending = true;
            }
        }
    }

    /// Publish to the user's own topic plus every guild and DM topic from
    /// the store. False if the store or bus refused; the caller retries.
    async fn announce(&self, record: &PresenceRecord) -> bool {
        let user_id = record.user_id;
        let mut topics: Vec<Topic> = match self.store.user_topics(user_id).await {
            Ok(topics) => topics.into_iter().collect(),
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Presence scope unavailable, will retry");
                return false;
            }
        };
        topics.sort();

        let data = match serde_json::to_value(PresenceEvent::from(record)) {
            Ok(data) => data,
            Err(e) => {
                tracing::error!(user_id = %user_id, error = %e, "Presence event could not be encoded");
                return false;
            }
        };
        let envelope = topics.into_iter().fold(
            EventEnvelope::new(GatewayEventType::PresenceUpdate.as_str(), Topic::User(user_id), data),
            EventEnvelope::also_to,
        );

        if let Err(e) = self.bus.publish(envelope) {
            tracing::warn!(user_id = %user_id, error = %e, "Presence publish failed, will retry");
            return false;
        }

        if let Err(e) = self.ledger.store(record).await {
            tracing::warn!(user_id = %user_id, error = %e, "Presence record not mirrored to ledger");
        }
        true
    }

    /// Periodic backstop: renews this process's ledger members, retries
    /// pending announcements, picks up DND schedule boundaries, and starts
    /// the grace timer for users whose close notification was lost.
    pub async fn reconcile(self: &Arc<Self>) {
        self.renew_members().await;

        let users: Vec<Snowflake> = self.users.iter().map(|entry| *entry.key()).collect();
        for user_id in users {
            if self.registry.user_connection_count(user_id) == 0 {
                self.start_grace(user_id);
            } else {
                self.reevaluate(user_id).await;
            }
        }
    }

    async fn renew_members(&self) {
        for connection in self.registry.snapshot() {
            let (Some(user_id), Some(connection_id)) = (connection.user_id(), connection.id()) else {
                continue;
            };
            if let Err(e) = self.ledger.renew(user_id, &self.ledger_member(connection_id)).await {
                tracing::warn!(user_id = %user_id, error = %e, "Presence ledger renew failed");
                return;
            }
        }
    }

    pub async fn run_reconciler(self: Arc<Self>, every: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(every.max(Duration::from_millis(10)));
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => self.reconcile().await,
                () = stop_requested(&mut shutdown) => break,
            }
        }
        tracing::debug!("Presence reconciler stopped");
    }

    /// Current public presence of a locally tracked user
    pub fn record(&self, user_id: Snowflake) -> Option<PresenceRecord> {
        self.users.get(&user_id).map(|entry| PresenceRecord {
            user_id,
            status: entry.announced,
            last_change_at: entry.last_change_at,
        })
    }

    pub fn status_of(&self, user_id: Snowflake) -> PresenceStatus {
        self.users
            .get(&user_id)
            .map_or(PresenceStatus::Offline, |entry| entry.announced)
    }

    pub fn tracked_users(&self) -> usize {
        self.users.len()
    }
}

impl std::fmt::Debug for PresenceTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresenceTracker")
            .field("instance_id", &self.instance_id)
            .field("tracked_users", &self.users.len())
            .field("offline_grace", &self.offline_grace)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::test_support::StaticStore;
    use chat_cache::{MemoryBus, MemoryPresenceLedger};
    use chat_common::BusConfig;
    use chat_core::{Principal, UserTier};
    use tokio::sync::mpsc;

    const GRACE: Duration = Duration::from_secs(15);
    const MEMBER_TTL: Duration = Duration::from_secs(60);

    struct Fixture {
        tracker: Arc<PresenceTracker>,
        registry: Arc<ConnectionRegistry>,
        store: Arc<StaticStore>,
        ledger: Arc<MemoryPresenceLedger>,
        envelopes: mpsc::Receiver<EventEnvelope>,
        _bus: Arc<MemoryBus>,
    }

    async fn fixture() -> Fixture {
        let bus = Arc::new(MemoryBus::standalone(&BusConfig::default(), "gw-test"));
        let envelopes = bus.subscribe("gateway:*").await.unwrap();
        let registry = Arc::new(ConnectionRegistry::new());
        let store = Arc::new(StaticStore::new());
        let ledger = Arc::new(MemoryPresenceLedger::new().with_member_ttl(MEMBER_TTL));
        let tracker = PresenceTracker::new(
            ledger.clone(),
            store.clone(),
            bus.clone(),
            registry.clone(),
            "gw-test",
            GRACE,
        );
        Fixture {
            tracker,
            registry,
            store,
            ledger,
            envelopes,
            _bus: bus,
        }
    }

    fn user(id: i64) -> Snowflake {
        Snowflake::new(id)
    }

    fn connect(fx: &Fixture, id: i64) -> ConnectionId {
        let conn = Connection::new(8);
        fx.registry
            .register(&conn, Principal::new(user(id), "u", UserTier::Free))
    }

    async fn next_status(rx: &mut mpsc::Receiver<EventEnvelope>) -> String {
        let envelope = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("no presence envelope")
            .expect("bus closed");
        assert_eq!(envelope.event_type, "PRESENCE_UPDATE");
        envelope.data["status"].as_str().unwrap().to_string()
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_precedence() {
        let base = PresenceInputs {
            live: true,
            ..PresenceInputs::default()
        };
        assert_eq!(resolve_status(base), PresenceStatus::Online);
        assert_eq!(resolve_status(PresenceInputs { idle: true, ..base }), PresenceStatus::Idle);
        assert_eq!(
            resolve_status(PresenceInputs { idle: true, schedule_active: true, ..base }),
            PresenceStatus::Dnd
        );
        assert_eq!(
            resolve_status(PresenceInputs {
                schedule_active: true,
                manual: Some(PresenceStatus::Invisible),
                ..base
            })
            .public(),
            PresenceStatus::Offline
        );
        assert_eq!(
            resolve_status(PresenceInputs { manual: Some(PresenceStatus::Dnd), ..base }),
            PresenceStatus::Dnd
        );
        assert_eq!(
            resolve_status(PresenceInputs {
                live: false,
                manual: Some(PresenceStatus::Dnd),
                ..base
            }),
            PresenceStatus::Offline
        );
    }

    #[tokio::test]
    async fn test_first_connection_announces_online_to_store_topics() {
        let mut fx = fixture().await;
        fx.store.set_topics(user(1), [Topic::Guild(Snowflake::new(10))]);
        let id = connect(&fx, 1);

        fx.tracker
            .connection_opened(user(1), id, ScheduleFetch::Fetched(None))
            .await;

        let envelope = fx.envelopes.recv().await.unwrap();
        assert_eq!(envelope.topics[0], Topic::User(user(1)));
        assert!(envelope.topics.contains(&Topic::Guild(Snowflake::new(10))));
        assert!(envelope.data.is_object(), "{:?}", envelope.data);
        assert_eq!(envelope.data["user_id"], "1");
        assert!(envelope.data["last_change_at"].is_string());
        assert_eq!(envelope.data["status"], "online");
        assert_eq!(fx.tracker.status_of(user(1)), PresenceStatus::Online);
        assert_eq!(fx.ledger.connection_count(user(1)).await.unwrap(), 1);
        assert_eq!(
            fx.ledger.load(user(1)).await.unwrap().map(|r| r.status),
            Some(PresenceStatus::Online)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_within_grace_does_not_flicker() {
        let mut fx = fixture().await;
        let first = connect(&fx, 1);
        fx.tracker.connection_opened(user(1), first, ScheduleFetch::Fetched(None)).await;
        assert_eq!(next_status(&mut fx.envelopes).await, "online");

        fx.registry.unregister(first);
        fx.tracker.connection_closed(user(1), first, 0);
        settle().await;

        tokio::time::advance(GRACE / 2).await;
        let second = connect(&fx, 1);
        fx.tracker.connection_opened(user(1), second, ScheduleFetch::Unavailable).await;

        tokio::time::advance(GRACE * 2).await;
        settle().await;

        assert_eq!(fx.tracker.status_of(user(1)), PresenceStatus::Online);
        assert!(fx.envelopes.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_after_grace() {
        let mut fx = fixture().await;
        let id = connect(&fx, 1);
        fx.tracker.connection_opened(user(1), id, ScheduleFetch::Fetched(None)).await;
        assert_eq!(next_status(&mut fx.envelopes).await, "online");

        fx.registry.unregister(id);
        fx.tracker.connection_closed(user(1), id, 0);
        settle().await;

        tokio::time::advance(GRACE - Duration::from_millis(1)).await;
        settle().await;
        assert_eq!(fx.tracker.status_of(user(1)), PresenceStatus::Online);

        tokio::time::advance(Duration::from_millis(2)).await;
        assert_eq!(next_status(&mut fx.envelopes).await, "offline");
        assert_eq!(fx.tracker.tracked_users(), 0);
    }

    #[tokio::test]
    async fn test_manual_status_and_idle() {
        let mut fx = fixture().await;
        let id = connect(&fx, 1);
        fx.tracker.connection_opened(user(1), id, ScheduleFetch::Fetched(None)).await;
        assert_eq!(next_status(&mut fx.envelopes).await, "online");

        fx.tracker.set_status(user(1), PresenceStatus::Idle).await;
        assert_eq!(next_status(&mut fx.envelopes).await, "idle");

        fx.tracker.set_status(user(1), PresenceStatus::Invisible).await;
        assert_eq!(next_status(&mut fx.envelopes).await, "offline");

        fx.tracker.set_status(user(1), PresenceStatus::Online).await;
        assert_eq!(next_status(&mut fx.envelopes).await, "online");

        // No change, no announcement
        fx.tracker.set_status(user(1), PresenceStatus::Online).await;
        assert!(fx.envelopes.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_active_schedule_overrides_idle() {
        let mut fx = fixture().await;
        let always = DndSchedule {
            enabled: true,
            start_minute: 0,
            end_minute: 24 * 60,
            days_of_week: DndSchedule::ALL_DAYS,
            timezone: chat_core::Tz::UTC,
        };

        let id = connect(&fx, 1);
        fx.tracker
            .connection_opened(user(1), id, ScheduleFetch::Fetched(Some(always)))
            .await;
        assert_eq!(next_status(&mut fx.envelopes).await, "dnd");

        fx.tracker.set_status(user(1), PresenceStatus::Idle).await;
        assert!(fx.envelopes.try_recv().is_err());
        assert_eq!(fx.tracker.status_of(user(1)), PresenceStatus::Dnd);
    }

    #[tokio::test]
    async fn test_store_failure_marks_pending_and_reconcile_retries() {
        let mut fx = fixture().await;
        fx.store.set_failing(true);
        let id = connect(&fx, 1);

        fx.tracker.connection_opened(user(1), id, ScheduleFetch::Unavailable).await;
        assert!(fx.envelopes.try_recv().is_err());
        assert_eq!(fx.tracker.status_of(user(1)), PresenceStatus::Online);

        fx.store.set_failing(false);
        fx.tracker.reconcile().await;
        assert_eq!(next_status(&mut fx.envelopes).await, "online");

        fx.tracker.reconcile().await;
        assert!(fx.envelopes.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ledger_failure_falls_back_to_local_count() {
        let mut fx = fixture().await;
        fx.ledger.set_failing(true);
        let first = connect(&fx, 1);
        let second = connect(&fx, 1);
        fx.tracker.connection_opened(user(1), first, ScheduleFetch::Fetched(None)).await;
        fx.tracker.connection_opened(user(1), second, ScheduleFetch::Fetched(None)).await;
        assert_eq!(next_status(&mut fx.envelopes).await, "online");

        let removed = fx.registry.unregister(first).unwrap();
        fx.tracker.connection_closed(user(1), first, removed.remaining);
        settle().await;

        tokio::time::advance(GRACE * 2).await;
        settle().await;
        assert_eq!(fx.tracker.status_of(user(1)), PresenceStatus::Online);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_process_keeps_user_online() {
        let mut fx = fixture().await;
        fx.ledger.attach(user(1), "gw-other:1").await.unwrap();
        let id = connect(&fx, 1);
        fx.tracker.connection_opened(user(1), id, ScheduleFetch::Fetched(None)).await;
        assert_eq!(next_status(&mut fx.envelopes).await, "online");

        fx.registry.unregister(id);
        fx.tracker.connection_closed(user(1), id, 0);
        settle().await;

        // The other process keeps renewing its member
        for _ in 0..6 {
            tokio::time::advance(GRACE).await;
            settle().await;
            fx.ledger.renew(user(1), "gw-other:1").await.unwrap();
        }
        assert!(fx.envelopes.try_recv().is_err());
        assert_eq!(fx.tracker.tracked_users(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_member_of_crashed_process_expires() {
        let mut fx = fixture().await;
        fx.ledger.attach(user(1), "gw-crashed:1").await.unwrap();
        let id = connect(&fx, 1);
        fx.tracker.connection_opened(user(1), id, ScheduleFetch::Fetched(None)).await;
        assert_eq!(next_status(&mut fx.envelopes).await, "online");

        fx.registry.unregister(id);
        fx.tracker.connection_closed(user(1), id, 0);
        settle().await;

        // Still counted until its deadline passes
        tokio::time::advance(GRACE * 2).await;
        settle().await;
        assert!(fx.envelopes.try_recv().is_err());
        assert_eq!(fx.tracker.tracked_users(), 1);

        for _ in 0..4 {
            tokio::time::advance(GRACE).await;
            settle().await;
        }
        assert_eq!(next_status(&mut fx.envelopes).await, "offline");
        assert_eq!(fx.tracker.tracked_users(), 0);
        assert_eq!(fx.ledger.connection_count(user(1)).await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconcile_renews_local_members() {
        let mut fx = fixture().await;
        let id = connect(&fx, 1);
        fx.tracker.connection_opened(user(1), id, ScheduleFetch::Fetched(None)).await;
        assert_eq!(next_status(&mut fx.envelopes).await, "online");

        for _ in 0..3 {
            tokio::time::advance(MEMBER_TTL / 2).await;
            fx.tracker.reconcile().await;
        }
        assert_eq!(fx.ledger.connection_count(user(1)).await.unwrap(), 1);
        assert!(fx.envelopes.try_recv().is_err());
    }
}
