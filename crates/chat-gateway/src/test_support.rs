//! Shared fixtures for unit tests

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chat_cache::{BroadcastBus, MemoryBus, MemoryPresenceLedger};
use chat_common::{AppConfig, BusConfig, JwtVerifier};
use chat_core::{
    DndSchedule, DomainError, MembershipStore, Principal, RepoResult, Snowflake, Topic, UserTier,
};
use dashmap::DashMap;
use tokio::sync::Notify;

use crate::broadcast::Dispatcher;
use crate::connection::{ConnectionManager, ConnectionRegistry};
use crate::presence::PresenceTracker;
use crate::server::GatewayState;

pub const TEST_SECRET: &str = "test-secret";

/// Membership store backed by maps, with a switch to simulate outages
#[derive(Debug, Default)]
pub struct StaticStore {
    topics: DashMap<Snowflake, HashSet<Topic>>,
    schedules: DashMap<Snowflake, DndSchedule>,
    failing: AtomicBool,
    /// Topic reads complete only after [`StaticStore::release_reads`]
    held: AtomicBool,
    released: Notify,
}

impl StaticStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_topics(&self, user_id: Snowflake, topics: impl IntoIterator<Item = Topic>) {
        self.topics.insert(user_id, topics.into_iter().collect());
    }

    pub fn set_schedule(&self, user_id: Snowflake, schedule: DndSchedule) {
        self.schedules.insert(user_id, schedule);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Topic reads still see the data as of the call, but return late
    pub fn hold_reads(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    pub fn release_reads(&self) {
        self.held.store(false, Ordering::SeqCst);
        self.released.notify_waiters();
    }

    async fn wait_released(&self) {
        loop {
            let released = self.released.notified();
            if !self.held.load(Ordering::SeqCst) {
                return;
            }
            released.await;
        }
    }

    fn check(&self) -> RepoResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DomainError::StoreUnavailable("store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MembershipStore for StaticStore {
    async fn user_topics(&self, user_id: Snowflake) -> RepoResult<HashSet<Topic>> {
        self.check()?;
        let topics = self
            .topics
            .get(&user_id)
            .map(|topics| topics.clone())
            .unwrap_or_default();
        self.wait_released().await;
        Ok(topics)
    }

    async fn dnd_schedule(&self, user_id: Snowflake) -> RepoResult<Option<DndSchedule>> {
        self.check()?;
        Ok(self.schedules.get(&user_id).map(|schedule| *schedule))
    }
}

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.gateway.instance_id = "gw-test".to_string();
    config.gateway.outbound_queue_capacity = 8;
    config.presence.offline_grace_ms = 15_000;
    config.jwt.secret = TEST_SECRET.to_string();
    config
}

/// Connection manager over a standalone memory bus and ledger
pub async fn manager_with(store: Arc<StaticStore>) -> (Arc<ConnectionManager>, Arc<MemoryBus>) {
    let config = test_config();
    let bus = Arc::new(MemoryBus::standalone(&BusConfig::default(), "gw-test"));
    let registry = Arc::new(ConnectionRegistry::new());
    let presence = PresenceTracker::new(
        Arc::new(MemoryPresenceLedger::new()),
        store.clone(),
        bus.clone(),
        Arc::clone(&registry),
        config.gateway.instance_id.clone(),
        config.presence.offline_grace(),
    );
    let manager = Arc::new(ConnectionManager::new(registry, presence, store, config.gateway));
    (manager, bus)
}

/// Full handler state with a JWT verifier keyed on [`TEST_SECRET`]
pub async fn gateway_state(store: Arc<StaticStore>) -> GatewayState {
    let (manager, bus) = manager_with(store).await;
    let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&manager)));
    let bus: Arc<dyn BroadcastBus> = bus;
    GatewayState::new(
        manager,
        dispatcher,
        bus,
        Arc::new(JwtVerifier::new(TEST_SECRET)),
        test_config(),
    )
}

/// A valid access token for `user_id`
pub fn token_for(state: &GatewayState, user_id: i64) -> String {
    let principal = Principal::new(Snowflake::new(user_id), format!("user{user_id}"), UserTier::Free);
    JwtVerifier::new(&state.config().jwt.secret)
        .issue(&principal, chrono::Duration::hours(1))
        .unwrap()
}
