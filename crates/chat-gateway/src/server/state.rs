//! Gateway state
//!
//! Application state for the gateway server.

use crate::broadcast::Dispatcher;
use crate::connection::ConnectionManager;
use chat_cache::BroadcastBus;
use chat_common::AppConfig;
use chat_core::IdentityVerifier;
use std::sync::Arc;
use tokio::sync::watch;

/// Counts upgraded sockets whose reader or writer is still running
#[derive(Debug)]
pub struct OpenSockets {
    count: watch::Sender<usize>,
}

/// Held by a socket task; the count drops when it does
#[derive(Debug)]
pub struct SocketGuard(Arc<OpenSockets>);

impl OpenSockets {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            count: watch::Sender::new(0),
        })
    }

    pub fn enter(self: &Arc<Self>) -> SocketGuard {
        self.count.send_modify(|count| *count += 1);
        SocketGuard(Arc::clone(self))
    }

    pub fn count(&self) -> usize {
        *self.count.borrow()
    }

    /// Resolves once no socket task is left
    pub async fn drained(&self) {
        let mut count = self.count.subscribe();
        let _ = count.wait_for(|count| *count == 0).await;
    }
}

impl Drop for SocketGuard {
    fn drop(&mut self) {
        self.0.count.send_modify(|count| *count = count.saturating_sub(1));
    }
}

/// Gateway application state
///
/// Holds all shared dependencies for the gateway server. Cheap to clone.
#[derive(Clone)]
pub struct GatewayState {
    /// Connection lifecycle, registry, subscriptions and presence
    manager: Arc<ConnectionManager>,
    /// Fanout from the bus to local connections
    dispatcher: Arc<Dispatcher>,
    bus: Arc<dyn BroadcastBus>,
    verifier: Arc<dyn IdentityVerifier>,
    sockets: Arc<OpenSockets>,
    /// Application configuration
    config: Arc<AppConfig>,
}

impl GatewayState {
    /// Create a new gateway state
    pub fn new(
        manager: Arc<ConnectionManager>,
        dispatcher: Arc<Dispatcher>,
        bus: Arc<dyn BroadcastBus>,
        verifier: Arc<dyn IdentityVerifier>,
        config: AppConfig,
    ) -> Self {
        Self {
            manager,
            dispatcher,
            bus,
            verifier,
            sockets: OpenSockets::new(),
            config: Arc::new(config),
        }
    }

    /// Get the connection manager
    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn bus(&self) -> &Arc<dyn BroadcastBus> {
        &self.bus
    }

    pub fn verifier(&self) -> &dyn IdentityVerifier {
        self.verifier.as_ref()
    }

    pub fn sockets(&self) -> &Arc<OpenSockets> {
        &self.sockets
    }

    /// Get the application configuration
    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}

impl std::fmt::Debug for GatewayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayState")
            .field("manager", &self.manager)
            .field("bus", &self.bus.stats())
            .field("open_sockets", &self.sockets.count())
            .field("config", &"AppConfig")
            .finish()
    }
}
