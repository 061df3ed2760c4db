//! Gateway server setup
//!
//! Wires the gateway's collaborators together, exposes the HTTP routes,
//! and owns the background tasks for one process.

mod handler;
mod state;

pub use handler::gateway_handler;
pub use state::{GatewayState, OpenSockets, SocketGuard};

use crate::broadcast::{BusPump, Dispatcher};
use crate::connection::{ConnectionManager, ConnectionRegistry, GatewayStats};
use crate::heartbeat::run_supervisor;
use crate::presence::PresenceTracker;
use crate::protocol::CloseCode;
use axum::{extract::State, routing::get, Json, Router};
use chat_cache::{
    BroadcastBus, BusStats, PresenceLedger, RedisBus, RedisPool, RedisPresenceLedger,
};
use chat_common::{AppConfig, AppError, JwtVerifier};
use chat_core::{IdentityVerifier, MembershipStore};
use chat_db::{create_pool, PgMembershipStore, PoolSettings};
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use std::time::Duration;
use tower_http::trace::TraceLayer;

/// Upper bound on waiting for sockets to flush their close frames
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Collaborators the gateway is built from
pub struct GatewayDeps {
    pub config: AppConfig,
    pub store: Arc<dyn MembershipStore>,
    pub bus: Arc<dyn BroadcastBus>,
    pub ledger: Arc<dyn PresenceLedger>,
    pub verifier: Arc<dyn IdentityVerifier>,
}

/// A running gateway: shared state plus its background tasks
pub struct Gateway {
    state: GatewayState,
    shutdown: watch::Sender<bool>,
    pump: BusPump,
    tasks: Vec<JoinHandle<()>>,
}

impl Gateway {
    /// Build the gateway and start the bus pump, presence reconciler and
    /// heartbeat supervisor
    pub async fn start(deps: GatewayDeps) -> Result<Self, AppError> {
        let GatewayDeps {
            config,
            store,
            bus,
            ledger,
            verifier,
        } = deps;

        let registry = Arc::new(ConnectionRegistry::new());
        let presence = PresenceTracker::new(
            ledger,
            Arc::clone(&store),
            Arc::clone(&bus),
            Arc::clone(&registry),
            config.gateway.instance_id.clone(),
            config.presence.offline_grace(),
        );
        let manager = Arc::new(ConnectionManager::new(
            registry,
            Arc::clone(&presence),
            store,
            config.gateway.clone(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&manager)));
        let (shutdown, shutdown_rx) = watch::channel(false);

        let pump = BusPump::start(
            &bus,
            Arc::clone(&dispatcher),
            &config.bus.channel_prefix,
            config.gateway.dispatch_workers,
            shutdown_rx.clone(),
        )
        .await
        .map_err(AppError::bus)?;

        let reconciler = tokio::spawn(
            Arc::clone(&presence)
                .run_reconciler(config.presence.reconcile_interval(), shutdown_rx.clone()),
        );
        let supervisor_manager = Arc::clone(&manager);
        let supervisor = tokio::spawn(async move {
            run_supervisor(supervisor_manager, shutdown_rx).await;
        });

        tracing::info!(
            instance_id = %config.gateway.instance_id,
            workers = config.gateway.dispatch_workers,
            "Gateway started"
        );

        let state = GatewayState::new(manager, dispatcher, bus, verifier, config);
        Ok(Self {
            state,
            shutdown,
            pump,
            tasks: vec![reconciler, supervisor],
        })
    }

    pub fn state(&self) -> &GatewayState {
        &self.state
    }

    /// Router bound to this gateway's state
    pub fn router(&self) -> Router {
        create_app(self.state.clone())
    }

    /// Close every connection, wait for the sockets to flush their close
    /// frames, then stop the background tasks
    pub async fn shutdown(self) {
        let closed = self.state.manager().close_all(CloseCode::ServerShutdown);
        tracing::info!(closed, "Shutting down gateway");

        let sockets = self.state.sockets();
        if tokio::time::timeout(SHUTDOWN_DRAIN_TIMEOUT, sockets.drained()).await.is_err() {
            tracing::warn!(open = sockets.count(), "Sockets still open after drain timeout");
        }

        let _ = self.shutdown.send(true);
        self.pump.join().await;
        for task in self.tasks {
            let _ = task.await;
        }
        self.state.bus().close();
    }
}

/// Create the gateway router
pub fn create_router() -> Router<GatewayState> {
    Router::new()
        .route("/gateway", get(gateway_handler))
        .route("/health", get(health_check))
        .route("/stats", get(stats))
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    gateway: GatewayStats,
    bus: BusStats,
}

async fn stats(State(state): State<GatewayState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        gateway: state.manager().stats(),
        bus: state.bus().stats(),
    })
}

/// Build the complete application
pub fn create_app(state: GatewayState) -> Router {
    create_router()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Connect to PostgreSQL and Redis and build production collaborators
async fn connect_deps(config: AppConfig) -> Result<GatewayDeps, AppError> {
    tracing::info!("Connecting to PostgreSQL...");
    let pg = create_pool(&PoolSettings::from(&config.database))
        .await
        .map_err(AppError::database)?;
    tracing::info!("PostgreSQL connection established");

    tracing::info!("Connecting to Redis...");
    let redis = RedisPool::from_config(&config.redis).map_err(AppError::cache)?;
    if let Err(e) = redis.health_check().await {
        // The bus reconnects on its own; start degraded rather than refuse
        tracing::warn!(error = %e, "Redis unreachable at startup");
    } else {
        tracing::info!("Redis connection established");
    }

    let bus = RedisBus::new(redis.clone(), &config.bus, &config.gateway.instance_id);
    let ledger = RedisPresenceLedger::new(redis).with_member_ttl(config.presence.member_ttl());
    let verifier = JwtVerifier::new(&config.jwt.secret);

    Ok(GatewayDeps {
        store: Arc::new(PgMembershipStore::new(pg)),
        bus: Arc::new(bus),
        ledger: Arc::new(ledger),
        verifier: Arc::new(verifier),
        config,
    })
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

/// Run the complete gateway server with configuration
pub async fn run(config: AppConfig) -> Result<(), AppError> {
    let addr = config.gateway.address();
    let deps = connect_deps(config).await?;
    let gateway = Gateway::start(deps).await?;

    tracing::info!("Starting Gateway server on {}", addr);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Gateway listening on ws://{}/gateway", addr);

    // Upgraded sockets outlive the HTTP connections serve() waits for, so
    // clients are told to go away as soon as the signal arrives
    let manager = Arc::clone(gateway.state().manager());
    let served = axum::serve(listener, gateway.router())
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let closed = manager.close_all(CloseCode::ServerShutdown);
            tracing::info!(closed, "Shutdown signal received");
        })
        .await;

    gateway.shutdown().await;
    served?;
    Ok(())
}
