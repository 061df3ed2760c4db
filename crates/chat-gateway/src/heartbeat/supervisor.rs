use std::sync::Arc;
use std::time::Duration;

use chat_cache::stop_requested;
use tokio::sync::watch;
use tokio::time::{interval, Instant, MissedTickBehavior};

use crate::connection::ConnectionManager;

/// Totals accumulated over the supervisor's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SupervisorReport {
    pub stale_closed: usize,
    pub resynced: usize,
}

/// Run until `shutdown` flips to true.
///
/// Every half heartbeat interval, connections silent past the heartbeat
/// timeout are closed and connections whose snapshot failed are retried.
/// Every resync interval, all ready connections are reconciled against the
/// store.
pub async fn run_supervisor(
    manager: Arc<ConnectionManager>,
    mut shutdown: watch::Receiver<bool>,
) -> SupervisorReport {
    let config = manager.config().clone();
    let timeout = config.heartbeat_timeout();
    let sweep_every = (config.heartbeat_interval() / 2).max(Duration::from_millis(10));

    let mut sweep = interval(sweep_every);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut resync = interval(config.resync_interval().max(sweep_every));
    resync.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Both fire immediately on the first tick
    sweep.tick().await;
    resync.tick().await;

    let mut report = SupervisorReport::default();
    loop {
        tokio::select! {
            _ = sweep.tick() => {
                let closed = manager.close_stale(Instant::now(), timeout);
                let retried = manager.resync_sweep(true).await;
                if closed > 0 || retried > 0 {
                    tracing::debug!(closed, retried, "Heartbeat sweep");
                }
                report.stale_closed += closed;
                report.resynced += retried;
            }
            _ = resync.tick() => {
                let resynced = manager.resync_sweep(false).await;
                tracing::debug!(resynced, "Periodic membership resync");
                report.resynced += resynced;
            }
            () = stop_requested(&mut shutdown) => break,
        }
    }

    tracing::info!(
        stale_closed = report.stale_closed,
        resynced = report.resynced,
        "Heartbeat supervisor stopped"
    );
    report
}
