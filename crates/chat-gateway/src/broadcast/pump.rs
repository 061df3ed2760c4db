//! Bus pump
//!
//! Drains the bus subscription into a fixed pool of dispatch workers.
//! Envelopes are sharded by primary topic, so everything published on one
//! bus key is dispatched in order by the same worker.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chat_cache::{all_topics_pattern, stop_requested, BroadcastBus, BusResult, EventEnvelope};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::Dispatcher;

const WORKER_QUEUE: usize = 1024;

/// Running pump plus its workers
#[derive(Debug)]
pub struct BusPump {
    pump: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

impl BusPump {
    /// Subscribe to every topic under `prefix` and start `workers` dispatch tasks
    pub async fn start(
        bus: &Arc<dyn BroadcastBus>,
        dispatcher: Arc<Dispatcher>,
        prefix: &str,
        workers: usize,
        shutdown: watch::Receiver<bool>,
    ) -> BusResult<Self> {
        let pattern = all_topics_pattern(prefix);
        let inbound = bus.subscribe(&pattern).await?;

        let (senders, handles): (Vec<_>, Vec<_>) = (0..workers.max(1))
            .map(|index| {
                let (tx, rx) = mpsc::channel(WORKER_QUEUE);
                let handle = tokio::spawn(run_worker(index, Arc::clone(&dispatcher), rx));
                (tx, handle)
            })
            .unzip();

        let pump = tokio::spawn(run_pump(inbound, senders, shutdown));
        tracing::info!(pattern = %pattern, workers = handles.len(), "Bus pump started");

        Ok(Self {
            pump,
            workers: handles,
        })
    }

    /// Wait for the pump and every worker to finish
    pub async fn join(self) {
        let _ = self.pump.await;
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

/// Worker index for an envelope
pub fn shard_for(envelope: &EventEnvelope, workers: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    envelope.primary_topic().hash(&mut hasher);
    (hasher.finish() % workers.max(1) as u64) as usize
}

async fn run_pump(
    mut inbound: mpsc::Receiver<EventEnvelope>,
    senders: Vec<mpsc::Sender<EventEnvelope>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            received = inbound.recv() => {
                let Some(envelope) = received else {
                    tracing::warn!("Bus subscription ended");
                    break;
                };
                let shard = shard_for(&envelope, senders.len());
                if senders[shard].send(envelope).await.is_err() {
                    tracing::error!(shard, "Dispatch worker gone, stopping pump");
                    break;
                }
            }
            () = stop_requested(&mut shutdown) => break,
        }
    }
    tracing::debug!("Bus pump stopped");
}

async fn run_worker(index: usize, dispatcher: Arc<Dispatcher>, mut rx: mpsc::Receiver<EventEnvelope>) {
    while let Some(envelope) = rx.recv().await {
        let event_type = envelope.event_type.clone();
        let report = dispatcher.dispatch(envelope).await;
        if report.evicted > 0 {
            tracing::debug!(
                worker = index,
                event_type = %event_type,
                evicted = report.evicted,
                "Slow consumers evicted during dispatch"
            );
        }
    }
    tracing::debug!(worker = index, "Dispatch worker stopped");
}
