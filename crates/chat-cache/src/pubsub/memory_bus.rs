//! In-process broadcast bus.
//!
//! A [`MemoryHub`] stands in for the external pub/sub server; each gateway
//! instance in a test connects its own [`MemoryBus`] to the same hub. The
//! hub can be taken offline to exercise the outbox retry path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chat_common::BusConfig;
use tokio::sync::{broadcast, mpsc, watch};

use super::bus::{
    stop_requested, BroadcastBus, BusCounters, BusError, BusResult, BusStats, Outbox, OutboxSink,
};
use super::envelope::{key_matches, EventEnvelope};

const SUBSCRIBER_BUFFER: usize = 1024;

/// Shared in-memory pub/sub server
#[derive(Debug)]
pub struct MemoryHub {
    /// (channel key, JSON payload)
    tx: broadcast::Sender<(String, String)>,
    available: AtomicBool,
}

impl MemoryHub {
    pub fn new(buffer_size: usize) -> Arc<Self> {
        let (tx, _) = broadcast::channel(buffer_size.max(1));
        Arc::new(Self {
            tx,
            available: AtomicBool::new(true),
        })
    }

    /// Simulate the bus server going down or coming back
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}

struct HubSink(Arc<MemoryHub>);

#[async_trait]
impl OutboxSink for HubSink {
    async fn deliver(&self, key: &str, payload: &str) -> BusResult<()> {
        if !self.0.is_available() {
            return Err(BusError::Unavailable("memory hub offline".to_string()));
        }
        // No subscribers is not an error, same as PUBLISH returning 0
        let _ = self.0.tx.send((key.to_string(), payload.to_string()));
        Ok(())
    }
}

/// One process's connection to a [`MemoryHub`]
pub struct MemoryBus {
    hub: Arc<MemoryHub>,
    outbox: Outbox,
    counters: Arc<BusCounters>,
    shutdown_tx: watch::Sender<bool>,
}

impl MemoryBus {
    pub fn connect(hub: Arc<MemoryHub>, config: &BusConfig, origin_id: &str) -> Self {
        let counters = Arc::new(BusCounters::default());
        counters.connected.store(true, Ordering::Relaxed);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let outbox = Outbox::start(
            config,
            origin_id,
            HubSink(Arc::clone(&hub)),
            Arc::clone(&counters),
            shutdown_rx,
        );

        Self {
            hub,
            outbox,
            counters,
            shutdown_tx,
        }
    }

    /// Standalone bus with its own hub
    pub fn standalone(config: &BusConfig, origin_id: &str) -> Self {
        Self::connect(MemoryHub::new(4096), config, origin_id)
    }

    pub fn hub(&self) -> &Arc<MemoryHub> {
        &self.hub
    }

    pub fn prefix(&self) -> &str {
        self.outbox.prefix()
    }
}

#[async_trait]
impl BroadcastBus for MemoryBus {
    fn publish(&self, envelope: EventEnvelope) -> BusResult<()> {
        self.outbox.push(envelope)
    }

    async fn subscribe(&self, pattern: &str) -> BusResult<mpsc::Receiver<EventEnvelope>> {
        if *self.shutdown_tx.borrow() {
            return Err(BusError::Closed);
        }

        let mut rx = self.hub.tx.subscribe();
        let (tx, out) = mpsc::channel(SUBSCRIBER_BUFFER);
        let pattern = pattern.to_string();
        let counters = Arc::clone(&self.counters);
        let mut shutdown = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    msg = rx.recv() => match msg {
                        Ok((key, payload)) => {
                            if !key_matches(&pattern, &key) {
                                continue;
                            }
                            match EventEnvelope::from_json(&payload) {
                                Ok(envelope) => {
                                    counters.received.fetch_add(1, Ordering::Relaxed);
                                    if tx.send(envelope).await.is_err() {
                                        break;
                                    }
                                }
                                Err(e) => tracing::warn!(key = %key, error = %e, "Dropping undecodable envelope"),
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            tracing::warn!(missed, "Memory bus subscriber lagged, envelopes lost");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    () = stop_requested(&mut shutdown) => break,
                }
            }
            tracing::debug!(pattern = %pattern, "Memory bus subscription ended");
        });

        Ok(out)
    }

    fn stats(&self) -> BusStats {
        BusStats {
            connected: self.hub.is_available(),
            outbox_depth: self.outbox.depth(),
            outbox_capacity: self.outbox.capacity(),
            published: self.counters.published.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            received: self.counters.received.load(Ordering::Relaxed),
        }
    }

    fn close(&self) {
        self.outbox.close();
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for MemoryBus {
    fn drop(&mut self) {
        self.close();
    }
}
