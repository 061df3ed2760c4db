//! Broadcast bus contract and the buffered outbox shared by implementations.
//!
//! Publishing never waits on the network: envelopes go into a bounded
//! outbox drained by a single task, which keeps single-writer FIFO per
//! process and retries with backoff while the bus is unreachable.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chat_common::BusConfig;
use rand::Rng;
use serde::Serialize;
use tokio::sync::{mpsc, watch};

use super::envelope::{channel_key, EventEnvelope, OriginStamp};
use crate::pool::RedisPoolError;

/// Error type for bus operations
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Bus unavailable: {0}")]
    Unavailable(String),

    #[error("Outbox full ({capacity} envelopes buffered)")]
    BufferFull { capacity: usize },

    #[error("Bus closed")]
    Closed,

    #[error("Envelope has no topic")]
    NoTopic,

    #[error("Redis error: {0}")]
    Redis(#[from] RedisPoolError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<redis::RedisError> for BusError {
    fn from(e: redis::RedisError) -> Self {
        Self::Redis(RedisPoolError::Redis(e))
    }
}

/// Result type for bus operations
pub type BusResult<T> = Result<T, BusError>;

/// Point-in-time bus counters
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BusStats {
    pub connected: bool,
    pub outbox_depth: usize,
    pub outbox_capacity: usize,
    pub published: u64,
    pub rejected: u64,
    pub received: u64,
}

/// Cross-process publish/subscribe channel
#[async_trait]
pub trait BroadcastBus: Send + Sync {
    /// Queue an envelope for publishing on its primary topic's key.
    /// Returns immediately; fails loudly when the outbox is saturated.
    fn publish(&self, envelope: EventEnvelope) -> BusResult<()>;

    /// Receive every envelope whose key matches `pattern`
    async fn subscribe(&self, pattern: &str) -> BusResult<mpsc::Receiver<EventEnvelope>>;

    fn stats(&self) -> BusStats;

    /// Stop accepting publishes, flush what is buffered, and end subscriptions
    fn close(&self);
}

/// Where the outbox drain task delivers serialized envelopes
#[async_trait]
pub(crate) trait OutboxSink: Send + Sync + 'static {
    async fn deliver(&self, key: &str, payload: &str) -> BusResult<()>;
}

/// Counters shared between the handle and its background tasks
#[derive(Debug, Default)]
pub(crate) struct BusCounters {
    pub connected: AtomicBool,
    pub published: AtomicU64,
    pub rejected: AtomicU64,
    pub received: AtomicU64,
}

/// Resolves once `true` is sent on `shutdown` or the sender is dropped.
///
/// The `watch::Ref` from `wait_for` wraps a lock guard and is not `Send`, so it
/// is released here instead of living on in a `select!` arm.
pub async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Backoff `min(attempt * step, max)` plus up to half a step of jitter
pub(crate) fn backoff_with_jitter(config: &BusConfig, attempt: u32) -> Duration {
    let base = config.backoff(attempt);
    let jitter = rand::thread_rng().gen_range(0..=config.reconnect_step_ms / 2);
    base + Duration::from_millis(jitter)
}

/// Publishing half of a bus: bounded outbox, origin stamping, drain task
pub(crate) struct Outbox {
    prefix: String,
    stamp: OriginStamp,
    tx: parking_lot::Mutex<Option<mpsc::Sender<EventEnvelope>>>,
    capacity: usize,
    counters: Arc<BusCounters>,
}

impl Outbox {
    pub fn start<S: OutboxSink>(
        config: &BusConfig,
        origin_id: &str,
        sink: S,
        counters: Arc<BusCounters>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let capacity = config.outbox_capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);

        tokio::spawn(drain(
            rx,
            sink,
            config.clone(),
            Arc::clone(&counters),
            shutdown,
        ));

        Self {
            prefix: config.channel_prefix.clone(),
            stamp: OriginStamp::new(origin_id),
            tx: parking_lot::Mutex::new(Some(tx)),
            capacity,
            counters,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn push(&self, mut envelope: EventEnvelope) -> BusResult<()> {
        if envelope.topics.is_empty() {
            return Err(BusError::NoTopic);
        }

        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            return Err(BusError::Closed);
        };

        self.stamp.stamp(&mut envelope);
        match tx.try_send(envelope) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(envelope)) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    event_type = %envelope.event_type,
                    capacity = self.capacity,
                    "Bus outbox saturated, rejecting publish"
                );
                Err(BusError::BufferFull {
                    capacity: self.capacity,
                })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(BusError::Closed),
        }
    }

    pub fn depth(&self) -> usize {
        self.tx
            .lock()
            .as_ref()
            .map_or(0, |tx| tx.max_capacity() - tx.capacity())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop the sender so the drain task finishes once the outbox is empty
    pub fn close(&self) {
        self.tx.lock().take();
    }
}

async fn drain<S: OutboxSink>(
    mut rx: mpsc::Receiver<EventEnvelope>,
    sink: S,
    config: BusConfig,
    counters: Arc<BusCounters>,
    mut shutdown: watch::Receiver<bool>,
) {
    while let Some(envelope) = rx.recv().await {
        let Some(topic) = envelope.primary_topic() else {
            continue;
        };
        let key = channel_key(&config.channel_prefix, &topic);
        let payload = match envelope.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, event_type = %envelope.event_type, "Failed to encode envelope");
                continue;
            }
        };

        let mut attempt: u32 = 0;
        loop {
            match sink.deliver(&key, &payload).await {
                Ok(()) => {
                    if attempt > 0 {
                        tracing::info!(attempts = attempt + 1, "Bus publish recovered");
                    }
                    counters.connected.store(true, Ordering::Relaxed);
                    counters.published.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!(key = %key, event_type = %envelope.event_type, "Published envelope");
                    break;
                }
                Err(e) => {
                    attempt = attempt.saturating_add(1);
                    counters.connected.store(false, Ordering::Relaxed);
                    let delay = backoff_with_jitter(&config, attempt);
                    tracing::warn!(
                        error = %e,
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        buffered = rx.len(),
                        "Bus publish failed, retrying"
                    );

                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = stop_requested(&mut shutdown) => {
                            tracing::error!(
                                dropped = rx.len() + 1,
                                "Bus closed while unavailable, buffered envelopes discarded"
                            );
                            return;
                        }
                    }
                }
            }
        }
    }

    tracing::debug!("Bus outbox drained");
}
