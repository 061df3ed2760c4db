//! Redis-backed broadcast bus.
//!
//! Publishes go through the pooled connections; each subscription holds a
//! dedicated pub/sub connection that pattern-subscribes and reconnects with
//! backoff. Redis pub/sub keeps nothing for absent listeners, so envelopes
//! published while a subscriber is reconnecting are not replayed.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use chat_common::BusConfig;
use futures_util::StreamExt;
use redis::{AsyncCommands, Client};
use tokio::sync::{mpsc, watch};

use super::bus::{
    backoff_with_jitter, stop_requested, BroadcastBus, BusCounters, BusError, BusResult, BusStats, Outbox,
    OutboxSink,
};
use super::envelope::EventEnvelope;
use crate::pool::{redact_url, RedisPool};

const SUBSCRIBER_BUFFER: usize = 8192;

struct PoolSink(RedisPool);

#[async_trait]
impl OutboxSink for PoolSink {
    async fn deliver(&self, key: &str, payload: &str) -> BusResult<()> {
        let mut conn = self.0.get().await?;
        let _receivers: i64 = conn.publish(key, payload).await?;
        Ok(())
    }
}

/// Why a listener session ended
enum ListenerExit {
    /// Shutdown requested or the receiving side went away
    Stopped,
    /// Connection lost; reconnect
    Disconnected,
}

/// Redis pub/sub broadcast bus
pub struct RedisBus {
    url: String,
    config: BusConfig,
    outbox: Outbox,
    counters: Arc<BusCounters>,
    shutdown_tx: watch::Sender<bool>,
}

impl RedisBus {
    pub fn new(pool: RedisPool, config: &BusConfig, origin_id: &str) -> Self {
        let counters = Arc::new(BusCounters::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let url = pool.url().to_string();

        let outbox = Outbox::start(
            config,
            origin_id,
            PoolSink(pool),
            Arc::clone(&counters),
            shutdown_rx,
        );

        Self {
            url,
            config: config.clone(),
            outbox,
            counters,
            shutdown_tx,
        }
    }

    async fn listener_loop(
        url: String,
        pattern: String,
        config: BusConfig,
        tx: mpsc::Sender<EventEnvelope>,
        counters: Arc<BusCounters>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut attempt: u32 = 0;

        loop {
            match Self::run_listener(&url, &pattern, &tx, &counters, &mut shutdown, &mut attempt)
                .await
            {
                Ok(ListenerExit::Stopped) => break,
                Ok(ListenerExit::Disconnected) => {
                    tracing::warn!(pattern = %pattern, "Bus subscription stream ended");
                }
                Err(e) => {
                    tracing::warn!(pattern = %pattern, error = %e, "Bus subscriber error");
                }
            }

            counters.connected.store(false, Ordering::Relaxed);
            attempt = attempt.saturating_add(1);
            let delay = backoff_with_jitter(&config, attempt);
            tracing::info!(
                attempt,
                retry_in_ms = delay.as_millis() as u64,
                "Reconnecting bus subscriber"
            );

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = stop_requested(&mut shutdown) => break,
                () = tx.closed() => break,
            }
        }

        tracing::info!(pattern = %pattern, "Bus subscriber stopped");
    }

    /// Run one pub/sub session until it fails or is stopped
    async fn run_listener(
        url: &str,
        pattern: &str,
        tx: &mpsc::Sender<EventEnvelope>,
        counters: &BusCounters,
        shutdown: &mut watch::Receiver<bool>,
        attempt: &mut u32,
    ) -> BusResult<ListenerExit> {
        let client = Client::open(url)?;
        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.psubscribe(pattern).await?;

        *attempt = 0;
        counters.connected.store(true, Ordering::Relaxed);
        tracing::info!(url = %redact_url(url), pattern = %pattern, "Bus subscriber connected");

        let mut stream = pubsub.on_message();

        loop {
            tokio::select! {
                msg = stream.next() => {
                    let Some(msg) = msg else {
                        return Ok(ListenerExit::Disconnected);
                    };

                    let payload: String = match msg.get_payload() {
                        Ok(payload) => payload,
                        Err(e) => {
                            tracing::warn!(channel = %msg.get_channel_name(), error = %e, "Unreadable bus payload");
                            continue;
                        }
                    };

                    match EventEnvelope::from_json(&payload) {
                        Ok(envelope) => {
                            counters.received.fetch_add(1, Ordering::Relaxed);
                            if tx.send(envelope).await.is_err() {
                                return Ok(ListenerExit::Stopped);
                            }
                        }
                        Err(e) => {
                            tracing::warn!(channel = %msg.get_channel_name(), error = %e, "Dropping undecodable envelope");
                        }
                    }
                }
                () = stop_requested(shutdown) => return Ok(ListenerExit::Stopped),
            }
        }
    }
}

#[async_trait]
impl BroadcastBus for RedisBus {
    fn publish(&self, envelope: EventEnvelope) -> BusResult<()> {
        self.outbox.push(envelope)
    }

    async fn subscribe(&self, pattern: &str) -> BusResult<mpsc::Receiver<EventEnvelope>> {
        if *self.shutdown_tx.borrow() {
            return Err(BusError::Closed);
        }

        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        tokio::spawn(Self::listener_loop(
            self.url.clone(),
            pattern.to_string(),
            self.config.clone(),
            tx,
            Arc::clone(&self.counters),
            self.shutdown_tx.subscribe(),
        ));

        Ok(rx)
    }

    fn stats(&self) -> BusStats {
        BusStats {
            connected: self.counters.connected.load(Ordering::Relaxed),
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

impl std::fmt::Debug for RedisBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBus")
            .field("url", &redact_url(&self.url))
            .field("prefix", &self.outbox.prefix())
            .finish_non_exhaustive()
    }
}

impl Drop for RedisBus {
    fn drop(&mut self) {
        self.close();
    }
}
