//! Fanout dispatcher
//!
//! Called once per bus envelope. Resolves the envelope topics to local
//! subscribers and pushes one shared frame into each outbound queue. A full
//! queue never blocks the others: droppable frames make room, and a queue
//! that cannot take a critical frame gets its connection evicted.
//!
//! Membership events also change subscriptions. Those changes run after
//! delivery so the affected user still sees the event that removed them.

use std::sync::Arc;

use chat_cache::EventEnvelope;
use chat_core::{Snowflake, Topic};

use crate::connection::{ConnectionManager, Enqueued, EventFrame, Frame, QueueError};
use crate::events::{
    snowflake_field, subject_user_id, GatewayEventType, SubscriptionResyncEvent,
    SubscriptionUpdateEvent,
};

/// Outcome of one dispatch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Frames queued
    pub delivered: usize,
    /// Droppable frames lost to backpressure (evicted or discarded)
    pub dropped: usize,
    /// Connections closed as slow consumers
    pub evicted: usize,
    /// Connections skipped by `exclude_user`
    pub excluded: usize,
}

/// Subscription change implied by an ordinary event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Implied {
    Subscribe { user_id: Snowflake, topic: Topic },
    Unsubscribe { user_id: Snowflake, topic: Topic },
    Drop(Topic),
}

impl Implied {
    fn of(event_type: GatewayEventType, envelope: &EventEnvelope) -> Option<Self> {
        let data = &envelope.data;
        let primary_guild = envelope.primary_topic().filter(Topic::is_guild).map(|t| t.id());
        let addressed_user = envelope
            .topics
            .iter()
            .find(|t| t.is_user())
            .map(Topic::id);

        match event_type {
            GatewayEventType::GuildMemberRemove | GatewayEventType::GuildBanAdd => {
                let guild_id = snowflake_field(data, "guild_id").or(primary_guild)?;
                let user_id = subject_user_id(data)?;
                Some(Self::Unsubscribe {
                    user_id,
                    topic: Topic::Guild(guild_id),
                })
            }
            GatewayEventType::GuildDelete => {
                let guild_id = snowflake_field(data, "id")
                    .or_else(|| snowflake_field(data, "guild_id"))
                    .or(primary_guild)?;
                Some(Self::Drop(Topic::Guild(guild_id)))
            }
            GatewayEventType::ChannelDelete => {
                let channel_id = snowflake_field(data, "id")
                    .or_else(|| snowflake_field(data, "channel_id"))?;
                Some(Self::Drop(Topic::Channel(channel_id)))
            }
            GatewayEventType::GuildCreate => {
                let user_id = addressed_user?;
                let guild_id = snowflake_field(data, "id").or_else(|| snowflake_field(data, "guild_id"))?;
                Some(Self::Subscribe {
                    user_id,
                    topic: Topic::Guild(guild_id),
                })
            }
            GatewayEventType::GuildMemberAdd => {
                let user_id = addressed_user?;
                let guild_id = snowflake_field(data, "guild_id").or(primary_guild)?;
                Some(Self::Subscribe {
                    user_id,
                    topic: Topic::Guild(guild_id),
                })
            }
            _ => None,
        }
    }
}

/// Routes bus envelopes to local connections
pub struct Dispatcher {
    manager: Arc<ConnectionManager>,
}

impl Dispatcher {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Deliver one envelope to every local subscriber of any of its topics
    pub async fn dispatch(&self, envelope: EventEnvelope) -> DispatchReport {
        let event_type = GatewayEventType::from_name(&envelope.event_type);

        if let Some(control) = event_type.filter(|t| t.is_internal()) {
            self.apply_control(control, &envelope).await;
            return DispatchReport::default();
        }

        let implied = event_type.and_then(|t| Implied::of(t, &envelope));
        let report = self.fan_out(envelope);
        if let Some(implied) = implied {
            self.apply_implied(implied);
        }
        report
    }

    fn fan_out(&self, envelope: EventEnvelope) -> DispatchReport {
        let mut report = DispatchReport::default();
        let subscribers = self
            .manager
            .subscriptions()
            .subscribers_of_any(&envelope.topics);

        if subscribers.is_empty() {
            tracing::trace!(
                event_type = %envelope.event_type,
                topics = envelope.topics.len(),
                "No local subscribers"
            );
            return report;
        }

        let exclude_user = envelope.exclude_user;
        let frame = EventFrame::new(Some(envelope.id), envelope.event_type, envelope.data);

        for id in subscribers {
            let Some(connection) = self.manager.registry().get(id) else {
                continue;
            };
            if exclude_user.is_some() && connection.user_id() == exclude_user {
                report.excluded += 1;
                continue;
            }

            match self.manager.push(&connection, Frame::Event(Arc::clone(&frame))) {
                Ok(Enqueued::Queued) => report.delivered += 1,
                Ok(Enqueued::DroppedOldest) => {
                    report.delivered += 1;
                    report.dropped += 1;
                }
                Ok(Enqueued::Discarded) => report.dropped += 1,
                Err(QueueError::SlowConsumer) => report.evicted += 1,
                Err(QueueError::Closed) => {}
            }
        }

        tracing::trace!(
            event_type = %frame.event_type,
            delivered = report.delivered,
            dropped = report.dropped,
            evicted = report.evicted,
            "Event dispatched"
        );
        report
    }

    fn apply_implied(&self, implied: Implied) {
        match implied {
            Implied::Subscribe { user_id, topic } => {
                self.manager.apply_update(user_id, &[topic], &[]);
            }
            Implied::Unsubscribe { user_id, topic } => {
                self.manager.apply_update(user_id, &[], &[topic]);
            }
            Implied::Drop(topic) => {
                self.manager.drop_topic(&topic);
            }
        }
    }

    async fn apply_control(&self, control: GatewayEventType, envelope: &EventEnvelope) {
        let addressed_user = envelope
            .topics
            .iter()
            .find(|t| t.is_user())
            .map(Topic::id);

        match control {
            GatewayEventType::SubscriptionUpdate => {
                match serde_json::from_value::<SubscriptionUpdateEvent>(envelope.data.clone()) {
                    Ok(update) => {
                        let user_id = if update.user_id.is_zero() {
                            addressed_user.unwrap_or(update.user_id)
                        } else {
                            update.user_id
                        };
                        self.manager
                            .apply_update(user_id, &update.subscribe, &update.unsubscribe);
                    }
                    Err(e) => {
                        tracing::warn!(envelope_id = %envelope.id, error = %e, "Bad SUBSCRIPTION_UPDATE payload");
                    }
                }
            }
            GatewayEventType::SubscriptionResync => {
                let user_id = serde_json::from_value::<SubscriptionResyncEvent>(envelope.data.clone())
                    .ok()
                    .map(|resync| resync.user_id)
                    .or(addressed_user);
                match user_id {
                    Some(user_id) => {
                        let resynced = self.manager.request_resync(user_id).await;
                        tracing::debug!(user_id = %user_id, resynced, "Resync requested");
                    }
                    None => {
                        tracing::warn!(envelope_id = %envelope.id, "SUBSCRIPTION_RESYNC without a user");
                    }
                }
            }
            _ => {}
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}
