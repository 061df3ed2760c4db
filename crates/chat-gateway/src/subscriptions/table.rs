//! Topic subscription table
//!
//! Many-to-many relation between connections and topics, held in memory for
//! this process only. Both directions live in `DashMap`s so fanout on one
//! topic never waits on unrelated topics.
//!
//! Lock order: an inverse (connection) entry may be held while touching a
//! topic entry, never the other way round.

use std::collections::HashSet;

use chat_core::Topic;
use dashmap::DashMap;

use crate::connection::ConnectionId;

/// Changes applied by [`SubscriptionTable::resync_membership`]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SubscriptionDiff {
    pub added: Vec<Topic>,
    pub removed: Vec<Topic>,
}

impl SubscriptionDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct SubscriptionTable {
    topics: DashMap<Topic, HashSet<ConnectionId>>,
    by_connection: DashMap<ConnectionId, HashSet<Topic>>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `id` eligible for subscriptions. Returns false if already attached.
    pub fn attach(&self, id: ConnectionId) -> bool {
        let mut created = false;
        self.by_connection.entry(id).or_insert_with(|| {
            created = true;
            HashSet::new()
        });
        created
    }

    /// Remove every subscription of `id`; later subscribes for it are no-ops
    pub fn detach(&self, id: ConnectionId) -> Vec<Topic> {
        let Some((_, topics)) = self.by_connection.remove(&id) else {
            return Vec::new();
        };
        for topic in &topics {
            self.remove_subscriber(topic, id);
        }
        topics.into_iter().collect()
    }

    /// Idempotent. Returns true if the subscription is new.
    pub fn subscribe(&self, id: ConnectionId, topic: Topic) -> bool {
        let Some(mut own) = self.by_connection.get_mut(&id) else {
            return false;
        };
        if !own.insert(topic) {
            return false;
        }
        self.topics.entry(topic).or_default().insert(id);
        true
    }

    /// Idempotent. Returns true if a subscription was removed.
    pub fn unsubscribe(&self, id: ConnectionId, topic: &Topic) -> bool {
        let Some(mut own) = self.by_connection.get_mut(&id) else {
            return false;
        };
        if !own.remove(topic) {
            return false;
        }
        self.remove_subscriber(topic, id);
        true
    }

    fn remove_subscriber(&self, topic: &Topic, id: ConnectionId) {
        let now_empty = match self.topics.get_mut(topic) {
            Some(mut subscribers) => {
                subscribers.remove(&id);
                subscribers.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.topics.remove_if(topic, |_, subscribers| subscribers.is_empty());
        }
    }

    /// Current subscribers of one topic (copied, no lock held)
    pub fn subscribers_of(&self, topic: &Topic) -> Vec<ConnectionId> {
        self.topics
            .get(topic)
            .map(|subscribers| subscribers.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Union of subscribers across `topics`, each connection once
    pub fn subscribers_of_any(&self, topics: &[Topic]) -> HashSet<ConnectionId> {
        let mut out = HashSet::new();
        for topic in topics {
            if let Some(subscribers) = self.topics.get(topic) {
                out.extend(subscribers.iter().copied());
            }
        }
        out
    }

    pub fn topics_of(&self, id: ConnectionId) -> Option<HashSet<Topic>> {
        self.by_connection.get(&id).map(|topics| topics.clone())
    }

    pub fn is_subscribed(&self, id: ConnectionId, topic: &Topic) -> bool {
        self.by_connection
            .get(&id)
            .is_some_and(|topics| topics.contains(topic))
    }

    /// Bring `id`'s subscriptions in line with `wanted`, touching only the
    /// difference. `None` if the connection is not attached.
    pub fn resync_membership(
        &self,
        id: ConnectionId,
        wanted: &HashSet<Topic>,
    ) -> Option<SubscriptionDiff> {
        let mut own = self.by_connection.get_mut(&id)?;

        let removed: Vec<Topic> = own.difference(wanted).copied().collect();
        let added: Vec<Topic> = wanted.difference(&own).copied().collect();

        for topic in &removed {
            own.remove(topic);
            self.remove_subscriber(topic, id);
        }
        for topic in &added {
            own.insert(*topic);
            self.topics.entry(*topic).or_default().insert(id);
        }

        Some(SubscriptionDiff { added, removed })
    }

    /// Remove a topic entirely (guild or channel deleted). Returns the
    /// connections that were subscribed.
    pub fn drop_topic(&self, topic: &Topic) -> Vec<ConnectionId> {
        let Some((_, subscribers)) = self.topics.remove(topic) else {
            return Vec::new();
        };
        for id in &subscribers {
            if let Some(mut own) = self.by_connection.get_mut(id) {
                own.remove(topic);
            }
        }
        subscribers.into_iter().collect()
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    pub fn connection_count(&self) -> usize {
        self.by_connection.len()
    }
}
