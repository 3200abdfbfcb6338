//! Topic broker.
//!
//! The broker owns two views of membership that must always agree: the
//! registry (topic -> subscribers) and each subscriber's own topic set. Both
//! are only mutated while the registry write lock is held. Broadcast takes the
//! read lock just long enough to snapshot a topic's subscribers and offers the
//! message after releasing it, so the registry lock and a subscriber's inbox
//! lock are never held together.

use crate::inbox::{Delivery, OverflowPolicy, DEFAULT_INBOX_CAPACITY};
use crate::message::{now_nanos, Message};
use crate::subscriber::{Subscriber, SubscriberId};
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, trace};

/// Broker errors.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The secure random source could not produce a subscriber id.
    #[error("Failed to generate subscriber id: {0}")]
    IdGeneration(#[from] rand::Error),
}

/// Broker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Inbox capacity of each subscriber.
    pub inbox_capacity: usize,
    /// What a full inbox drops.
    pub overflow: OverflowPolicy,
    /// Whether to delete topics whose last subscriber left.
    pub prune_empty_topics: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            inbox_capacity: DEFAULT_INBOX_CAPACITY,
            overflow: OverflowPolicy::default(),
            prune_empty_topics: true,
        }
    }
}

/// Tally of one broadcast call.
///
/// Used for metrics only; delivery failures are never errors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Fanout {
    /// Topics that had at least one subscriber.
    pub topics: usize,
    /// Subscribers the message was offered to.
    pub recipients: usize,
    /// Offers that were queued into a free slot.
    pub queued: usize,
    /// Offers that evicted an undelivered message.
    pub replaced: usize,
    /// Offers that were discarded (full inbox or destroyed subscriber).
    pub dropped: usize,
}

impl Fanout {
    fn record(&mut self, delivery: Delivery) {
        self.recipients += 1;
        match delivery {
            Delivery::Queued => self.queued += 1,
            Delivery::Replaced => self.replaced += 1,
            Delivery::DroppedFull | Delivery::DroppedClosed => self.dropped += 1,
        }
    }

    /// Offers that ended up in an inbox.
    #[must_use]
    pub fn delivered(&self) -> usize {
        self.queued + self.replaced
    }
}

type Members = HashMap<SubscriberId, Arc<Subscriber>>;

/// The central topic broker.
///
/// Construct one at startup and share it (`Arc<Broker>`) with every
/// connection task.
#[derive(Debug)]
pub struct Broker {
    /// Topic registry.
    topics: RwLock<HashMap<String, Members>>,
    /// Attached subscribers, for stats.
    subscribers: DashMap<SubscriberId, Arc<Subscriber>>,
    /// Configuration.
    config: BrokerConfig,
}

impl Broker {
    /// Create a new broker with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(BrokerConfig::default())
    }

    /// Create a new broker with custom configuration.
    #[must_use]
    pub fn with_config(config: BrokerConfig) -> Self {
        info!("Creating broker with config: {:?}", config);
        Self {
            topics: RwLock::new(HashMap::new()),
            subscribers: DashMap::new(),
            config,
        }
    }

    /// The broker configuration.
    #[must_use]
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Create a subscriber. It belongs to no topic yet.
    ///
    /// # Errors
    ///
    /// Returns an error if no id could be generated; nothing is registered then.
    pub fn attach(&self) -> Result<Arc<Subscriber>, BrokerError> {
        let id = SubscriberId::generate()?;
        let subscriber = Arc::new(Subscriber::new(
            id.clone(),
            self.config.inbox_capacity,
            self.config.overflow,
        ));
        self.subscribers.insert(id, Arc::clone(&subscriber));

        debug!(subscriber = %subscriber.id(), "Attached");
        Ok(subscriber)
    }

    /// Destroy a subscriber and remove it from every topic.
    ///
    /// Idempotent. Returns `true` for the call that destroyed the subscriber.
    pub fn detach(&self, subscriber: &Subscriber) -> bool {
        // Destroy before taking the lock: a concurrent subscribe that wins the
        // lock afterwards sees the flag and backs off.
        let destroyed = subscriber.destroy();

        let left = {
            let mut registry = self.topics.write();
            let topics = subscriber.take_topics();
            for topic in &topics {
                self.remove_member(&mut registry, subscriber.id(), topic);
            }
            topics.len()
        };
        self.subscribers.remove(subscriber.id());

        if destroyed {
            debug!(subscriber = %subscriber.id(), topics = left, "Detached");
        }
        destroyed
    }

    /// Subscribe to topics. Already joined topics are skipped.
    ///
    /// Returns the number of newly joined topics. A destroyed subscriber
    /// joins nothing.
    pub fn subscribe<I>(&self, subscriber: &Arc<Subscriber>, topics: I) -> usize
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut registry = self.topics.write();
        if subscriber.is_destroyed() {
            debug!(subscriber = %subscriber.id(), "Ignoring subscribe for destroyed subscriber");
            return 0;
        }

        let mut joined = 0;
        for topic in topics {
            let topic = topic.as_ref();
            let members = registry.entry(topic.to_string()).or_insert_with(|| {
                debug!(topic = %topic, "Creating new topic");
                HashMap::new()
            });
            members.insert(subscriber.id().clone(), Arc::clone(subscriber));

            if subscriber.join_topic(topic) {
                joined += 1;
                debug!(
                    topic = %topic,
                    subscriber = %subscriber.id(),
                    subscribers = members.len(),
                    "Subscribed"
                );
            }
        }
        joined
    }

    /// Unsubscribe from topics. Topics never joined are skipped.
    ///
    /// Returns the number of topics left.
    pub fn unsubscribe<I>(&self, subscriber: &Subscriber, topics: I) -> usize
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut registry = self.topics.write();

        let mut left = 0;
        for topic in topics {
            let topic = topic.as_ref();
            let was_member = subscriber.leave_topic(topic);
            let removed = self.remove_member(&mut registry, subscriber.id(), topic);
            if was_member || removed {
                left += 1;
                debug!(topic = %topic, subscriber = %subscriber.id(), "Unsubscribed");
            }
        }
        left
    }

    fn remove_member(
        &self,
        registry: &mut HashMap<String, Members>,
        id: &SubscriberId,
        topic: &str,
    ) -> bool {
        let Some(members) = registry.get_mut(topic) else {
            return false;
        };
        let removed = members.remove(id).is_some();

        if self.config.prune_empty_topics && members.is_empty() {
            registry.remove(topic);
            debug!(topic = %topic, "Deleted empty topic");
        }
        removed
    }

    /// Offer a payload to every subscriber of the given topics.
    ///
    /// One message is built per topic and shared by its recipients. Each
    /// offer is a single non-blocking attempt; unknown topics have no
    /// recipients and leave no trace in the registry.
    pub fn broadcast<I>(&self, payload: impl Into<Bytes>, topics: I) -> Fanout
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let payload = payload.into();
        let created_at = now_nanos();
        let mut fanout = Fanout::default();

        for topic in topics {
            let topic = topic.as_ref();
            let recipients: Vec<Arc<Subscriber>> = {
                let registry = self.topics.read();
                match registry.get(topic) {
                    Some(members) if !members.is_empty() => members.values().cloned().collect(),
                    _ => continue,
                }
            };

            let message = Arc::new(Message::with_timestamp(topic, payload.clone(), created_at));
            for subscriber in &recipients {
                fanout.record(subscriber.signal(Arc::clone(&message)));
            }
            fanout.topics += 1;

            trace!(
                topic = %topic,
                recipients = recipients.len(),
                bytes = payload.len(),
                "Broadcast"
            );
        }
        fanout
    }

    /// Current number of subscribers of a topic, 0 if unknown.
    ///
    /// May be stale as soon as it returns; use it for metrics only.
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.read().get(topic).map(HashMap::len).unwrap_or(0)
    }

    /// Check if a topic is registered.
    #[must_use]
    pub fn topic_exists(&self, topic: &str) -> bool {
        self.topics.read().contains_key(topic)
    }

    /// Get all topic names, sorted.
    #[must_use]
    pub fn topic_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.topics.read().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Get broker statistics.
    #[must_use]
    pub fn stats(&self) -> BrokerStats {
        let registry = self.topics.read();
        BrokerStats {
            topic_count: registry.len(),
            subscriber_count: self.subscribers.len(),
            total_subscriptions: registry.values().map(HashMap::len).sum(),
        }
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

/// Broker statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BrokerStats {
    /// Number of registered topics.
    pub topic_count: usize,
    /// Number of attached subscribers.
    pub subscriber_count: usize,
    /// Total number of (topic, subscriber) memberships.
    pub total_subscriptions: usize,
}
