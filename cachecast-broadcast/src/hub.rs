//! Fan-out of events to registered subscribers.

use crate::error::{BroadcastError, BroadcastResult};
use crate::event::Event;
use crate::subscriber::{ChannelSubscriber, Subscriber, SubscriberId, SubscriberStream};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Outbound queue size for subscribers created by [`BroadcastHub::subscribe`]
    pub queue_capacity: usize,
    /// Send a `connection` event to each subscriber as it registers
    pub greet_on_register: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            greet_on_register: false,
        }
    }
}

impl HubConfig {
    /// Set the outbound queue size.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Enable or disable the registration greeting.
    pub fn with_greeting(mut self, enabled: bool) -> Self {
        self.greet_on_register = enabled;
        self
    }
}

/// Anything that accepts events for delivery.
///
/// Implemented by [`BroadcastHub`]; the cache coordinator only depends on
/// this trait so it can be wired to any sink.
pub trait EventPublisher: Send + Sync {
    /// Publish an event. Returns how many subscribers accepted it.
    fn publish(&self, event: &Event) -> BroadcastResult<usize>;
}

/// Registry of live subscribers.
///
/// All membership changes go through one lock. Fan-out snapshots the live set
/// and delivers outside the lock, so one slow subscriber never holds up the
/// registry or the others.
pub struct BroadcastHub {
    subscribers: RwLock<HashMap<SubscriberId, Arc<dyn Subscriber>>>,
    config: HubConfig,
}

impl BroadcastHub {
    /// Create a hub with default configuration.
    pub fn new() -> Self {
        Self::with_config(HubConfig::default())
    }

    /// Create a hub with custom configuration.
    pub fn with_config(config: HubConfig) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Get the hub configuration.
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Create a channel-backed subscriber, register it, and hand back its stream.
    pub fn subscribe(&self) -> (SubscriberId, SubscriberStream) {
        let (subscriber, stream) = ChannelSubscriber::channel(self.config.queue_capacity);
        let id = self.register(Arc::new(subscriber));
        (id, stream)
    }

    /// Register a subscriber under a freshly generated id.
    pub fn register(&self, subscriber: Arc<dyn Subscriber>) -> SubscriberId {
        self.register_with(|| uuid::Uuid::new_v4().to_string(), subscriber)
    }

    /// Register under the first id from `next_id` that is not already taken.
    fn register_with<F>(&self, mut next_id: F, subscriber: Arc<dyn Subscriber>) -> SubscriberId
    where
        F: FnMut() -> SubscriberId,
    {
        loop {
            let id = next_id();
            match self.register_as(id.clone(), Arc::clone(&subscriber)) {
                Ok(()) => return id,
                Err(e) => debug!(error = %e, "Generated subscriber id in use, retrying"),
            }
        }
    }

    /// Register a subscriber under a caller-chosen id.
    pub fn register_as(
        &self,
        id: impl Into<SubscriberId>,
        subscriber: Arc<dyn Subscriber>,
    ) -> BroadcastResult<()> {
        let id = id.into();
        let count = {
            let mut subscribers = self.subscribers.write();
            if subscribers.contains_key(&id) {
                return Err(BroadcastError::AlreadyRegistered(id));
            }

            if self.config.greet_on_register {
                // Greet before the subscriber becomes visible so it always arrives first.
                if let Ok(payload) = Event::connection(&id).to_bytes() {
                    subscriber.try_send(payload);
                }
            }

            subscribers.insert(id.clone(), subscriber);
            subscribers.len()
        };

        info!(subscriber_id = %id, total = count, "Subscriber registered");
        Ok(())
    }

    /// Remove a subscriber and close it.
    ///
    /// # Errors
    ///
    /// `NotRegistered` if no subscriber with `id` is in the live set, including
    /// one the hub already dropped for falling behind.
    pub fn unregister(&self, id: &str) -> BroadcastResult<()> {
        let removed = self.subscribers.write().remove(id);
        match removed {
            Some(subscriber) => {
                subscriber.close();
                info!(subscriber_id = %id, "Subscriber unregistered");
                Ok(())
            }
            None => Err(BroadcastError::NotRegistered(id.to_string())),
        }
    }

    /// Deliver an event to every live subscriber.
    ///
    /// Subscribers whose queue is full or closed are dropped. Returns the
    /// number of subscribers that accepted the event.
    pub fn broadcast(&self, event: &Event) -> BroadcastResult<usize> {
        let payload = event.to_bytes()?;
        let delivered = self.broadcast_bytes(payload);
        debug!(event_type = %event.event_type, delivered, "Broadcast event");
        Ok(delivered)
    }

    /// Deliver an already encoded envelope to every live subscriber.
    pub fn broadcast_bytes(&self, payload: Bytes) -> usize {
        let snapshot: Vec<(SubscriberId, Arc<dyn Subscriber>)> = self
            .subscribers
            .read()
            .iter()
            .map(|(id, subscriber)| (id.clone(), Arc::clone(subscriber)))
            .collect();

        let mut delivered = 0;
        let mut rejected = Vec::new();
        for (id, subscriber) in snapshot {
            if subscriber.try_send(payload.clone()).is_accepted() {
                delivered += 1;
            } else {
                rejected.push((id, subscriber));
            }
        }

        if !rejected.is_empty() {
            self.drop_subscribers(rejected);
        }

        delivered
    }

    fn drop_subscribers(&self, rejected: Vec<(SubscriberId, Arc<dyn Subscriber>)>) {
        {
            let mut subscribers = self.subscribers.write();
            for (id, subscriber) in &rejected {
                // The id may have been unregistered and reused while we were delivering.
                let same = subscribers
                    .get(id)
                    .is_some_and(|current| Arc::ptr_eq(current, subscriber));
                if same {
                    subscribers.remove(id);
                }
            }
        }

        for (id, subscriber) in rejected {
            subscriber.close();
            warn!(subscriber_id = %id, "Dropped subscriber that could not keep up");
        }
    }

    /// Check if a subscriber is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.subscribers.read().contains_key(id)
    }

    /// Get all registered subscriber ids.
    pub fn subscriber_ids(&self) -> Vec<SubscriberId> {
        self.subscribers.read().keys().cloned().collect()
    }

    /// Get the number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Unregister and close every subscriber.
    pub fn close_all(&self) {
        let drained: Vec<_> = self.subscribers.write().drain().collect();
        if drained.is_empty() {
            return;
        }

        let count = drained.len();
        for (_, subscriber) in drained {
            subscriber.close();
        }
        info!(count, "Closed all subscribers");
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BroadcastHub {
    fn drop(&mut self) {
        self.close_all();
    }
}

impl EventPublisher for BroadcastHub {
    fn publish(&self, event: &Event) -> BroadcastResult<usize> {
        self.broadcast(event)
    }
}

impl<P: EventPublisher + ?Sized> EventPublisher for Arc<P> {
    fn publish(&self, event: &Event) -> BroadcastResult<usize> {
        (**self).publish(event)
    }
}
