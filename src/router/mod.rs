//! # Topic Router
//!
//! Owns the broker-facing bookkeeping of one generation:
//!
//! - **Bindings**: topic → (device id → handler key). A `(topic, device)` pair is
//!   bound at most once; repeated entity updates re-announcing the same command
//!   topics are reported as [`Subscription::AlreadyBound`].
//! - **Published set**: entity topics whose retained metadata has already been
//!   published. Metadata goes out once per topic per generation, state values
//!   go out on every update.
//!
//! The router never calls into devices. Inbound dispatch resolves a topic into
//! [`Route`]s and the connector hands those to the device supervisor.

pub mod topics;

pub use topics::{TopicKind, TopicLayout};

use crate::device::entity::state_payload;
use crate::device::{DeviceLabel, Entity};
use crate::document::DeviceId;
use crate::mqtt::broker::Broker;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, error, info, warn};

/// Result of a subscribe request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subscription {
    Bound,
    AlreadyBound,
}

/// A handler resolved for an inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub device: DeviceId,
    pub key: String,
    pub state: String,
    pub value: String,
}

#[derive(Debug, Default)]
pub struct TopicRouter {
    layout: TopicLayout,
    bindings: BTreeMap<String, BTreeMap<DeviceId, String>>,
    published: HashSet<String>,
}

impl TopicRouter {
    pub fn new(layout: TopicLayout) -> Self {
        Self {
            layout,
            bindings: BTreeMap::new(),
            published: HashSet::new(),
        }
    }

    pub fn layout(&self) -> &TopicLayout {
        &self.layout
    }

    /// Publishes an entity update of `device`.
    ///
    /// Broker failures are logged per topic; a metadata publication that
    /// failed is retried on the next update.
    pub async fn publish(
        &mut self,
        broker: &dyn Broker,
        device: &DeviceLabel,
        entity: &Entity,
        support: Option<&Value>,
    ) {
        let topic = self.layout.entity_topic(&device.id, entity);

        if !self.published.contains(&topic) {
            match entity.metadata_payload(support) {
                Ok(payload) => match broker.publish(&topic, payload, true).await {
                    Ok(()) => {
                        info!(
                            device = %device.name,
                            "📣  published entity \"{}\" to topic \"{}\"",
                            entity.name,
                            topic
                        );
                        self.published.insert(topic.clone());
                    }
                    Err(e) => warn!(device = %device.name, "Failed to publish entity to {}: {}", topic, e),
                },
                Err(e) => error!(device = %device.name, "Failed to serialize entity \"{}\": {}", entity.name, e),
            }
        }

        if let Some(states) = &entity.states {
            for (state, value) in states {
                let state_topic = format!("{}/{}", topic, state);
                if let Err(e) = broker
                    .publish(&state_topic, state_payload(value).into_bytes(), true)
                    .await
                {
                    warn!(device = %device.name, "Failed to publish state to {}: {}", state_topic, e);
                }
            }
        }

        if let Some(commands) = &entity.commands {
            for command in commands {
                let command_topic = format!("{}/{}", topic, command);
                self.subscribe(broker, &command_topic, device, entity.topic_key())
                    .await;
            }
        }
    }

    /// Binds `topic` to `device` with handler `key`.
    ///
    /// The binding is tracked even if the broker subscribe fails, so the next
    /// re-subscription after a reconnect picks it up.
    pub async fn subscribe(
        &mut self,
        broker: &dyn Broker,
        topic: &str,
        device: &DeviceLabel,
        key: &str,
    ) -> Subscription {
        let handlers = self.bindings.entry(topic.to_string()).or_default();
        if handlers.contains_key(&device.id) {
            debug!(device = %device.name, "Already subscribed to topic \"{}\"", topic);
            return Subscription::AlreadyBound;
        }
        handlers.insert(device.id.clone(), key.to_string());

        match broker.subscribe(topic).await {
            Ok(()) => info!(device = %device.name, "📡  subscribed to topic \"{}\"", topic),
            Err(e) => warn!(device = %device.name, "Failed to subscribe to {}: {}", topic, e),
        }

        Subscription::Bound
    }

    /// Resolves every handler bound to an inbound device topic. Config topics,
    /// foreign topics and unbound topics resolve to nothing.
    pub fn route(&self, topic: &str, payload: &[u8]) -> Vec<Route> {
        if self.layout.classify(topic) != TopicKind::Device {
            return Vec::new();
        }
        let Some(handlers) = self.bindings.get(topic) else {
            return Vec::new();
        };

        let state = topics::last_segment(topic);
        let value = String::from_utf8_lossy(payload);
        handlers
            .iter()
            .map(|(device, key)| Route {
                device: device.clone(),
                key: key.clone(),
                state: state.to_string(),
                value: value.to_string(),
            })
            .collect()
    }

    /// Unsubscribes every tracked topic in one batch and forgets all bindings
    /// and published topics. Returns the number of topics released.
    pub async fn clear(&mut self, broker: &dyn Broker) -> usize {
        let topics: Vec<String> = std::mem::take(&mut self.bindings).into_keys().collect();
        self.published.clear();

        if !topics.is_empty() {
            match broker.unsubscribe(&topics).await {
                Ok(()) => debug!("Unsubscribed {} topics", topics.len()),
                Err(e) => warn!("Failed to unsubscribe {} topics: {}", topics.len(), e),
            }
        }

        topics.len()
    }

    /// Re-issues the broker subscribe for every tracked topic
    pub async fn resubscribe_all(&self, broker: &dyn Broker) {
        for topic in self.bindings.keys() {
            if let Err(e) = broker.subscribe(topic).await {
                warn!("Failed to re-subscribe to {}: {}", topic, e);
            }
        }
        if !self.bindings.is_empty() {
            info!("Re-subscribed to {} device topics", self.bindings.len());
        }
    }

    pub fn topics(&self) -> impl Iterator<Item = &String> {
        self.bindings.keys()
    }

    pub fn handler_count(&self, topic: &str) -> usize {
        self.bindings.get(topic).map_or(0, BTreeMap::len)
    }

    pub fn is_published(&self, topic: &str) -> bool {
        self.published.contains(topic)
    }
}
