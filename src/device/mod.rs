//! # Device contract
//!
//! Drivers implement [`Device`]. The connector core only ever talks to the
//! trait: it constructs a device through a registry factory, attaches a
//! [`DeviceEvents`] sink, awaits `connect()`, and later routes command messages
//! into `handle()`.
//!
//! ```text
//! DeviceRegistry ──factory──► Box<dyn Device> ──connect()──► DeviceSupervisor
//!                                   │
//!                         DeviceEvents (entity updates, log lines)
//!                                   ▼
//!                            Connector event queue ──► TopicRouter
//! ```

pub mod entity;
pub mod supervisor;

pub use entity::Entity;
pub use supervisor::DeviceSupervisor;

use crate::document::DeviceId;
use crate::error::DeviceError;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Result of a device's `connect()` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected,
    /// Human readable reason reported by the driver
    Failed(String),
}

/// A connected driver instance
#[async_trait]
pub trait Device: Send {
    fn id(&self) -> &DeviceId;

    fn name(&self) -> &str;

    fn manufacturer(&self) -> &str;

    fn model(&self) -> &str;

    /// Registers the entity-update and log-event sink. Called once, before
    /// `connect()`.
    fn attach(&mut self, events: DeviceEvents);

    async fn connect(&mut self) -> ConnectOutcome;

    async fn disconnect(&mut self) -> Result<(), DeviceError>;

    /// Invoked for an inbound command: `key` is the handler key the topic was
    /// bound with, `state` the last topic segment, `value` the raw payload.
    async fn handle(&mut self, key: &str, state: &str, value: &str) -> Result<(), DeviceError>;
}

/// Identity and display name of a device, detached from the instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceLabel {
    pub id: DeviceId,
    pub name: String,
}

impl DeviceLabel {
    pub fn of(device: &dyn Device) -> Self {
        Self {
            id: device.id().clone(),
            name: device.name().to_string(),
        }
    }
}

/// Event emitted by a device towards the connector
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    EntityUpdate {
        generation: u64,
        device: DeviceId,
        entity: Entity,
    },
}

/// Callback sink handed to a device on attach.
///
/// Entity updates are queued for the connector task, which drops them if the
/// generation they were produced in has already been torn down. The queue is
/// bounded; an update that does not fit is dropped with a warning. Log events
/// go straight to the tracing subscriber.
#[derive(Debug, Clone)]
pub struct DeviceEvents {
    generation: u64,
    device: DeviceId,
    name: String,
    tx: mpsc::Sender<DeviceEvent>,
}

impl DeviceEvents {
    pub fn new(
        generation: u64,
        device: DeviceId,
        name: String,
        tx: mpsc::Sender<DeviceEvent>,
    ) -> Self {
        Self {
            generation,
            device,
            name,
            tx,
        }
    }

    pub fn entity_update(&self, entity: Entity) {
        let event = DeviceEvent::EntityUpdate {
            generation: self.generation,
            device: self.device.clone(),
            entity,
        };
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(device = %self.name, "Event queue full, dropping entity update")
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(device = %self.name, "Connector gone, dropping entity update")
            }
        }
    }

    pub fn message(&self, icon: &str, message: &str) {
        info!(device = %self.name, "{}  {}", icon, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_queue_drops_updates_without_blocking() {
        let (tx, mut rx) = mpsc::channel(2);
        let events = DeviceEvents::new(4, DeviceId::from(1u32), "Lamp".to_string(), tx);

        for i in 0..5 {
            events.entity_update(Entity::new(format!("e{}", i)));
        }

        let mut received = Vec::new();
        while let Ok(DeviceEvent::EntityUpdate { entity, generation, .. }) = rx.try_recv() {
            assert_eq!(generation, 4);
            received.push(entity.name);
        }
        assert_eq!(received, vec!["e0", "e1"]);
    }

    #[test]
    fn closed_queue_is_ignored() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let events = DeviceEvents::new(1, DeviceId::from(1u32), "Lamp".to_string(), tx);
        events.entity_update(Entity::new("Power"));
    }
}
