//! Test doubles: an in-memory broker and a scripted device

use crate::device::{ConnectOutcome, Device, DeviceEvents, Entity};
use crate::document::{DeviceConfig, DeviceId};
use crate::error::{BrokerError, DeviceError, RegistryError};
use crate::mqtt::broker::Broker;
use crate::registry::{DeviceFactory, DriverCatalog};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex};

type SharedSink = Arc<Mutex<Option<DeviceEvents>>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerCall {
    Publish {
        topic: String,
        payload: String,
        retain: bool,
    },
    Subscribe(String),
    Unsubscribe(Vec<String>),
}

/// Broker that records every call
#[derive(Default, Clone)]
pub struct MemoryBroker {
    calls: Arc<Mutex<Vec<BrokerCall>>>,
}

impl MemoryBroker {
    pub fn calls(&self) -> Vec<BrokerCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn publications_to(&self, topic: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, BrokerCall::Publish { topic: t, .. } if t == topic))
            .count()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                BrokerCall::Subscribe(topic) => Some(topic),
                _ => None,
            })
            .collect()
    }

    pub fn unsubscriptions(&self) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                BrokerCall::Unsubscribe(topics) => Some(topics),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), BrokerError> {
        self.calls.lock().unwrap().push(BrokerCall::Publish {
            topic: topic.to_string(),
            payload: String::from_utf8_lossy(&payload).into_owned(),
            retain,
        });
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<(), BrokerError> {
        self.calls
            .lock()
            .unwrap()
            .push(BrokerCall::Subscribe(topic.to_string()));
        Ok(())
    }

    async fn unsubscribe(&self, topics: &[String]) -> Result<(), BrokerError> {
        self.calls
            .lock()
            .unwrap()
            .push(BrokerCall::Unsubscribe(topics.to_vec()));
        Ok(())
    }
}

/// Ordered record of device calls, shared between devices of several
/// generations
#[derive(Default, Clone)]
pub struct Journal {
    entries: Arc<Mutex<Vec<String>>>,
    sinks: Arc<Mutex<Vec<(DeviceId, SharedSink)>>>,
}

impl Journal {
    /// Event sink most recently attached to a scripted device with `id`
    pub fn sink(&self, id: impl Into<DeviceId>) -> Option<DeviceEvents> {
        let id = id.into();
        let sinks = self.sinks.lock().unwrap();
        sinks
            .iter()
            .rev()
            .find(|(device, _)| *device == id)
            .and_then(|(_, sink)| sink.lock().unwrap().clone())
    }

    pub fn record(&self, entry: String) {
        self.entries.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries().iter().filter(|e| e.as_str() == entry).count()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }
}

/// Device whose behaviour is set up by the test
pub struct ScriptedDevice {
    id: DeviceId,
    name: String,
    journal: Journal,
    connect_failure: Option<String>,
    hang: bool,
    disconnect_fails: bool,
    entities: Vec<Entity>,
    events: SharedSink,
}

impl ScriptedDevice {
    pub fn new(id: impl Into<DeviceId>, journal: &Journal) -> Self {
        let id = id.into();
        let events: SharedSink = Arc::new(Mutex::new(None));
        journal
            .sinks
            .lock()
            .unwrap()
            .push((id.clone(), events.clone()));
        Self {
            name: format!("Device {}", id),
            id,
            journal: journal.clone(),
            connect_failure: None,
            hang: false,
            disconnect_fails: false,
            entities: Vec::new(),
            events,
        }
    }

    pub fn failing_connect(mut self, reason: &str) -> Self {
        self.connect_failure = Some(reason.to_string());
        self
    }

    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    pub fn failing_disconnect(mut self) -> Self {
        self.disconnect_fails = true;
        self
    }

    /// Entity emitted while connecting
    pub fn with_entity(mut self, entity: Entity) -> Self {
        self.entities.push(entity);
        self
    }

    /// Builds a device from a config entry. Recognised settings: `fail`
    /// (connect failure reason), `hang`, `failDisconnect` and `entities`.
    pub fn from_config(config: &DeviceConfig, journal: &Journal) -> Result<Self, DeviceError> {
        let mut device = Self::new(config.id.clone(), journal);
        if let Some(reason) = config.setting_str("fail") {
            device = device.failing_connect(reason);
        }
        if config.settings.get("hang").and_then(Value::as_bool) == Some(true) {
            device = device.hanging();
        }
        if config.settings.get("failDisconnect").and_then(Value::as_bool) == Some(true) {
            device = device.failing_disconnect();
        }
        if let Some(entities) = config.settings.get("entities") {
            let entities: Vec<Entity> = serde_json::from_value(entities.clone())
                .map_err(|e| DeviceError::InvalidConfig(e.to_string()))?;
            for entity in entities {
                device = device.with_entity(entity);
            }
        }
        Ok(device)
    }
}

/// Catalog with a working `Scripted` class and a `Broken` class whose loader
/// always fails. Loads are recorded in the journal.
pub fn scripted_catalog(journal: &Journal) -> DriverCatalog {
    let scripted = journal.clone();
    let broken = journal.clone();
    DriverCatalog::new()
        .with("Scripted", move || {
            scripted.record("load Scripted".to_string());
            let journal = scripted.clone();
            let factory: DeviceFactory = Arc::new(move |config: &DeviceConfig| -> Result<Box<dyn Device>, DeviceError> {
                let device = ScriptedDevice::from_config(config, &journal)?;
                Ok(Box::new(device) as Box<dyn Device>)
            });
            Ok(factory)
        })
        .with("Broken", move || {
            broken.record("load Broken".to_string());
            Err(RegistryError::DriverLoad {
                class: "Broken".to_string(),
                reason: "missing firmware table".to_string(),
            })
        })
}

#[async_trait]
impl Device for ScriptedDevice {
    fn id(&self) -> &DeviceId {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn manufacturer(&self) -> &str {
        "Acme"
    }

    fn model(&self) -> &str {
        "Scripted"
    }

    fn attach(&mut self, events: DeviceEvents) {
        *self.events.lock().unwrap() = Some(events);
    }

    async fn connect(&mut self) -> ConnectOutcome {
        self.journal.record(format!("connect {}", self.id));
        if self.hang {
            std::future::pending::<()>().await;
        }
        if let Some(reason) = &self.connect_failure {
            return ConnectOutcome::Failed(reason.clone());
        }
        let events = self.events.lock().unwrap().clone();
        if let Some(events) = events {
            for entity in &self.entities {
                events.entity_update(entity.clone());
            }
        }
        ConnectOutcome::Connected
    }

    async fn disconnect(&mut self) -> Result<(), DeviceError> {
        self.journal.record(format!("disconnect {}", self.id));
        if self.disconnect_fails {
            return Err(DeviceError::Io("port already closed".to_string()));
        }
        Ok(())
    }

    async fn handle(&mut self, key: &str, state: &str, value: &str) -> Result<(), DeviceError> {
        self.journal
            .record(format!("handle {} {} {} {}", self.id, key, state, value));
        Ok(())
    }
}
