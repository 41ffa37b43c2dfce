//! Loopback driver
//!
//! A virtual device whose entities are declared in its config entry. Commands
//! are written back into the entity state and re-published, which makes it
//! useful for wiring up dashboards before real hardware is attached.
//!
//! ```json
//! {
//!   "class": "Loopback",
//!   "id": 1,
//!   "name": "Desk lamp",
//!   "connection": { "type": "virtual" },
//!   "entities": [
//!     { "name": "Power", "key": "power", "states": { "value": false }, "commands": ["set"] }
//!   ]
//! }
//! ```
//!
//! A command on `.../power/set` stores its payload under the `value` state;
//! any other command suffix is stored under its own name. Keys bound through
//! the `subscribe` map (`{"setPower": "power/set"}`) address the entity named
//! by the segment before the command. Setting `connection.fail` makes
//! `connect()` fail with that text.

use crate::device::{ConnectOutcome, Device, DeviceEvents, Entity};
use crate::document::{DeviceConfig, DeviceId};
use crate::error::DeviceError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

pub const CLASS: &str = "Loopback";

pub struct LoopbackDevice {
    id: DeviceId,
    name: String,
    manufacturer: String,
    model: String,
    failure: Option<String>,
    entities: Vec<Entity>,
    /// `subscribe` map key → entity topic key
    aliases: BTreeMap<String, String>,
    events: Option<DeviceEvents>,
    connected: bool,
}

impl LoopbackDevice {
    pub fn from_config(config: &DeviceConfig) -> Result<Self, DeviceError> {
        let entities = match config.settings.get("entities") {
            Some(entities) => serde_json::from_value(entities.clone())
                .map_err(|e| DeviceError::InvalidConfig(format!("entities: {}", e)))?,
            None => Vec::new(),
        };

        Ok(Self {
            id: config.id.clone(),
            name: config
                .setting_str("name")
                .map_or_else(|| format!("{} {}", CLASS, config.id), str::to_string),
            manufacturer: config.setting_str("manufacturer").unwrap_or("Virtual").to_string(),
            model: config.setting_str("model").unwrap_or(CLASS).to_string(),
            failure: config
                .connection
                .get("fail")
                .and_then(Value::as_str)
                .map(str::to_string),
            entities,
            aliases: config
                .subscribe
                .iter()
                .flatten()
                .map(|(key, topic)| (key.clone(), Self::entity_of(topic).to_string()))
                .collect(),
            events: None,
            connected: false,
        })
    }

    /// Entity segment of a command topic: the one before the command, or the
    /// whole topic when it has a single segment
    fn entity_of(topic: &str) -> &str {
        let mut segments = topic.trim_end_matches('/').rsplit('/');
        let last = segments.next().unwrap_or(topic);
        segments.next().unwrap_or(last)
    }

    fn state_name(command: &str) -> &str {
        if command == "set" {
            "value"
        } else {
            command
        }
    }

    fn emit(&self, entity: &Entity) {
        if let Some(events) = &self.events {
            events.entity_update(entity.clone());
        }
    }
}

#[async_trait]
impl Device for LoopbackDevice {
    fn id(&self) -> &DeviceId {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn manufacturer(&self) -> &str {
        &self.manufacturer
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn attach(&mut self, events: DeviceEvents) {
        self.events = Some(events);
    }

    async fn connect(&mut self) -> ConnectOutcome {
        if let Some(reason) = &self.failure {
            return ConnectOutcome::Failed(reason.clone());
        }
        self.connected = true;

        for entity in &self.entities {
            self.emit(entity);
        }
        if let Some(events) = &self.events {
            events.message("🔁", &format!("loopback ready with {} entities", self.entities.len()));
        }
        ConnectOutcome::Connected
    }

    async fn disconnect(&mut self) -> Result<(), DeviceError> {
        debug!(device = %self.name, "Loopback disconnected");
        self.connected = false;
        Ok(())
    }

    async fn handle(&mut self, key: &str, state: &str, value: &str) -> Result<(), DeviceError> {
        if !self.connected {
            return Err(DeviceError::Io("not connected".to_string()));
        }

        let entity_key = self.aliases.get(key).map_or(key, String::as_str);
        let Some(index) = self.entities.iter().position(|e| e.topic_key() == entity_key) else {
            return Err(DeviceError::UnknownCommand(key.to_string()));
        };

        let parsed = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        let state_name = Self::state_name(state).to_string();
        self.entities[index]
            .states
            .get_or_insert_with(Default::default)
            .insert(state_name.clone(), parsed);

        let entity = self.entities[index].clone();
        self.emit(&entity);
        if let Some(events) = &self.events {
            events.message("🔁", &format!("{}/{} = {}", entity_key, state_name, value));
        }
        Ok(())
    }
}
