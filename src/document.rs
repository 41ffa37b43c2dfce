//! Configuration document model
//!
//! A [`ConfigDocument`] arrives either from the settings file at startup or as a
//! JSON payload on the config topic. Each arrival replaces the previous one in
//! full; documents are never merged.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Identity of a device inside one generation.
///
/// Config documents may carry numeric or string ids. Both are normalised to the
/// string form so `3` and `"3"` address the same device and the same topics.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "RawDeviceId", into = "String")]
pub struct DeviceId(String);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDeviceId {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl From<RawDeviceId> for DeviceId {
    fn from(raw: RawDeviceId) -> Self {
        match raw {
            RawDeviceId::Integer(n) => DeviceId(n.to_string()),
            RawDeviceId::Float(f) => DeviceId(f.to_string()),
            RawDeviceId::Text(s) => DeviceId(s),
        }
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> Self {
        id.0
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        DeviceId(s.to_string())
    }
}

impl From<u32> for DeviceId {
    fn from(n: u32) -> Self {
        DeviceId(n.to_string())
    }
}

impl DeviceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One device entry of a configuration document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Driver class name, resolved through the device registry
    pub class: String,

    pub id: DeviceId,

    /// Transport-specific connection descriptor, only interpreted by the driver
    #[serde(default)]
    pub connection: Value,

    /// Handler key → topic. Relative topics live under the device namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscribe: Option<BTreeMap<String, String>>,

    /// Every remaining field, passed verbatim to the driver factory
    #[serde(flatten)]
    pub settings: Map<String, Value>,
}

impl DeviceConfig {
    pub fn new(class: impl Into<String>, id: impl Into<DeviceId>) -> Self {
        Self {
            class: class.into(),
            id: id.into(),
            connection: Value::Null,
            subscribe: None,
            settings: Map::new(),
        }
    }

    pub fn with_subscription(mut self, key: impl Into<String>, topic: impl Into<String>) -> Self {
        self.subscribe
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), topic.into());
        self
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: Value) -> Self {
        self.settings.insert(key.into(), value);
        self
    }

    /// Reads a string field from the driver settings
    pub fn setting_str(&self, key: &str) -> Option<&str> {
        self.settings.get(key).and_then(Value::as_str)
    }
}

/// A complete device configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigDocument {
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,

    /// Opaque payload forwarded to every entity publication of the generation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub support: Option<Value>,
}

impl ConfigDocument {
    pub fn from_slice(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    /// Distinct driver classes in document order
    pub fn classes(&self) -> Vec<&str> {
        let mut classes: Vec<&str> = Vec::new();
        for device in &self.devices {
            if !classes.contains(&device.class.as_str()) {
                classes.push(&device.class);
            }
        }
        classes
    }
}
