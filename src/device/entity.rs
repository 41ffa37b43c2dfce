use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A named, independently addressable unit of device state.
///
/// Drivers emit entities through [`super::DeviceEvents::entity_update`]. The
/// router publishes the entity itself once per generation as retained metadata,
/// every entry of `states` on each update, and subscribes every entry of
/// `commands` as a command topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,

    /// Topic segment; falls back to `name` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// Sub-state name → current value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub states: Option<Map<String, Value>>,

    /// Command names accepted by this entity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commands: Option<Vec<String>>,

    /// Driver specific metadata published along with the entity
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Entity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: None,
            states: None,
            commands: None,
            extra: Map::new(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_state(mut self, state: impl Into<String>, value: Value) -> Self {
        self.states
            .get_or_insert_with(Map::new)
            .insert(state.into(), value);
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.commands.get_or_insert_with(Vec::new).push(command.into());
        self
    }

    /// The segment used in this entity's topic
    pub fn topic_key(&self) -> &str {
        self.key.as_deref().unwrap_or(&self.name)
    }

    /// Serialised retained metadata. `support` is embedded unless the entity
    /// already carries a field of that name.
    pub fn metadata_payload(&self, support: Option<&Value>) -> Result<Vec<u8>, serde_json::Error> {
        let mut value = serde_json::to_value(self)?;
        if let (Some(support), Value::Object(fields)) = (support, &mut value) {
            fields
                .entry("support")
                .or_insert_with(|| support.clone());
        }
        serde_json::to_vec(&value)
    }
}

/// Renders a state value the way it is published: strings raw, everything
/// else as JSON text.
pub fn state_payload(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn topic_key_prefers_key_over_name() {
        assert_eq!(Entity::new("Power").topic_key(), "Power");
        assert_eq!(Entity::new("Power").with_key("power").topic_key(), "power");
    }

    #[test]
    fn state_values_render_like_plain_text() {
        assert_eq!(state_payload(&json!("on")), "on");
        assert_eq!(state_payload(&json!(42)), "42");
        assert_eq!(state_payload(&json!(true)), "true");
        assert_eq!(state_payload(&json!(null)), "null");
    }

    #[test]
    fn metadata_embeds_support_without_overriding() {
        let support = json!({"url": "https://example.org"});
        let entity = Entity::new("Power").with_key("power").with_state("value", json!(1));
        let payload: Value =
            serde_json::from_slice(&entity.metadata_payload(Some(&support)).unwrap()).unwrap();
        assert_eq!(payload["support"], support);
        assert_eq!(payload["key"], "power");
        assert_eq!(payload["states"]["value"], 1);

        let mut own = Entity::new("Power");
        own.extra.insert("support".into(), json!("mine"));
        let payload: Value =
            serde_json::from_slice(&own.metadata_payload(Some(&support)).unwrap()).unwrap();
        assert_eq!(payload["support"], "mine");
    }
}
