//! Topic-string construction and classification
//!
//! All topics used by the connector are built here:
//!
//! ```text
//! {base}/{config}                                  inbound config documents
//! {base}/{device}/{id}/{entity}                    retained entity metadata
//! {base}/{device}/{id}/{entity}/{state|command}    retained state / commands
//! ```

use crate::device::Entity;
use crate::document::DeviceId;
use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE: &str = "connector";
pub const DEFAULT_DEVICE: &str = "device";
pub const DEFAULT_CONFIG: &str = "config";

/// Literal namespace segments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicLayout {
    pub base: String,
    pub device: String,
    pub config: String,
}

impl Default for TopicLayout {
    fn default() -> Self {
        Self {
            base: DEFAULT_BASE.to_string(),
            device: DEFAULT_DEVICE.to_string(),
            config: DEFAULT_CONFIG.to_string(),
        }
    }
}

/// What an inbound topic addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    Config,
    Device,
    Foreign,
}

impl TopicLayout {
    pub fn config_topic(&self) -> String {
        format!("{}/{}", self.base, self.config)
    }

    pub fn device_topic(&self, id: &DeviceId) -> String {
        format!("{}/{}/{}", self.base, self.device, id)
    }

    pub fn entity_topic(&self, id: &DeviceId, entity: &Entity) -> String {
        format!("{}/{}", self.device_topic(id), entity.topic_key())
    }

    /// Resolves a topic from a device config's `subscribe` map. Topics inside
    /// the base namespace are taken verbatim; anything else is relative to the
    /// device. Absolute topics that would never be dispatched (outside
    /// `{base}/{device}/`) resolve to `None`.
    pub fn resolve_subscription(&self, id: &DeviceId, topic: &str) -> Option<String> {
        let prefix = format!("{}/", self.base);
        if topic.starts_with(&prefix) {
            (self.classify(topic) == TopicKind::Device).then(|| topic.to_string())
        } else {
            Some(format!("{}/{}", self.device_topic(id), topic.trim_start_matches('/')))
        }
    }

    pub fn classify(&self, topic: &str) -> TopicKind {
        let mut parts = topic.split('/');
        if parts.next() != Some(self.base.as_str()) {
            return TopicKind::Foreign;
        }
        match parts.next() {
            Some(segment) if segment == self.config => TopicKind::Config,
            Some(segment) if segment == self.device => TopicKind::Device,
            _ => TopicKind::Foreign,
        }
    }
}

/// Last segment of a topic, handed to handlers as the state suffix
pub fn last_segment(topic: &str) -> &str {
    topic.rsplit('/').next().unwrap_or(topic)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_topic_uses_key() {
        let layout = TopicLayout::default();
        let entity = Entity::new("Power").with_key("power");
        assert_eq!(
            layout.entity_topic(&DeviceId::from(3u32), &entity),
            "connector/device/3/power"
        );
    }

    #[test]
    fn subscriptions_resolve_relative_to_device() {
        let layout = TopicLayout::default();
        let id = DeviceId::from(3u32);
        assert_eq!(
            layout.resolve_subscription(&id, "power/set").as_deref(),
            Some("connector/device/3/power/set")
        );
        assert_eq!(
            layout.resolve_subscription(&id, "connector/device/7/relay").as_deref(),
            Some("connector/device/7/relay")
        );
    }

    #[test]
    fn subscriptions_outside_device_namespace_are_rejected() {
        let layout = TopicLayout::default();
        let id = DeviceId::from(3u32);
        assert_eq!(layout.resolve_subscription(&id, "connector/config"), None);
        assert_eq!(layout.resolve_subscription(&id, "connector/other/3/set"), None);
    }

    #[test]
    fn classify_by_first_two_segments() {
        let layout = TopicLayout::default();
        assert_eq!(layout.classify("connector/config"), TopicKind::Config);
        assert_eq!(layout.classify("connector/device/3/power/set"), TopicKind::Device);
        assert_eq!(layout.classify("connector/other/3"), TopicKind::Foreign);
        assert_eq!(layout.classify("home/device/3"), TopicKind::Foreign);
    }

    #[test]
    fn last_segment_of_topic() {
        assert_eq!(last_segment("connector/device/3/power/set"), "set");
        assert_eq!(last_segment("single"), "single");
    }
}
