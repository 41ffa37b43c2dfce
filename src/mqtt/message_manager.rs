use chrono::NaiveDateTime;
use std::fmt;

/// Inbound MQTT message as handed to the connector
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MQTTMessage {
    topic: String,
    content: String,
    timestamp: NaiveDateTime,
}

impl fmt::Display for MQTTMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let preview: String = self.content.chars().take(40).collect();
        let ellipsis = if self.content.chars().count() > 40 { "…" } else { "" };
        write!(f, "{} - {}: {}{}", self.timestamp, self.topic, preview, ellipsis)
    }
}

impl MQTTMessage {
    pub fn from_topic(topic: String, content: String) -> Self {
        MQTTMessage {
            topic,
            content,
            timestamp: chrono::Local::now().naive_local(),
        }
    }

    /// Builds a message from a raw publish payload; invalid UTF-8 is replaced
    pub fn from_payload(topic: String, payload: &[u8]) -> Self {
        Self::from_topic(topic, String::from_utf8_lossy(payload).into_owned())
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

/// What the MQTT event loop reports to the connector
#[derive(Debug, Clone)]
pub enum BrokerEvent {
    /// ConnAck received; `reconnect` is set for every connection after the first
    Connected { reconnect: bool },
    Message(MQTTMessage),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_truncates_long_payloads() {
        let message = MQTTMessage::from_topic("connector/config".into(), "x".repeat(100));
        let rendered = message.to_string();
        assert!(rendered.contains("connector/config"));
        assert!(rendered.ends_with('…'));

        let short = MQTTMessage::from_topic("t".into(), "42".into());
        assert!(short.to_string().ends_with(": 42"));
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let message = MQTTMessage::from_payload("t".into(), &[0x34, 0xff, 0x32]);
        assert_eq!(message.content(), "4\u{fffd}2");
    }
}
