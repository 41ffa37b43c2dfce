//! # MQTT transport
//!
//! Broker connection adapter of the connector. The transport itself is
//! `rumqttc`; this module only adapts it to the connector's needs:
//!
//! ```text
//! mqtt/
//! ├── broker.rs           - Broker trait (publish/subscribe/unsubscribe) + rumqttc impl
//! ├── config.rs           - Resolved connection parameters
//! ├── message_manager.rs  - Inbound message and event types
//! └── mqtt_handler.rs     - Event loop, connection state, config topic subscription
//! ```
//!
//! Outbound traffic goes through [`broker::MqttBroker`] (a cloneable client
//! handle), inbound traffic flows from [`mqtt_handler::MqttHandler::run`] into
//! the connector as [`message_manager::BrokerEvent`]s over a bounded channel.
//! Everything is QoS 0.

pub mod broker;
pub mod config;
pub mod message_manager;
pub mod mqtt_handler;
