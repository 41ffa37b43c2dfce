//! Publish/subscribe seam between the connector core and the transport

use crate::error::BrokerError;
use async_trait::async_trait;
use rumqttc::{AsyncClient, QoS};
use tracing::debug;

/// Outbound broker primitives used by the topic router.
///
/// The connector core never touches `rumqttc` directly; tests substitute an
/// in-memory implementation.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), BrokerError>;

    async fn subscribe(&self, topic: &str) -> Result<(), BrokerError>;

    /// Unsubscribes a batch of topics
    async fn unsubscribe(&self, topics: &[String]) -> Result<(), BrokerError>;
}

/// [`Broker`] backed by a `rumqttc` client. Requests are queued into the
/// client's channel and sent by the event loop in [`super::mqtt_handler`].
#[derive(Clone)]
pub struct MqttBroker {
    client: AsyncClient,
}

impl MqttBroker {
    pub fn new(client: AsyncClient) -> Self {
        Self { client }
    }

    pub async fn disconnect(&self) -> Result<(), BrokerError> {
        self.client.disconnect().await?;
        Ok(())
    }
}

#[async_trait]
impl Broker for MqttBroker {
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), BrokerError> {
        debug!("Publishing {} bytes to {} (retain: {})", payload.len(), topic, retain);
        self.client
            .publish(topic, QoS::AtMostOnce, retain, payload)
            .await?;
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<(), BrokerError> {
        self.client.subscribe(topic, QoS::AtMostOnce).await?;
        Ok(())
    }

    async fn unsubscribe(&self, topics: &[String]) -> Result<(), BrokerError> {
        for topic in topics {
            self.client.unsubscribe(topic.as_str()).await?;
        }
        Ok(())
    }
}
