use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::broker::MqttBroker;
use super::config::MqttConfig;
use super::message_manager::{BrokerEvent, MQTTMessage};

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Clone, Debug, Default)]
pub struct MQTTStatus {
    pub connection_state: ConnectionState,
    pub connections: usize,
    pub config_subscriptions: usize,
    pub error_messages: Vec<String>,
    pub messages_received: usize,
    pub last_activity: Option<chrono::DateTime<chrono::Local>>,
}

impl MQTTStatus {
    const MAX_ERRORS: usize = 20;

    fn record_error(&mut self, error: String) {
        if self.error_messages.len() == Self::MAX_ERRORS {
            self.error_messages.remove(0);
        }
        self.error_messages.push(error);
    }
}

/// What the event loop does with one notification
#[derive(Debug)]
pub enum Step {
    Continue,
    Forward(BrokerEvent),
    /// Our own DISCONNECT has been written; nothing is left to flush
    Disconnected,
}

/// Owns the `rumqttc` event loop.
///
/// Every ConnAck (re)subscribes the config topic and is reported to the
/// connector; every inbound publish is forwarded as a [`BrokerEvent`].
/// Transport errors are logged and polling resumes after the reconnect delay,
/// which lets `rumqttc` reconnect.
///
/// The loop keeps polling after the connector has stopped listening so that
/// the unsubscribes and the DISCONNECT queued during shutdown reach the
/// broker. It ends once the DISCONNECT is out or `shutdown` fires.
pub struct MqttHandler {
    status_tx: watch::Sender<MQTTStatus>,
    client: AsyncClient,
    connection: EventLoop,
    config: MqttConfig,
    config_topic: String,
}

impl MqttHandler {
    /// Creates the handler and the broker handle used by the connector
    pub fn new(config: MqttConfig, config_topic: String) -> (Self, MqttBroker) {
        let mut mqtt_options =
            MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
        mqtt_options.set_keep_alive(config.keep_alive);
        if let Some(username) = &config.username {
            mqtt_options.set_credentials(
                username.clone(),
                config.password.clone().unwrap_or_default(),
            );
        }

        let (client, connection) = AsyncClient::new(mqtt_options, config.channel_capacity);
        let broker = MqttBroker::new(client.clone());
        let (status_tx, _) = watch::channel(MQTTStatus::default());

        let handler = MqttHandler {
            status_tx,
            client,
            connection,
            config,
            config_topic,
        };
        (handler, broker)
    }

    pub fn subscribe(&self) -> watch::Receiver<MQTTStatus> {
        self.status_tx.subscribe()
    }

    /// Applies one event loop notification to the connection state
    pub fn on_event(&mut self, event: Event) -> Step {
        match event {
            Event::Incoming(Packet::ConnAck(_)) => {
                let mut reconnect = false;
                self.status_tx.send_modify(|status| {
                    reconnect = status.connections > 0;
                    status.connections += 1;
                    status.connection_state = ConnectionState::Connected;
                });
                info!("Connected to MQTT broker at {}", self.config.address());

                match self
                    .client
                    .try_subscribe(self.config_topic.as_str(), QoS::AtMostOnce)
                {
                    Ok(()) => {
                        debug!("Subscribing config topic {}", self.config_topic);
                        self.status_tx
                            .send_modify(|status| status.config_subscriptions += 1);
                    }
                    Err(e) => {
                        error!("Failed to subscribe to {}: {}", self.config_topic, e);
                        self.status_tx
                            .send_modify(|status| status.record_error(e.to_string()));
                    }
                }
                Step::Forward(BrokerEvent::Connected { reconnect })
            }
            Event::Incoming(Packet::Publish(publish)) => {
                self.status_tx.send_modify(|status| {
                    status.messages_received += 1;
                    status.last_activity = Some(chrono::Local::now());
                });

                let message = MQTTMessage::from_payload(publish.topic, &publish.payload);
                debug!("Received {}", message);
                Step::Forward(BrokerEvent::Message(message))
            }
            Event::Outgoing(Outgoing::Disconnect) => {
                self.status_tx
                    .send_modify(|status| status.connection_state = ConnectionState::Disconnected);
                Step::Disconnected
            }
            _ => Step::Continue,
        }
    }

    pub fn on_error(&mut self, error: &ConnectionError) {
        error!(
            "⚠️  Error connecting mqtt at \"{}\": {}",
            self.config.address(),
            error
        );
        self.status_tx.send_modify(|status| {
            status.record_error(error.to_string());
            status.connection_state = ConnectionState::Reconnecting;
        });
    }

    /// Polls the event loop until our DISCONNECT is written or `shutdown` fires
    pub async fn run(mut self, events: mpsc::Sender<BrokerEvent>, shutdown: CancellationToken) {
        info!("Connecting to MQTT broker at {}", self.config.address());
        self.status_tx
            .send_modify(|status| status.connection_state = ConnectionState::Connecting);
        let mut listening = true;

        loop {
            let notification = tokio::select! {
                _ = shutdown.cancelled() => break,
                notification = self.connection.poll() => notification,
            };

            match notification {
                Ok(event) => match self.on_event(event) {
                    Step::Continue => {}
                    Step::Forward(event) => {
                        if listening && events.send(event).await.is_err() {
                            debug!("Connector stopped listening, flushing outgoing requests");
                            listening = false;
                        }
                    }
                    Step::Disconnected => {
                        info!("Disconnected from MQTT broker");
                        break;
                    }
                },
                Err(e) => {
                    self.on_error(&e);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.reconnect_delay) => {}
                    }
                }
            }
        }

        self.status_tx
            .send_modify(|status| status.connection_state = ConnectionState::Disconnected);
        warn!(
            "MQTT event loop stopped after {} messages",
            self.status_tx.borrow().messages_received
        );
    }
}
