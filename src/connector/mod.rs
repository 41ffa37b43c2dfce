//! # Connector runtime
//!
//! Ties registry, supervisor and router together and serialises everything
//! that touches them through one task:
//!
//! ```text
//! MqttHandler ──BrokerEvent──►┐
//!                             ├──► Connector::run ──► Reconfiguration (config topic)
//! Devices ─────DeviceEvent───►┘          │       ──► TopicRouter::route → Device::handle
//!                                        └──────► TopicRouter::publish (entity updates)
//! ```
//!
//! A config document arriving while a reconfiguration is running waits in the
//! broker event queue until the pass has finished. Both queues are bounded and
//! polled fairly, so a device flooding entity updates cannot hold back config
//! documents. Entity updates carry the generation they were produced in and
//! are dropped once that generation has been torn down.

pub mod reconfigure;

pub use reconfigure::{GenerationReport, Reconfiguration, ReconfigurationState};

use crate::device::{DeviceEvent, DeviceSupervisor};
use crate::document::ConfigDocument;
use crate::error::ConnectorError;
use crate::mqtt::broker::Broker;
use crate::mqtt::message_manager::{BrokerEvent, MQTTMessage};
use crate::registry::DeviceRegistry;
use crate::router::{TopicKind, TopicLayout, TopicRouter};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Capacity of the device event queue. Updates emitted while the queue is
/// full are dropped.
pub const DEVICE_EVENT_CAPACITY: usize = 1024;

/// Live state of one configuration epoch
pub struct Generation {
    pub number: u64,
    pub support: Option<Value>,
    pub supervisor: DeviceSupervisor,
    pub router: TopicRouter,
}

impl Generation {
    pub fn empty(layout: TopicLayout) -> Self {
        Self {
            number: 0,
            support: None,
            supervisor: DeviceSupervisor::new(),
            router: TopicRouter::new(layout),
        }
    }
}

pub struct Connector {
    broker: Arc<dyn Broker>,
    registry: DeviceRegistry,
    layout: TopicLayout,
    connect_timeout: Duration,
    current: Generation,
    events_tx: mpsc::Sender<DeviceEvent>,
    events_rx: mpsc::Receiver<DeviceEvent>,
}

impl Connector {
    pub fn new(
        broker: Arc<dyn Broker>,
        registry: DeviceRegistry,
        layout: TopicLayout,
        connect_timeout: Duration,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(DEVICE_EVENT_CAPACITY);
        Self {
            broker,
            registry,
            current: Generation::empty(layout.clone()),
            layout,
            connect_timeout,
            events_tx,
            events_rx,
        }
    }

    /// Replaces the current generation with one built from `document`
    pub async fn apply(&mut self, document: ConfigDocument) -> GenerationReport {
        let next = self.current.number + 1;
        let previous = std::mem::replace(&mut self.current, Generation::empty(self.layout.clone()));

        let (generation, report) = Reconfiguration::begin(previous, next, document)
            .start()
            .tear_down(self.broker.as_ref())
            .await
            .instantiate(
                &mut self.registry,
                self.broker.as_ref(),
                &self.events_tx,
                self.connect_timeout,
            )
            .await
            .finish();

        self.current = generation;
        report
    }

    /// Parses a config payload and applies it. A payload that does not parse
    /// leaves the current generation untouched.
    pub async fn apply_payload(&mut self, payload: &[u8]) -> Result<GenerationReport, ConnectorError> {
        let document = ConfigDocument::from_slice(payload)?;
        Ok(self.apply(document).await)
    }

    /// Invokes every handler bound to `topic`. Returns the number of handlers
    /// that ran.
    pub async fn dispatch(&mut self, topic: &str, payload: &[u8]) -> usize {
        let routes = self.current.router.route(topic, payload);
        let mut invoked = 0;

        for route in routes {
            match self
                .current
                .supervisor
                .handle(&route.device, &route.key, &route.state, &route.value)
                .await
            {
                Ok(true) => invoked += 1,
                Ok(false) => debug!("Device {} bound to {} is not live", route.device, topic),
                Err(e) => warn!("Device {} failed to handle {}: {}", route.device, topic, e),
            }
        }

        invoked
    }

    pub async fn handle_broker_event(&mut self, event: BrokerEvent) {
        match event {
            BrokerEvent::Connected { reconnect } => {
                if reconnect {
                    self.current
                        .router
                        .resubscribe_all(self.broker.as_ref())
                        .await;
                }
            }
            BrokerEvent::Message(message) => self.handle_message(&message).await,
        }
    }

    async fn handle_message(&mut self, message: &MQTTMessage) {
        match self.layout.classify(message.topic()) {
            TopicKind::Config => {
                info!("✨  New config discovered. Processing...");
                if let Err(e) = self.apply_payload(message.content().as_bytes()).await {
                    error!("{}; keeping generation {}", e, self.current.number);
                }
            }
            TopicKind::Device => {
                self.dispatch(message.topic(), message.content().as_bytes())
                    .await;
            }
            TopicKind::Foreign => debug!("Ignoring message on {}", message.topic()),
        }
    }

    pub async fn handle_device_event(&mut self, event: DeviceEvent) {
        match event {
            DeviceEvent::EntityUpdate {
                generation,
                device,
                entity,
            } => {
                if generation != self.current.number {
                    debug!(
                        "Dropping entity update of device {} from generation {}",
                        device, generation
                    );
                    return;
                }
                let Some(label) = self.current.supervisor.label(&device) else {
                    debug!("Dropping entity update of device {}: not live", device);
                    return;
                };
                self.current
                    .router
                    .publish(
                        self.broker.as_ref(),
                        &label,
                        &entity,
                        self.current.support.as_ref(),
                    )
                    .await;
            }
        }
    }

    /// Handles every device event already queued. Returns how many were
    /// handled.
    pub async fn process_pending_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_device_event(event).await;
            handled += 1;
        }
        handled
    }

    /// Main loop. Runs until `shutdown` is cancelled or the broker event
    /// channel closes, then disconnects every device.
    pub async fn run(
        mut self,
        mut inbound: mpsc::Receiver<BrokerEvent>,
        shutdown: CancellationToken,
    ) {
        info!("Connector running");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }

                Some(event) = self.events_rx.recv() => {
                    self.handle_device_event(event).await;
                }

                event = inbound.recv() => match event {
                    Some(event) => self.handle_broker_event(event).await,
                    None => {
                        warn!("Broker event channel closed");
                        break;
                    }
                },
            }
        }

        self.shutdown().await;
    }

    /// Disconnects every live device and releases all topics
    pub async fn shutdown(&mut self) {
        let devices = self.current.supervisor.disconnect_all().await;
        let topics = self.current.router.clear(self.broker.as_ref()).await;
        info!("Connector stopped ({} devices, {} topics released)", devices, topics);
    }

    pub fn generation(&self) -> &Generation {
        &self.current
    }
}
