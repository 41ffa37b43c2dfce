//! Reconfiguration state machine built with statum
//!
//! One pass turns generation N into generation N+1. The previous generation is
//! fully torn down before the first device of the next one is constructed.
//!
//! ```text
//! Idle ──► TearingDown ──► Instantiating ──► Steady
//!            │                  │
//!   disconnect all devices   per config, in document order:
//!   unsubscribe all topics     resolve class → construct → attach events
//!   clear published set        → connect (bounded) → bind `subscribe` map
//!                              → join live set
//! ```

use super::Generation;
use crate::device::{ConnectOutcome, DeviceEvent, DeviceEvents, DeviceLabel, DeviceSupervisor};
use crate::document::ConfigDocument;
use crate::mqtt::broker::Broker;
use crate::registry::DeviceRegistry;
use crate::router::TopicRouter;
use statum::{machine, state};
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// States of a reconfiguration pass
#[state]
#[derive(Debug, Clone)]
pub enum ReconfigurationState {
    Idle,          // previous generation still live
    TearingDown,   // releasing devices and topics
    Instantiating, // building the new generation
    Steady,        // new generation live
}

/// Counters of one reconfiguration pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationReport {
    pub generation: u64,
    pub disconnected: usize,
    pub unsubscribed: usize,
    pub connected: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl fmt::Display for GenerationReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "generation {}: {} connected, {} failed, {} skipped ({} devices and {} topics released)",
            self.generation,
            self.connected,
            self.failed,
            self.skipped,
            self.disconnected,
            self.unsubscribed
        )
    }
}

#[machine]
pub struct Reconfiguration<S: ReconfigurationState> {
    generation: u64,
    document: ConfigDocument,
    supervisor: DeviceSupervisor,
    router: TopicRouter,
    report: GenerationReport,
}

impl Reconfiguration<Idle> {
    /// Takes ownership of the previous generation's live state
    pub fn begin(previous: Generation, next: u64, document: ConfigDocument) -> Self {
        let Generation {
            supervisor, router, ..
        } = previous;

        Self::new(
            next,
            document,
            supervisor,
            router,
            GenerationReport {
                generation: next,
                ..GenerationReport::default()
            },
        )
    }

    pub fn start(self) -> Reconfiguration<TearingDown> {
        info!(
            "✨  Reconfiguring: {} devices in generation {}",
            self.document.devices.len(),
            self.generation
        );
        self.transition()
    }
}

impl Reconfiguration<TearingDown> {
    /// Disconnects every live device, then releases every tracked topic in
    /// one batch. Never fails; individual errors are logged.
    pub async fn tear_down(mut self, broker: &dyn Broker) -> Reconfiguration<Instantiating> {
        self.report.disconnected = self.supervisor.disconnect_all().await;
        self.report.unsubscribed = self.router.clear(broker).await;

        debug!(
            "Torn down {} devices and {} topics",
            self.report.disconnected, self.report.unsubscribed
        );
        self.transition()
    }
}

impl Reconfiguration<Instantiating> {
    /// Builds and connects the devices of the new document, one at a time.
    ///
    /// A device's bindings are registered only after its own `connect()`
    /// resolved successfully, and before the next device is constructed.
    pub async fn instantiate(
        mut self,
        registry: &mut DeviceRegistry,
        broker: &dyn Broker,
        events: &mpsc::Sender<DeviceEvent>,
        connect_timeout: Duration,
    ) -> Reconfiguration<Steady> {
        registry.prepare(&self.document);

        for config in &self.document.devices {
            let Some(factory) = registry.resolve(&config.class) else {
                debug!("Skipping device {}: driver class {} unavailable", config.id, config.class);
                self.report.skipped += 1;
                continue;
            };

            if self.supervisor.contains(&config.id) {
                warn!("Skipping device {}: id already live in this generation", config.id);
                self.report.skipped += 1;
                continue;
            }

            let mut device = match factory(config) {
                Ok(device) => device,
                Err(e) => {
                    error!("Failed to construct device {} ({}): {}", config.id, config.class, e);
                    self.report.skipped += 1;
                    continue;
                }
            };

            let label = DeviceLabel::of(device.as_ref());
            device.attach(DeviceEvents::new(
                self.generation,
                label.id.clone(),
                label.name.clone(),
                events.clone(),
            ));

            if let ConnectOutcome::Failed(_) =
                DeviceSupervisor::connect(device.as_mut(), connect_timeout).await
            {
                self.report.failed += 1;
                continue;
            }

            if let Some(subscribe) = &config.subscribe {
                for (key, topic) in subscribe {
                    let Some(resolved) = self.router.layout().resolve_subscription(&label.id, topic)
                    else {
                        warn!(
                            device = %label.name,
                            "Ignoring subscription {} -> \"{}\": outside the device namespace",
                            key,
                            topic
                        );
                        continue;
                    };
                    self.router.subscribe(broker, &resolved, &label, key).await;
                }
            }

            self.supervisor.insert(device);
            self.report.connected += 1;
        }

        self.transition()
    }
}

impl Reconfiguration<Steady> {
    /// Hands the live state over as the new current generation
    pub fn finish(self) -> (Generation, GenerationReport) {
        info!("Reconfiguration complete, {}", self.report);

        let generation = Generation {
            number: self.generation,
            support: self.document.support,
            supervisor: self.supervisor,
            router: self.router,
        };
        (generation, self.report)
    }
}
