//! Live device set of the current generation

use super::{ConnectOutcome, Device, DeviceLabel};
use crate::document::DeviceId;
use crate::error::DeviceError;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Owns every connected device of the current generation.
///
/// Devices enter the set only after their own `connect()` succeeded and leave
/// it only through [`DeviceSupervisor::disconnect_all`].
#[derive(Default)]
pub struct DeviceSupervisor {
    live: BTreeMap<DeviceId, Box<dyn Device>>,
}

impl DeviceSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connects a freshly constructed device, bounded by `timeout`.
    ///
    /// A timeout counts as a connect failure; the device then gets a best
    /// effort `disconnect()`, bounded by the same timeout, to release whatever
    /// it opened. The outcome is logged either way; the caller decides whether
    /// the device joins the live set.
    pub async fn connect(device: &mut dyn Device, timeout: Duration) -> ConnectOutcome {
        let attempt = tokio::time::timeout(timeout, device.connect()).await;
        let outcome = match attempt {
            Ok(outcome) => outcome,
            Err(_) => {
                let release = tokio::time::timeout(timeout, device.disconnect()).await;
                match release {
                    Ok(Ok(())) => debug!(device = %device.name(), "Released device after connect timeout"),
                    Ok(Err(e)) => warn!(device = %device.name(), "Error releasing device after connect timeout: {}", e),
                    Err(_) => warn!(device = %device.name(), "Release after connect timeout timed out as well"),
                }
                ConnectOutcome::Failed(format!("timeout after {}s", timeout.as_secs_f32()))
            }
        };

        match &outcome {
            ConnectOutcome::Connected => info!(
                device = %device.name(),
                "⚡  connects by {} {}: SUCCESS",
                device.manufacturer(),
                device.model()
            ),
            ConnectOutcome::Failed(reason) => warn!(
                device = %device.name(),
                "⚡  connects by {} {}: FAIL {}",
                device.manufacturer(),
                device.model(),
                reason
            ),
        }

        outcome
    }

    /// Adds a connected device to the live set
    pub fn insert(&mut self, device: Box<dyn Device>) {
        let id = device.id().clone();
        debug!(device = %device.name(), "Device {} joined live set", id);
        self.live.insert(id, device);
    }

    /// Disconnects and drops every live device.
    ///
    /// Best effort: a failing disconnect is logged and the remaining devices
    /// are still disconnected. Returns the number of devices torn down.
    pub async fn disconnect_all(&mut self) -> usize {
        let live = std::mem::take(&mut self.live);
        let count = live.len();

        for (id, mut device) in live {
            match device.disconnect().await {
                Ok(()) => debug!(device = %device.name(), "Device {} disconnected", id),
                Err(e) => error!(device = %device.name(), "Error disconnecting device {}: {}", id, e),
            }
        }

        count
    }

    /// Routes a command into a live device. Returns `false` when the device is
    /// not part of the live set.
    pub async fn handle(
        &mut self,
        id: &DeviceId,
        key: &str,
        state: &str,
        value: &str,
    ) -> Result<bool, DeviceError> {
        match self.live.get_mut(id) {
            Some(device) => {
                device.handle(key, state, value).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn contains(&self, id: &DeviceId) -> bool {
        self.live.contains_key(id)
    }

    pub fn label(&self, id: &DeviceId) -> Option<DeviceLabel> {
        self.live.get(id).map(|device| DeviceLabel::of(device.as_ref()))
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Journal, ScriptedDevice};

    #[tokio::test]
    async fn hanging_connect_times_out_as_failure() {
        let journal = Journal::default();
        let mut device = ScriptedDevice::new(1u32, &journal).hanging();
        let outcome = DeviceSupervisor::connect(&mut device, Duration::from_millis(20)).await;
        assert!(matches!(outcome, ConnectOutcome::Failed(reason) if reason.starts_with("timeout")));
        assert_eq!(journal.entries(), vec!["connect 1", "disconnect 1"]);
    }

    #[tokio::test]
    async fn failed_connect_is_not_released() {
        let journal = Journal::default();
        let mut device = ScriptedDevice::new(1u32, &journal).failing_connect("no port");
        let outcome = DeviceSupervisor::connect(&mut device, Duration::from_millis(20)).await;
        assert_eq!(outcome, ConnectOutcome::Failed("no port".to_string()));
        assert_eq!(journal.entries(), vec!["connect 1"]);
    }

    #[tokio::test]
    async fn disconnect_all_continues_after_errors() {
        let journal = Journal::default();
        let mut supervisor = DeviceSupervisor::new();
        supervisor.insert(Box::new(ScriptedDevice::new(1u32, &journal).failing_disconnect()));
        supervisor.insert(Box::new(ScriptedDevice::new(2u32, &journal)));

        assert_eq!(supervisor.disconnect_all().await, 2);
        assert!(supervisor.is_empty());
        assert_eq!(journal.entries(), vec!["disconnect 1", "disconnect 2"]);
    }

    #[tokio::test]
    async fn handle_reports_unknown_devices() {
        let journal = Journal::default();
        let mut supervisor = DeviceSupervisor::new();
        supervisor.insert(Box::new(ScriptedDevice::new(3u32, &journal)));

        assert!(supervisor.handle(&DeviceId::from(3u32), "power", "set", "42").await.unwrap());
        assert!(!supervisor.handle(&DeviceId::from(4u32), "power", "set", "42").await.unwrap());
        assert_eq!(journal.entries(), vec!["handle 3 power set 42"]);
    }
}
