//! Built-in device drivers
//!
//! Each driver contributes one loader to the [`DriverCatalog`]. New drivers are
//! added here; the settings `drivers` list narrows what may be loaded.

pub mod loopback;

use crate::device::Device;
use crate::document::DeviceConfig;
use crate::error::DeviceError;
use crate::registry::{DeviceFactory, DriverCatalog};
use std::sync::Arc;

/// Catalog of every driver compiled into the connector
pub fn builtin_catalog() -> DriverCatalog {
    DriverCatalog::new().with(loopback::CLASS, || {
        let factory: DeviceFactory = Arc::new(|config: &DeviceConfig| -> Result<Box<dyn Device>, DeviceError> {
            let device = loopback::LoopbackDevice::from_config(config)?;
            Ok(Box::new(device) as Box<dyn Device>)
        });
        Ok(factory)
    })
}
