//! # Device Registry
//!
//! Maps driver class names to device factories.
//!
//! The set of drivers that *can* be loaded is a [`DriverCatalog`]: one named
//! loader per driver, optionally narrowed by an allow-list from the settings.
//! The [`DeviceRegistry`] loads each class the first time a config document
//! references it and caches the resulting factory. A loader that fails marks
//! its class unavailable; configs referencing it are skipped.

use crate::device::Device;
use crate::document::{ConfigDocument, DeviceConfig};
use crate::error::{DeviceError, RegistryError};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Builds one device instance from its config entry
pub type DeviceFactory =
    Arc<dyn Fn(&DeviceConfig) -> Result<Box<dyn Device>, DeviceError> + Send + Sync>;

/// Loads a driver class, yielding its factory
pub type DriverLoader = Arc<dyn Fn() -> Result<DeviceFactory, RegistryError> + Send + Sync>;

/// Driver classes available to the connector
#[derive(Clone, Default)]
pub struct DriverCatalog {
    loaders: BTreeMap<String, DriverLoader>,
}

impl DriverCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, class: impl Into<String>, loader: F)
    where
        F: Fn() -> Result<DeviceFactory, RegistryError> + Send + Sync + 'static,
    {
        self.loaders.insert(class.into(), Arc::new(loader));
    }

    pub fn with<F>(mut self, class: impl Into<String>, loader: F) -> Self
    where
        F: Fn() -> Result<DeviceFactory, RegistryError> + Send + Sync + 'static,
    {
        self.register(class, loader);
        self
    }

    /// Keeps only the classes named in `allowed`
    pub fn restrict(mut self, allowed: &[String]) -> Self {
        self.loaders.retain(|class, _| {
            let keep = allowed.iter().any(|a| a == class);
            if !keep {
                debug!("Driver class {} not in allow-list", class);
            }
            keep
        });
        for class in allowed {
            if !self.loaders.contains_key(class) {
                warn!("Allow-listed driver class {} is not available", class);
            }
        }
        self
    }

    pub fn contains(&self, class: &str) -> bool {
        self.loaders.contains_key(class)
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.loaders.keys().map(String::as_str)
    }
}

pub struct DeviceRegistry {
    catalog: DriverCatalog,
    loaded: HashMap<String, DeviceFactory>,
    unavailable: HashSet<String>,
}

impl DeviceRegistry {
    pub fn new(catalog: DriverCatalog) -> Self {
        Self {
            catalog,
            loaded: HashMap::new(),
            unavailable: HashSet::new(),
        }
    }

    /// Loads every class referenced by `document` that is in the catalog and
    /// not yet cached. Returns the number of classes newly loaded.
    pub fn prepare(&mut self, document: &ConfigDocument) -> usize {
        let mut newly_loaded = 0;

        for class in document.classes() {
            if self.loaded.contains_key(class) || self.unavailable.contains(class) {
                continue;
            }
            let Some(loader) = self.catalog.loaders.get(class) else {
                debug!("No driver for class {}", class);
                continue;
            };

            match loader() {
                Ok(factory) => {
                    info!("Loaded driver class {}", class);
                    self.loaded.insert(class.to_string(), factory);
                    newly_loaded += 1;
                }
                Err(e) => {
                    error!("{}", e);
                    self.unavailable.insert(class.to_string());
                }
            }
        }

        newly_loaded
    }

    /// Factory for `class`, if it has been loaded
    pub fn resolve(&self, class: &str) -> Option<DeviceFactory> {
        self.loaded.get(class).cloned()
    }

    pub fn is_loaded(&self, class: &str) -> bool {
        self.loaded.contains_key(class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{scripted_catalog, Journal};

    fn document(classes: &[&str]) -> ConfigDocument {
        ConfigDocument {
            devices: classes
                .iter()
                .enumerate()
                .map(|(i, class)| DeviceConfig::new(*class, i as u32))
                .collect(),
            support: None,
        }
    }

    #[test]
    fn loads_each_referenced_class_once() {
        let journal = Journal::default();
        let mut registry = DeviceRegistry::new(scripted_catalog(&journal));

        assert_eq!(registry.prepare(&document(&["Scripted", "Scripted"])), 1);
        assert_eq!(registry.prepare(&document(&["Scripted"])), 0);
        assert!(registry.is_loaded("Scripted"));
        assert_eq!(journal.count("load Scripted"), 1);
    }

    #[test]
    fn failing_and_missing_classes_are_unavailable() {
        let journal = Journal::default();
        let mut registry = DeviceRegistry::new(scripted_catalog(&journal));

        assert_eq!(registry.prepare(&document(&["Broken", "Missing", "Scripted"])), 1);
        assert!(registry.resolve("Broken").is_none());
        assert!(registry.resolve("Missing").is_none());
        assert!(registry.resolve("Scripted").is_some());

        // a failed class is not retried
        registry.prepare(&document(&["Broken"]));
        assert_eq!(journal.count("load Broken"), 1);
    }

    #[test]
    fn unreferenced_classes_are_not_loaded() {
        let journal = Journal::default();
        let mut registry = DeviceRegistry::new(scripted_catalog(&journal));
        registry.prepare(&document(&[]));
        assert!(!registry.is_loaded("Scripted"));
        assert!(journal.entries().is_empty());
    }

    #[test]
    fn allow_list_narrows_catalog() {
        let journal = Journal::default();
        let catalog = scripted_catalog(&journal).restrict(&["Broken".to_string()]);
        assert!(!catalog.contains("Scripted"));
        assert!(catalog.contains("Broken"));
    }
}
