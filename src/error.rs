//! Error types shared across the connector runtime.
//!
//! Every failure below is scoped to one device, one topic or one document. Only
//! [`ConnectorError::MalformedConfig`] stops a reconfiguration, and it does so
//! before the previous generation is touched.

use thiserror::Error;

/// Errors raised by a device driver
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The driver rejected its configuration at construction time
    #[error("Invalid device configuration: {0}")]
    InvalidConfig(String),

    /// The driver does not know the requested command key
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// Transport or hardware problem reported by the driver
    #[error("Device I/O error: {0}")]
    Io(String),
}

/// Errors raised while loading a driver class into the registry
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Failed to load driver '{class}': {reason}")]
    DriverLoad { class: String, reason: String },
}

/// Errors raised by the broker transport
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),
}

/// Errors raised while resolving connector settings
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to read settings file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for '{key}': {value}")]
    InvalidValue { key: String, value: String },

    #[error("Failed to parse bootstrap document {path}: {source}")]
    Bootstrap {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors raised while processing an inbound config document
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// A configuration document could not be parsed; nothing was torn down
    #[error("Malformed config document: {0}")]
    MalformedConfig(#[from] serde_json::Error),
}
