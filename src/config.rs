//! Connector settings
//!
//! Values are resolved per key in this order:
//!
//! 1. command line argument `key=value` (`host=`, `port=`, `username=`, ...)
//! 2. environment variable (`MQTT_HOST`, `MQTT_PORT`, `MQTT_USERNAME`, `MQTT_PASSWORD`)
//! 3. settings file (TOML)
//! 4. built-in default
//!
//! The settings file is optional. Its path comes from `config=`, then
//! `CONNECTOR_CONFIG`, then `connector.toml` in the platform config directory.
//! It may also carry the bootstrap document, either inline (`[[devices]]`) or
//! as a path to a JSON file (`bootstrap = "devices.json"`).

use crate::document::{ConfigDocument, DeviceConfig};
use crate::error::SettingsError;
use crate::mqtt::config::{MqttConfig, DEFAULT_CLIENT_ID, DEFAULT_HOST, DEFAULT_PORT};
use crate::router::TopicLayout;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const ENV_HOST: &str = "MQTT_HOST";
pub const ENV_PORT: &str = "MQTT_PORT";
pub const ENV_USERNAME: &str = "MQTT_USERNAME";
pub const ENV_PASSWORD: &str = "MQTT_PASSWORD";
pub const ENV_CONFIG: &str = "CONNECTOR_CONFIG";
pub const ENV_LOG: &str = "RUST_LOG";

const KNOWN_ARGS: [&str; 7] = [
    "host",
    "port",
    "username",
    "password",
    "config",
    "client_id",
    "log_level",
];

/// `key=value` command line arguments
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliArgs {
    values: HashMap<String, String>,
    ignored: Vec<String>,
}

impl CliArgs {
    pub fn parse<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut values = HashMap::new();
        let mut ignored = Vec::new();
        for arg in args {
            let arg = arg.as_ref();
            match arg.split_once('=') {
                Some((key, value)) => {
                    values.insert(key.to_string(), value.to_string());
                }
                None => ignored.push(arg.to_string()),
            }
        }
        Self { values, ignored }
    }

    /// Arguments that are not `key=value` or use an unknown key
    pub fn unrecognised(&self) -> Vec<String> {
        let mut unknown: Vec<String> = self
            .values
            .keys()
            .filter(|key| !KNOWN_ARGS.contains(&key.as_str()))
            .cloned()
            .collect();
        unknown.sort();
        unknown.extend(self.ignored.iter().cloned());
        unknown
    }

    /// Log level from `log_level=` or `RUST_LOG`, defaulting to `info`
    pub fn log_level<E>(&self, env: E) -> String
    where
        E: Fn(&str) -> Option<String>,
    {
        self.get("log_level")
            .map(str::to_string)
            .or_else(|| env(ENV_LOG))
            .unwrap_or_else(|| "info".to_string())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

/// `[mqtt]` section of the settings file
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct MqttSection {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: Option<String>,
    pub keep_alive_secs: Option<u64>,
    pub reconnect_delay_secs: Option<u64>,
    pub channel_capacity: Option<usize>,
}

/// Contents of the settings file
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ConnectorSettings {
    pub mqtt: MqttSection,
    pub topics: TopicLayout,
    /// Upper bound for a single device `connect()`
    pub connect_timeout_secs: u64,
    /// Driver classes allowed to load; all built-in drivers when absent
    pub drivers: Option<Vec<String>>,
    /// JSON file holding the bootstrap document
    pub bootstrap: Option<PathBuf>,
    /// Inline bootstrap document
    pub devices: Vec<DeviceConfig>,
    pub support: Option<Value>,
}

impl Default for ConnectorSettings {
    fn default() -> Self {
        Self {
            mqtt: MqttSection::default(),
            topics: TopicLayout::default(),
            connect_timeout_secs: 30,
            drivers: None,
            bootstrap: None,
            devices: Vec::new(),
            support: None,
        }
    }
}

/// Fully resolved runtime configuration
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub mqtt: MqttConfig,
    pub topics: TopicLayout,
    pub connect_timeout: Duration,
    pub drivers: Option<Vec<String>>,
    pub bootstrap: ConfigDocument,
}

impl ConnectorSettings {
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let content = fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let settings = toml::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Settings file location, if one is configured or present
    pub fn locate<E>(cli: &CliArgs, env: E) -> Option<PathBuf>
    where
        E: Fn(&str) -> Option<String>,
    {
        if let Some(path) = cli.get("config") {
            return Some(PathBuf::from(path));
        }
        if let Some(path) = env(ENV_CONFIG) {
            return Some(PathBuf::from(path));
        }
        let default = dirs::config_dir()?.join("device-connector").join("connector.toml");
        if default.exists() {
            Some(default)
        } else {
            debug!("No settings file at {}", default.display());
            None
        }
    }

    /// Loads the located settings file, or defaults when there is none
    pub fn discover<E>(cli: &CliArgs, env: E) -> Result<Self, SettingsError>
    where
        E: Fn(&str) -> Option<String>,
    {
        match Self::locate(cli, env) {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    /// Applies command line and environment overrides
    pub fn resolve<E>(self, cli: &CliArgs, env: E) -> Result<ResolvedConfig, SettingsError>
    where
        E: Fn(&str) -> Option<String>,
    {
        let pick = |arg: &str, var: Option<&str>, file: Option<String>| -> Option<String> {
            cli.get(arg)
                .map(str::to_string)
                .or_else(|| var.and_then(&env))
                .or(file)
        };

        let host = pick("host", Some(ENV_HOST), self.mqtt.host.clone())
            .unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = match pick("port", Some(ENV_PORT), None) {
            Some(port) => parse_value("port", &port)?,
            None => self.mqtt.port.unwrap_or(DEFAULT_PORT),
        };
        let username = pick("username", Some(ENV_USERNAME), self.mqtt.username.clone());
        let password = pick("password", Some(ENV_PASSWORD), self.mqtt.password.clone());
        let client_id = pick("client_id", None, self.mqtt.client_id.clone())
            .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string());

        let defaults = MqttConfig::default();
        let mqtt = MqttConfig {
            host,
            port,
            username,
            password,
            client_id,
            keep_alive: self
                .mqtt
                .keep_alive_secs
                .map_or(defaults.keep_alive, Duration::from_secs),
            reconnect_delay: self
                .mqtt
                .reconnect_delay_secs
                .map_or(defaults.reconnect_delay, Duration::from_secs),
            channel_capacity: self
                .mqtt
                .channel_capacity
                .unwrap_or(defaults.channel_capacity),
        };

        let bootstrap = self.bootstrap_document()?;

        Ok(ResolvedConfig {
            mqtt,
            topics: self.topics,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            drivers: self.drivers,
            bootstrap,
        })
    }

    fn bootstrap_document(&self) -> Result<ConfigDocument, SettingsError> {
        let Some(path) = &self.bootstrap else {
            return Ok(ConfigDocument {
                devices: self.devices.clone(),
                support: self.support.clone(),
            });
        };

        if !self.devices.is_empty() {
            warn!(
                "Both inline devices and bootstrap file {} configured, using the file",
                path.display()
            );
        }
        let content = fs::read(path).map_err(|source| SettingsError::Read {
            path: path.display().to_string(),
            source,
        })?;
        ConfigDocument::from_slice(&content).map_err(|source| SettingsError::Bootstrap {
            path: path.display().to_string(),
            source,
        })
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, SettingsError> {
    value.parse().map_err(|_| SettingsError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}
