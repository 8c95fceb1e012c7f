//! Configuration for the Ingeteam Modbus monitor.

use crate::decoder::RegisterLayout;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Failed to initialize logging: {0}")]
    Logging(String),
}

/// Complete monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Inverters to poll
    pub inverters: Vec<HubConfig>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connection and polling settings for one inverter.
///
/// Immutable once a hub has been built from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubConfig {
    /// Hub name, used by the host to namespace its entities
    #[serde(default = "default_name")]
    pub name: String,

    /// Host address (IP or hostname)
    pub host: String,

    /// TCP port (default: 502)
    #[serde(default = "default_port", deserialize_with = "port_from_number_or_string")]
    pub port: u16,

    /// Modbus unit/slave ID (1-247)
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    /// Poll interval in seconds
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,

    /// Connect/read timeout in seconds (default: max(3, scan_interval - 1))
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Expose the external meter group
    #[serde(default)]
    pub read_meter: bool,

    /// Expose the battery group
    #[serde(default)]
    pub read_battery: bool,

    /// Register layout of the inverter firmware
    #[serde(default)]
    pub layout: RegisterLayout,
}

/// Lower bound for connect and read timeouts.
pub const MIN_TIMEOUT_SECS: u64 = 3;

fn default_name() -> String {
    "ingeteam".to_string()
}

fn default_port() -> u16 {
    502
}

fn default_unit_id() -> u8 {
    1
}

fn default_scan_interval() -> u64 {
    10
}

fn port_from_number_or_string<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u64),
        Text(String),
    }

    match Port::deserialize(deserializer)? {
        Port::Number(port) => u16::try_from(port)
            .map_err(|_| serde::de::Error::custom(format!("port {} out of range", port))),
        Port::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid port '{}'", text))),
    }
}

impl HubConfig {
    /// Create a config with default settings for `host`.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            name: default_name(),
            host: host.into(),
            port: default_port(),
            unit_id: default_unit_id(),
            scan_interval_secs: default_scan_interval(),
            timeout_secs: None,
            read_meter: false,
            read_battery: false,
            layout: RegisterLayout::default(),
        }
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    /// Timeout for a single connect or read.
    ///
    /// Defaults to one second less than the poll interval, never below
    /// three seconds.
    pub fn timeout(&self) -> Duration {
        let secs = self.timeout_secs.unwrap_or_else(|| {
            self.scan_interval_secs
                .saturating_sub(1)
                .max(MIN_TIMEOUT_SECS)
        });
        Duration::from_secs(secs)
    }

    /// Validate this inverter's settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::Validation(
                "Inverter name cannot be empty".to_string(),
            ));
        }

        if self.host.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "Inverter '{}': host cannot be empty",
                self.name
            )));
        }

        if self.port == 0 {
            return Err(ConfigError::Validation(format!(
                "Inverter '{}': port must be 1-65535",
                self.name
            )));
        }

        if !(1..=247).contains(&self.unit_id) {
            return Err(ConfigError::Validation(format!(
                "Inverter '{}': unit_id must be 1-247",
                self.name
            )));
        }

        if self.scan_interval_secs == 0 {
            return Err(ConfigError::Validation(format!(
                "Inverter '{}': scan_interval_secs must be positive",
                self.name
            )));
        }

        if let Some(timeout) = self.timeout_secs {
            if timeout < MIN_TIMEOUT_SECS {
                return Err(ConfigError::Validation(format!(
                    "Inverter '{}': timeout_secs must be at least {}",
                    self.name, MIN_TIMEOUT_SECS
                )));
            }
        }

        Ok(())
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format (default).
    #[default]
    Text,
    /// Structured JSON format.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json"
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl MonitorConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: MonitorConfig = json5::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.inverters.is_empty() {
            return Err(ConfigError::Validation(
                "At least one inverter must be configured".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for inverter in &self.inverters {
            inverter.validate()?;

            if !names.insert(inverter.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate inverter name '{}'",
                    inverter.name
                )));
            }
        }

        Ok(())
    }
}
