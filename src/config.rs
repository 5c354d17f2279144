//! Pipeline configuration.
//!
//! Loaded from TOML. Every key is optional; anything left out falls back to the reference
//! deployment (power/volume keys on `event5`, three grab-only event nodes, deck-state
//! reports on `hidraw2`, 1 ms ticks, 200/100 stick/pad thresholds).

use crate::controller::filter::Thresholds;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

const CONFIG_DIR: &str = "deckinput";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// One input-event device to open.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct EventDeviceConfig {
    pub path: String,
    /// Take exclusive access so the OS does not act on the input.
    #[serde(default = "default_true")]
    pub grab: bool,
    /// Translate key events from this device into fields.
    #[serde(default)]
    pub translate_keys: bool,
    /// Continue without this device if it cannot be opened.
    #[serde(default)]
    pub optional: bool,
}

impl EventDeviceConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            grab: true,
            translate_keys: false,
            optional: false,
        }
    }
}

/// The raw-HID report device.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct RawReportConfig {
    pub path: String,
    #[serde(default)]
    pub optional: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct ControllerConfig {
    pub event_devices: Vec<EventDeviceConfig>,
    pub raw_report: Option<RawReportConfig>,
    pub tick_interval_ms: u64,
    pub max_consecutive_read_failures: u32,
    pub max_messages_per_tick: usize,
    pub thresholds: Thresholds,
}

fn default_true() -> bool {
    true
}

impl Default for ControllerConfig {
    fn default() -> Self {
        let mut event_devices = vec![EventDeviceConfig {
            translate_keys: true,
            ..EventDeviceConfig::new("/dev/input/event5")
        }];
        for path in ["/dev/input/event2", "/dev/input/event8", "/dev/input/event14"] {
            event_devices.push(EventDeviceConfig {
                optional: true,
                ..EventDeviceConfig::new(path)
            });
        }

        Self {
            event_devices,
            raw_report: Some(RawReportConfig {
                path: "/dev/hidraw2".to_string(),
                optional: false,
            }),
            tick_interval_ms: 1,
            max_consecutive_read_failures: 5,
            max_messages_per_tick: 32,
            thresholds: Thresholds::default(),
        }
    }
}

impl ControllerConfig {
    /// `<config dir>/deckinput/config.toml`, or `./deckinput/config.toml` if the platform
    /// has no config directory.
    pub fn default_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| {
            warn!("Could not determine config directory, using current directory");
            PathBuf::from(".")
        });
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        path
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&content)?;
        info!("Loaded config from {}", path.display());
        debug!("Config: {:?}", config);
        Ok(config)
    }

    /// Like [`load`](Self::load), but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            warn!("Config file {} does not exist, using default", path.display());
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("tick_interval_ms must be > 0".into()));
        }
        if self.max_consecutive_read_failures == 0 {
            return Err(ConfigError::Invalid(
                "max_consecutive_read_failures must be > 0".into(),
            ));
        }
        if self.max_messages_per_tick == 0 {
            return Err(ConfigError::Invalid(
                "max_messages_per_tick must be > 0".into(),
            ));
        }
        if self.event_devices.is_empty() && self.raw_report.is_none() {
            return Err(ConfigError::Invalid("no input sources configured".into()));
        }
        Ok(())
    }
}
