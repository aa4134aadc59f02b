//! Start-time configuration of the engine.
//!
//! [`EngineConfig`] is what a user writes, usually as YAML. [`EngineConfig::validate`]
//! turns it into [`Settings`], the immutable values the engine runs with. Nothing in here
//! can change once the engine is started.
//!
//! ```yaml
//! address: 1
//! protocol_version: 0x20
//! chemistry: lithium_iron_eg4
//! features:
//!   skip_address_payload: true
//!   temperature_count_override: 6
//! throttle: 50ms
//! analog_interval: 5s
//! ```

use crate::error::ConfigError;
use crate::frame::{Chemistry, ProtocolVersion};
use crate::protocol::{Decoder, Endpoint, FeatureSet};
use crate::scheduler::ScheduleSettings;
use crate::session::SessionSettings;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    #[serde(default)]
    pub address: u8,
    #[serde(default = "EngineConfig::default_protocol_version")]
    pub protocol_version: u8,
    #[serde(default)]
    pub chemistry: Chemistry,
    #[serde(default)]
    pub features: FeatureSet,
    #[serde(default = "EngineConfig::default_throttle", with = "humantime_serde")]
    pub throttle: Duration,
    #[serde(
        default = "EngineConfig::default_response_timeout",
        with = "humantime_serde"
    )]
    pub response_timeout: Duration,
    #[serde(default = "EngineConfig::default_retries")]
    pub retries: u8,
    #[serde(default = "EngineConfig::default_tick", with = "humantime_serde")]
    pub tick: Duration,
    #[serde(
        default = "EngineConfig::default_telemetry_interval",
        with = "humantime_serde"
    )]
    pub analog_interval: Duration,
    #[serde(
        default = "EngineConfig::default_telemetry_interval",
        with = "humantime_serde"
    )]
    pub status_interval: Duration,
    #[serde(default = "EngineConfig::default_info_interval", with = "humantime_serde")]
    pub info_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            address: 0,
            protocol_version: Self::default_protocol_version(),
            chemistry: Chemistry::default(),
            features: FeatureSet::default(),
            throttle: Self::default_throttle(),
            response_timeout: Self::default_response_timeout(),
            retries: Self::default_retries(),
            tick: Self::default_tick(),
            analog_interval: Self::default_telemetry_interval(),
            status_interval: Self::default_telemetry_interval(),
            info_interval: Self::default_info_interval(),
        }
    }
}

/// Validated settings the engine runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub decoder: Decoder,
    pub session: SessionSettings,
    pub schedule: ScheduleSettings,
}

impl EngineConfig {
    fn default_protocol_version() -> u8 {
        ProtocolVersion::V25.value()
    }

    fn default_throttle() -> Duration {
        Duration::from_millis(50)
    }

    fn default_response_timeout() -> Duration {
        Duration::from_millis(200)
    }

    fn default_retries() -> u8 {
        2
    }

    fn default_tick() -> Duration {
        Duration::from_millis(10)
    }

    fn default_telemetry_interval() -> Duration {
        Duration::from_secs(10)
    }

    fn default_info_interval() -> Duration {
        Duration::from_secs(600)
    }

    pub const DEFAULT_CONFIG_FILE: &str = "pacebms.yaml";

    pub fn load<P: AsRef<Path>>(config_file_path: P) -> Result<Self> {
        let path = config_file_path.as_ref();
        log::debug!("Loading config file from {path:?}");
        let config_file = std::fs::File::open(path)?;
        let config: Self = serde_yaml::from_reader(&config_file)?;
        Ok(config)
    }

    /// Checks every value and builds the runtime settings.
    ///
    /// # Returns
    ///
    /// The settings, or the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<Settings> {
        let version = ProtocolVersion::new(self.protocol_version)
            .map_err(|_| ConfigError::UnsupportedVersion(self.protocol_version))?;
        let endpoint = Endpoint::new(version, self.address, self.chemistry)?;
        let decoder = Decoder::new(endpoint, self.features)?;

        let durations = [
            (self.response_timeout, "response_timeout"),
            (self.tick, "tick"),
            (self.analog_interval, "analog_interval"),
            (self.status_interval, "status_interval"),
            (self.info_interval, "info_interval"),
        ];
        if let Some((_, name)) = durations.iter().find(|(duration, _)| duration.is_zero()) {
            return Err(ConfigError::ZeroDuration(name));
        }

        Ok(Settings {
            decoder,
            session: SessionSettings {
                throttle: self.throttle,
                response_timeout: self.response_timeout,
                retries: self.retries,
            },
            schedule: ScheduleSettings {
                tick: self.tick,
                analog_interval: self.analog_interval,
                status_interval: self.status_interval,
                info_interval: self.info_interval,
            },
        })
    }
}
