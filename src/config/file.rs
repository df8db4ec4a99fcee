//! JSON configuration file for host builds.
//!
//! Every key is optional; anything missing keeps the compiled default.
//!
//! ```json
//! {
//!   "base_interval_secs": 120,
//!   "max_backoff_secs": 3600,
//!   "motion_level": "active-high",
//!   "region": "us915",
//!   "sub_band": 2,
//!   "credentials": {
//!     "join_eui": "70B3D57ED8004069",
//!     "dev_eui": "70B3D57ED8004069",
//!     "app_key": "0EF9A3826DD27B1F46D82048EE598998",
//!     "nwk_key": "0EF9A3826DD27B1F46D82048EE598998"
//!   },
//!   "simulation": { "time_scale": 60, "join_failure_percent": 20 }
//! }
//! ```

use super::{ConfigError, Credentials, MotionLevel, NodeConfig};
use crate::lora::Region;
use serde::Deserialize;
use std::path::Path;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Parsed configuration file.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub base_interval_secs: Option<u32>,
    pub max_backoff_secs: Option<u32>,
    pub motion_debounce_secs: Option<u32>,
    pub rejoin_threshold: Option<u32>,
    pub uplink_port: Option<u8>,
    pub confirmed_uplinks: Option<bool>,
    pub motion_level: Option<MotionLevel>,
    pub region: Option<Region>,
    pub sub_band: Option<u8>,
    pub loop_tick_ms: Option<u64>,
    pub credentials: Option<CredentialStrings>,
    pub simulation: SimulationSettings,
}

/// Credential hex strings as written in the file.
#[derive(Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(deny_unknown_fields)]
pub struct CredentialStrings {
    pub join_eui: String,
    pub dev_eui: String,
    pub app_key: String,
    pub nwk_key: String,
}

impl std::fmt::Debug for CredentialStrings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStrings")
            .field("join_eui", &self.join_eui)
            .field("dev_eui", &self.dev_eui)
            .finish_non_exhaustive()
    }
}

/// Knobs for the host simulation (ignored by real hardware).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationSettings {
    /// Simulated seconds per wall-clock second while asleep.
    pub time_scale: u32,
    /// Chance (0-100) that a join attempt fails.
    pub join_failure_percent: u8,
    /// Chance (0-100) that an uplink fails.
    pub send_failure_percent: u8,
    /// Report the sensor as missing.
    pub sensor_missing: bool,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            time_scale: 60,
            join_failure_percent: 0,
            send_failure_percent: 0,
            sensor_missing: false,
        }
    }
}

impl ConfigFile {
    /// Parse a config file from JSON text.
    pub fn parse(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::File(e.to_string()))
    }

    /// Read and parse a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::File(format!("{}: {}", path.display(), e)))?;
        Self::parse(&text)
    }

    /// Apply the overrides on top of `base` and validate the result.
    pub fn apply(&self, base: NodeConfig) -> Result<NodeConfig, ConfigError> {
        let region = self.region.unwrap_or(base.region);
        let sub_band = match (self.sub_band, self.region) {
            (Some(band), _) => band,
            (None, Some(region)) => region.default_sub_band(),
            (None, None) => base.sub_band,
        };

        let config = NodeConfig {
            base_interval_secs: self.base_interval_secs.unwrap_or(base.base_interval_secs),
            max_backoff_secs: self.max_backoff_secs.unwrap_or(base.max_backoff_secs),
            motion_debounce_secs: self
                .motion_debounce_secs
                .unwrap_or(base.motion_debounce_secs),
            rejoin_threshold: self.rejoin_threshold.unwrap_or(base.rejoin_threshold),
            uplink_port: self.uplink_port.unwrap_or(base.uplink_port),
            confirmed_uplinks: self.confirmed_uplinks.unwrap_or(base.confirmed_uplinks),
            motion_level: self.motion_level.unwrap_or(base.motion_level),
            region,
            sub_band,
            loop_tick: self
                .loop_tick_ms
                .map(std::time::Duration::from_millis)
                .unwrap_or(base.loop_tick),
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse the credential section, if present.
    pub fn credentials(&self) -> Option<Result<Credentials, ConfigError>> {
        self.credentials.as_ref().map(|c| {
            Credentials::from_hex(&c.join_eui, &c.dev_eui, &c.app_key, &c.nwk_key)
        })
    }
}
