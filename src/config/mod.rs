//! Node configuration.
//!
//! - [`NodeConfig`]: scheduling and radio policy settings (host-testable)
//! - [`Credentials`]: LoRaWAN OTAA key material parsed from hex strings
//! - [`ConfigFile`]: optional JSON overrides (host builds only)

mod credentials;
#[cfg(not(target_os = "espidf"))]
mod file;

pub use credentials::{Credentials, EUI_HEX_LEN, KEY_HEX_LEN, KEY_LEN};
#[cfg(not(target_os = "espidf"))]
pub use file::{ConfigFile, CredentialStrings, SimulationSettings};

use crate::lora::{RadioSettings, Region};
use std::fmt;
use std::time::Duration;

/// Minimum time between transmissions (seconds). Also the sleep duration.
pub const DEFAULT_BASE_INTERVAL_SECS: u32 = 120;

/// Upper bound for the failure backoff (seconds, 1 hour).
pub const DEFAULT_MAX_BACKOFF_SECS: u32 = 3600;

/// Debounce floor for motion-triggered sends (seconds).
pub const MOTION_DEBOUNCE_SECS: u32 = 10;

/// Rejoin escalates once consecutive errors exceed this count.
pub const DEFAULT_REJOIN_THRESHOLD: u32 = 3;

/// Application port for sensor uplinks.
pub const DEFAULT_UPLINK_PORT: u8 = 1;

/// Cooperative loop delay between iterations.
pub const DEFAULT_LOOP_TICK: Duration = Duration::from_millis(10);

/// Largest base interval a downlink may request (24-bit field).
pub const MAX_BASE_INTERVAL_SECS: u32 = 0x00FF_FFFF;

/// Active level of the PIR motion sensor output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(
    not(target_os = "espidf"),
    derive(serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub enum MotionLevel {
    /// Motion drives the pin high.
    #[default]
    ActiveHigh,
    /// Motion pulls the pin low.
    ActiveLow,
}

impl MotionLevel {
    /// Whether a raw pin level means "motion present".
    pub fn is_active(self, pin_high: bool) -> bool {
        match self {
            Self::ActiveHigh => pin_high,
            Self::ActiveLow => !pin_high,
        }
    }

    /// Pin level (0 or 1) that should wake the node from deep sleep.
    pub fn wake_level(self) -> u8 {
        match self {
            Self::ActiveHigh => 1,
            Self::ActiveLow => 0,
        }
    }
}

/// Scheduling and radio policy for the node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeConfig {
    /// Interval between scheduled uplinks and the deep-sleep duration.
    pub base_interval_secs: u32,
    /// Cap for the exponential failure backoff.
    pub max_backoff_secs: u32,
    /// Minimum spacing between a previous send and a motion send.
    pub motion_debounce_secs: u32,
    /// Rejoin escalates when consecutive errors exceed this.
    pub rejoin_threshold: u32,
    /// LoRaWAN FPort for sensor uplinks.
    pub uplink_port: u8,
    /// Request network acknowledgement for uplinks.
    pub confirmed_uplinks: bool,
    /// PIR output polarity.
    pub motion_level: MotionLevel,
    /// Frequency plan.
    pub region: Region,
    /// Sub-band for US915/AU915 (1-8), ignored elsewhere.
    pub sub_band: u8,
    /// Delay between cooperative loop iterations.
    pub loop_tick: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let region = Region::default();
        Self {
            base_interval_secs: DEFAULT_BASE_INTERVAL_SECS,
            max_backoff_secs: DEFAULT_MAX_BACKOFF_SECS,
            motion_debounce_secs: MOTION_DEBOUNCE_SECS,
            rejoin_threshold: DEFAULT_REJOIN_THRESHOLD,
            uplink_port: DEFAULT_UPLINK_PORT,
            confirmed_uplinks: true,
            motion_level: MotionLevel::default(),
            region,
            sub_band: region.default_sub_band(),
            loop_tick: DEFAULT_LOOP_TICK,
        }
    }
}

impl NodeConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_interval_secs == 0 {
            return Err(ConfigError::InvalidConfig("base_interval_secs must be > 0"));
        }
        if self.base_interval_secs > MAX_BASE_INTERVAL_SECS {
            return Err(ConfigError::InvalidConfig(
                "base_interval_secs must fit in 24 bits",
            ));
        }
        if self.max_backoff_secs < self.base_interval_secs {
            return Err(ConfigError::InvalidConfig(
                "max_backoff_secs must be >= base_interval_secs",
            ));
        }
        if self.motion_debounce_secs < MOTION_DEBOUNCE_SECS {
            return Err(ConfigError::InvalidConfig(
                "motion_debounce_secs must be >= 10",
            ));
        }
        if self.uplink_port == 0 || self.uplink_port > 223 {
            return Err(ConfigError::InvalidConfig("uplink_port must be in 1..=223"));
        }
        if !self.radio_settings().is_valid() {
            return Err(ConfigError::InvalidConfig(
                "sub_band must be in 1..=8 for US915/AU915, 0 otherwise",
            ));
        }
        Ok(())
    }

    /// Copy of this config with a new base interval, validated.
    ///
    /// Used when the network server pushes a new reporting interval.
    pub fn with_base_interval(&self, secs: u32) -> Result<Self, ConfigError> {
        let updated = Self {
            base_interval_secs: secs,
            ..self.clone()
        };
        updated.validate()?;
        Ok(updated)
    }

    /// Radio setup handed to the LoRaWAN stack.
    pub fn radio_settings(&self) -> RadioSettings {
        RadioSettings::new(self.region, self.sub_band)
    }

    /// Base interval as milliseconds.
    pub fn base_interval_ms(&self) -> u64 {
        self.base_interval_secs as u64 * 1000
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A credential field contains non-hex characters.
    InvalidHex { field: &'static str },
    /// A credential field has the wrong number of hex characters.
    InvalidLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    /// A policy value is out of range.
    InvalidConfig(&'static str),
    /// A config file could not be read or parsed.
    File(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidHex { field } => write!(f, "{} is not valid hex", field),
            Self::InvalidLength {
                field,
                expected,
                actual,
            } => write!(
                f,
                "{} must be {} hex chars, got {}",
                field, expected, actual
            ),
            Self::InvalidConfig(msg) => write!(f, "invalid config: {}", msg),
            Self::File(msg) => write!(f, "config file: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = NodeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.base_interval_secs, 120);
        assert_eq!(config.max_backoff_secs, 3600);
        assert_eq!(config.motion_debounce_secs, 10);
        assert_eq!(config.uplink_port, 1);
        assert!(config.confirmed_uplinks);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = NodeConfig {
            base_interval_secs: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_backoff_below_interval_rejected() {
        let config = NodeConfig {
            base_interval_secs: 600,
            max_backoff_secs: 300,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debounce_floor_enforced() {
        let config = NodeConfig {
            motion_debounce_secs: 5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_port_range() {
        for port in [0u8, 224, 255] {
            let config = NodeConfig {
                uplink_port: port,
                ..Default::default()
            };
            assert!(config.validate().is_err(), "port {} accepted", port);
        }
    }

    #[test]
    fn test_sub_band_matches_region() {
        let config = NodeConfig {
            region: Region::Us915,
            sub_band: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = NodeConfig {
            region: Region::Eu868,
            sub_band: 0,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.radio_settings().region, Region::Eu868);

        let config = NodeConfig {
            region: Region::Eu868,
            sub_band: 2,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_with_base_interval() {
        let config = NodeConfig::default();
        let updated = config.with_base_interval(300).unwrap();
        assert_eq!(updated.base_interval_secs, 300);
        assert_eq!(updated.base_interval_ms(), 300_000);

        // Above max backoff
        assert!(config.with_base_interval(7200).is_err());
        assert!(config.with_base_interval(0).is_err());
    }

    #[test]
    fn test_motion_level() {
        assert!(MotionLevel::ActiveHigh.is_active(true));
        assert!(!MotionLevel::ActiveHigh.is_active(false));
        assert!(MotionLevel::ActiveLow.is_active(false));
        assert_eq!(MotionLevel::ActiveHigh.wake_level(), 1);
        assert_eq!(MotionLevel::ActiveLow.wake_level(), 0);
    }

    #[test]
    fn test_error_display() {
        let err = ConfigError::InvalidLength {
            field: "app_key",
            expected: 32,
            actual: 30,
        };
        assert_eq!(err.to_string(), "app_key must be 32 hex chars, got 30");
    }
}
