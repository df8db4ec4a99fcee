//! LoRaWAN region configuration.
//!
//! The node selects a frequency plan, sub-band and initial radio
//! parameters and hands them to the stack as [`RadioSettings`]; channel
//! plans and MAC timing belong to the stack.

use std::time::Duration;

/// Frequency plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    not(target_os = "espidf"),
    derive(serde::Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum Region {
    /// US 902-928 MHz band (8 sub-bands of 8 channels)
    Us915,
    /// EU 863-870 MHz band (1% duty cycle)
    Eu868,
    /// Australia 915-928 MHz (8 sub-bands)
    Au915,
    /// Asia 920-923 MHz
    As923,
}

impl Region {
    /// Human-readable band name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Us915 => "US915",
            Self::Eu868 => "EU868",
            Self::Au915 => "AU915",
            Self::As923 => "AS923",
        }
    }

    /// Whether the plan is split into selectable sub-bands.
    pub fn uses_sub_bands(self) -> bool {
        matches!(self, Self::Us915 | Self::Au915)
    }

    /// Sub-band used by most public networks (TTN, Helium) for this plan.
    ///
    /// Returns 0 for plans without sub-bands.
    pub fn default_sub_band(self) -> u8 {
        if self.uses_sub_bands() {
            2
        } else {
            0
        }
    }

    /// Largest application payload at the slowest data rate.
    pub fn max_payload_len(self) -> usize {
        match self {
            Self::Us915 => 11,
            Self::Au915 | Self::Eu868 | Self::As923 => 51,
        }
    }
}

impl Default for Region {
    fn default() -> Self {
        #[cfg(feature = "region-eu868")]
        return Self::Eu868;
        #[cfg(feature = "region-au915")]
        return Self::Au915;
        #[cfg(feature = "region-as923")]
        return Self::As923;
        #[cfg(not(any(
            feature = "region-eu868",
            feature = "region-au915",
            feature = "region-as923"
        )))]
        Self::Us915
    }
}

// ==================== Radio Parameters ====================
// Handed to the LoRaWAN stack at bring-up; ADR may change the data rate later.

/// Spreading factor for the first uplinks (SF7).
pub const SPREADING_FACTOR: u8 = 7;

/// TX power in dBm.
pub const TX_POWER: i8 = 14;

/// Upper bound the stack enforces on a join (join request + both RX windows).
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(60);

/// Radio setup applied to the stack before the first join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadioSettings {
    pub region: Region,
    /// 1-based sub-band, 0 for plans without sub-bands.
    pub sub_band: u8,
    pub spreading_factor: u8,
    pub tx_power_dbm: i8,
    pub join_timeout: Duration,
}

impl RadioSettings {
    pub fn new(region: Region, sub_band: u8) -> Self {
        Self {
            region,
            sub_band,
            spreading_factor: SPREADING_FACTOR,
            tx_power_dbm: TX_POWER,
            join_timeout: JOIN_TIMEOUT,
        }
    }

    /// Whether the sub-band is usable with the region.
    pub fn is_valid(&self) -> bool {
        if self.region.uses_sub_bands() {
            (1..=8).contains(&self.sub_band)
        } else {
            self.sub_band == 0
        }
    }
}

impl Default for RadioSettings {
    fn default() -> Self {
        let region = Region::default();
        Self::new(region, region.default_sub_band())
    }
}
