//! Uplink payload and downlink commands.
//!
//! # Uplink Format
//!
//! Fixed 8 bytes, big-endian:
//!
//! | Offset | Field | Encoding |
//! |--------|-------|----------|
//! | 0-1 | temperature x10 (°C) | i16 |
//! | 2-3 | humidity x10 (%) | i16 |
//! | 4-5 | pressure /10 (hPa) | i16 |
//! | 6 | flags | u8 |
//! | 7 | reserved | u8 |
//!
//! Scaling truncates toward zero, so pressure only survives to 10 hPa
//! (1013.25 hPa is sent as 101 and decodes to 1010). The network-side
//! decoders depend on this exact packing.
//!
//! # Downlink Commands
//!
//! | Bytes | Command |
//! |-------|---------|
//! | `01 xx hh mm ll` | set base interval to the 24-bit seconds value |
//! | `02 01` | restart |
//! | `02 02` | take a reading and send it now |

use crate::sensor::EnvironmentReading;
use std::fmt;

/// Flags bit0: uplink was triggered by motion.
pub const FLAG_MOTION: u8 = 0x01;

/// Flags bit1: sensor unavailable, values are a zeroed placeholder.
pub const FLAG_PLACEHOLDER: u8 = 0x02;

/// Encoded sensor uplink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UplinkPayload {
    temperature_x10: i16,
    humidity_x10: i16,
    pressure_div10: i16,
    flags: u8,
}

impl UplinkPayload {
    /// Encoded size in bytes.
    pub const LEN: usize = 8;

    /// Pack a reading. Out-of-range values saturate at the i16 limits.
    pub fn from_reading(reading: &EnvironmentReading, motion: bool) -> Self {
        Self {
            temperature_x10: (reading.temperature * 10.0) as i16,
            humidity_x10: (reading.humidity * 10.0) as i16,
            pressure_div10: (reading.pressure / 10.0) as i16,
            flags: if motion { FLAG_MOTION } else { 0 },
        }
    }

    /// Zeroed payload marking a missing sensor.
    pub fn placeholder(motion: bool) -> Self {
        Self {
            temperature_x10: 0,
            humidity_x10: 0,
            pressure_div10: 0,
            flags: FLAG_PLACEHOLDER | if motion { FLAG_MOTION } else { 0 },
        }
    }

    pub fn encode(&self) -> [u8; Self::LEN] {
        let t = self.temperature_x10.to_be_bytes();
        let h = self.humidity_x10.to_be_bytes();
        let p = self.pressure_div10.to_be_bytes();
        [t[0], t[1], h[0], h[1], p[0], p[1], self.flags, 0]
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, PayloadError> {
        if bytes.len() != Self::LEN {
            return Err(PayloadError::InvalidLength(bytes.len()));
        }
        Ok(Self {
            temperature_x10: i16::from_be_bytes([bytes[0], bytes[1]]),
            humidity_x10: i16::from_be_bytes([bytes[2], bytes[3]]),
            pressure_div10: i16::from_be_bytes([bytes[4], bytes[5]]),
            flags: bytes[6],
        })
    }

    /// Temperature in °C (0.1 resolution).
    pub fn temperature(&self) -> f32 {
        self.temperature_x10 as f32 / 10.0
    }

    /// Relative humidity in % (0.1 resolution).
    pub fn humidity(&self) -> f32 {
        self.humidity_x10 as f32 / 10.0
    }

    /// Pressure in hPa (10 hPa resolution).
    pub fn pressure(&self) -> f32 {
        self.pressure_div10 as f32 * 10.0
    }

    pub fn motion(&self) -> bool {
        self.flags & FLAG_MOTION != 0
    }

    pub fn is_placeholder(&self) -> bool {
        self.flags & FLAG_PLACEHOLDER != 0
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }
}

impl fmt::Display for UplinkPayload {
    /// Space-separated upper-case hex, as shown on the serial console.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.encode();
        for (i, b) in bytes.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{:02X}", b)?;
        }
        Ok(())
    }
}

/// Payload decoding errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    /// Buffer is not exactly [`UplinkPayload::LEN`] bytes.
    InvalidLength(usize),
}

impl fmt::Display for PayloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidLength(len) => write!(
                f,
                "payload is {} bytes, expected {}",
                len,
                UplinkPayload::LEN
            ),
        }
    }
}

impl std::error::Error for PayloadError {}

/// Command carried by a downlink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownlinkCommand {
    /// Change the base transmission interval (seconds).
    SetInterval(u32),
    /// Reboot the node.
    Restart,
    /// Take a reading and send it immediately.
    ForceReading,
    /// Anything else. Logged and ignored.
    Unknown(Vec<u8>),
}

const CMD_CONFIG: u8 = 0x01;
const CMD_ACTION: u8 = 0x02;
const ACTION_RESTART: u8 = 0x01;
const ACTION_FORCE_READING: u8 = 0x02;

impl DownlinkCommand {
    pub fn parse(payload: &[u8]) -> Self {
        match payload {
            // Byte 1 is the config key; only the interval exists.
            [CMD_CONFIG, _, hi, mid, lo] => {
                Self::SetInterval(u32::from_be_bytes([0, *hi, *mid, *lo]))
            }
            [CMD_ACTION, ACTION_RESTART] => Self::Restart,
            [CMD_ACTION, ACTION_FORCE_READING] => Self::ForceReading,
            other => Self::Unknown(other.to_vec()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(temperature: f32, humidity: f32, pressure: f32) -> EnvironmentReading {
        EnvironmentReading {
            temperature,
            humidity,
            pressure,
            available: true,
        }
    }

    #[test]
    fn test_reference_vector() {
        let payload = UplinkPayload::from_reading(&reading(22.5, 45.0, 1013.25), false);
        assert_eq!(
            payload.encode(),
            [0x00, 0xE1, 0x01, 0xC2, 0x00, 0x65, 0x00, 0x00]
        );

        let decoded = UplinkPayload::decode(&payload.encode()).unwrap();
        assert_eq!(decoded.temperature(), 22.5);
        assert_eq!(decoded.humidity(), 45.0);
        assert_eq!(decoded.pressure(), 1010.0);
        assert!(!decoded.motion());
    }

    #[test]
    fn test_motion_flag() {
        let payload = UplinkPayload::from_reading(&reading(20.0, 50.0, 1000.0), true);
        let bytes = payload.encode();
        assert_eq!(bytes[6], FLAG_MOTION);
        assert_eq!(bytes[7], 0);
        assert!(UplinkPayload::decode(&bytes).unwrap().motion());
    }

    #[test]
    fn test_negative_temperature() {
        let payload = UplinkPayload::from_reading(&reading(-12.5, 80.0, 990.0), false);
        let bytes = payload.encode();
        // -125 = 0xFF83
        assert_eq!(&bytes[0..2], &[0xFF, 0x83]);
        let decoded = UplinkPayload::decode(&bytes).unwrap();
        assert_eq!(decoded.temperature(), -12.5);
    }

    #[test]
    fn test_out_of_range_saturates() {
        let payload = UplinkPayload::from_reading(&reading(5000.0, 0.0, 0.0), false);
        assert_eq!(&payload.encode()[0..2], &i16::MAX.to_be_bytes());
    }

    #[test]
    fn test_placeholder() {
        let payload = UplinkPayload::placeholder(true);
        assert_eq!(payload.encode(), [0, 0, 0, 0, 0, 0, 0x03, 0]);
        assert!(payload.is_placeholder());
        assert!(payload.motion());
    }

    #[test]
    fn test_decode_wrong_length() {
        assert_eq!(
            UplinkPayload::decode(&[0u8; 7]),
            Err(PayloadError::InvalidLength(7))
        );
    }

    #[test]
    fn test_hex_display() {
        let payload = UplinkPayload::from_reading(&reading(22.5, 45.0, 1013.25), false);
        assert_eq!(payload.to_string(), "00 E1 01 C2 00 65 00 00");
    }

    #[test]
    fn test_parse_set_interval() {
        assert_eq!(
            DownlinkCommand::parse(&[0x01, 0x01, 0x00, 0x01, 0x2C]),
            DownlinkCommand::SetInterval(300)
        );
        assert_eq!(
            DownlinkCommand::parse(&[0x01, 0x01, 0x01, 0x00, 0x00]),
            DownlinkCommand::SetInterval(65_536)
        );
    }

    #[test]
    fn test_parse_actions() {
        assert_eq!(DownlinkCommand::parse(&[0x02, 0x01]), DownlinkCommand::Restart);
        assert_eq!(
            DownlinkCommand::parse(&[0x02, 0x02]),
            DownlinkCommand::ForceReading
        );
    }

    #[test]
    fn test_parse_unknown() {
        assert_eq!(
            DownlinkCommand::parse(&[0x02, 0x07]),
            DownlinkCommand::Unknown(vec![0x02, 0x07])
        );
        assert_eq!(
            DownlinkCommand::parse(&[0x01, 0x01, 0x00]),
            DownlinkCommand::Unknown(vec![0x01, 0x01, 0x00])
        );
        assert_eq!(DownlinkCommand::parse(&[]), DownlinkCommand::Unknown(vec![]));
    }
}

#[cfg(feature = "tap-tests")]
mod tap_tests {
    use super::*;
    use lora_sensor_node_macros::tap_test;

    #[tap_test]
    fn payload_reference_vector() {
        let reading = EnvironmentReading {
            temperature: 22.5,
            humidity: 45.0,
            pressure: 1013.25,
            available: true,
        };
        let bytes = UplinkPayload::from_reading(&reading, false).encode();
        assert_eq!(bytes, [0x00, 0xE1, 0x01, 0xC2, 0x00, 0x65, 0x00, 0x00]);
    }

    #[tap_test]
    fn payload_decode_rejects_short_buffer() -> crate::testing::TestResult {
        match UplinkPayload::decode(&[0u8; 4]) {
            Err(PayloadError::InvalidLength(4)) => Ok(()),
            other => Err(format!("unexpected: {:?}", other).into()),
        }
    }

    #[tap_test]
    fn downlink_restart_parsed() {
        assert_eq!(DownlinkCommand::parse(&[0x02, 0x01]), DownlinkCommand::Restart);
    }
}
