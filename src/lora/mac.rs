//! Boundary to the LoRaWAN MAC library.
//!
//! The node never touches PHY/MAC details. Everything it needs from the
//! stack is the [`LoRaWanMac`] trait: radio setup, an OTAA join, a blocking
//! uplink that returns any downlink from the receive windows, and link
//! quality of the last exchange. Errors are the stack's signed status codes.

use super::RadioSettings;
use crate::config::Credentials;
use std::borrow::Cow;
use std::fmt;

/// Success.
pub const ERR_NONE: i32 = 0;
/// Unspecified failure.
pub const ERR_UNKNOWN: i32 = -1;
/// MAC was in the wrong state for the request.
pub const ERR_INVALID_STATE: i32 = -2;
/// Secondary header not found.
pub const ERR_SECONDARY_HEADER: i32 = -3;
/// Malformed frame header.
pub const ERR_INVALID_HEADER: i32 = -4;
/// Frame length does not match the header.
pub const ERR_INVALID_PACKET_LENGTH: i32 = -5;
/// Uplink requested without an active session.
pub const ERR_NETWORK_NOT_JOINED: i32 = -1101;
/// No Join Accept in either receive window.
pub const ERR_NO_JOIN_ACCEPT: i32 = -1106;
/// Join Accept arrived without the channel list.
pub const ERR_CFLIST_MISSING: i32 = -1118;
/// Credentials could not be parsed. Produced by the node, not the MAC.
pub const ERR_INVALID_CREDENTIALS: i32 = -2001;

/// Human-readable text for a status code.
pub fn describe_error(code: i32) -> Cow<'static, str> {
    match code {
        ERR_NONE => Cow::Borrowed("No error"),
        ERR_UNKNOWN => Cow::Borrowed("Unknown error"),
        ERR_INVALID_STATE => Cow::Borrowed("Invalid state"),
        ERR_SECONDARY_HEADER => Cow::Borrowed("Secondary header not found"),
        ERR_INVALID_HEADER => Cow::Borrowed("Invalid header format"),
        ERR_INVALID_PACKET_LENGTH => Cow::Borrowed("Invalid packet length"),
        ERR_NETWORK_NOT_JOINED => Cow::Borrowed("Network not joined"),
        ERR_NO_JOIN_ACCEPT => Cow::Borrowed("Join Accept not received"),
        ERR_CFLIST_MISSING => Cow::Borrowed("CFList missing"),
        ERR_INVALID_CREDENTIALS => Cow::Borrowed("Invalid credentials"),
        other => Cow::Owned(format!("Error code: {}", other)),
    }
}

/// A failure reported by the MAC library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacError {
    code: i32,
}

impl MacError {
    pub fn new(code: i32) -> Self {
        Self { code }
    }

    /// Signed status code as returned by the stack.
    pub fn code(&self) -> i32 {
        self.code
    }
}

impl fmt::Display for MacError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", describe_error(self.code), self.code)
    }
}

impl std::error::Error for MacError {}

/// Radio measurement of the most recent exchange.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LinkQuality {
    /// RSSI in dBm.
    pub rssi: f32,
    /// SNR in dB.
    pub snr: f32,
}

/// Frame delivered in an uplink's receive window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Downlink {
    /// Application port.
    pub port: u8,
    /// Application payload.
    pub payload: Vec<u8>,
}

/// The LoRaWAN MAC as seen by the node.
///
/// Calls are synchronous and bounded by the stack's own timeouts.
pub trait LoRaWanMac {
    /// Apply region, sub-band and radio parameters. Called before the
    /// first join.
    fn configure(&mut self, settings: &RadioSettings) -> Result<(), MacError>;

    /// Run an OTAA join with the given credentials.
    fn join_otaa(&mut self, credentials: &Credentials) -> Result<(), MacError>;

    /// Send an uplink and wait out the receive windows.
    ///
    /// Returns the downlink received in RX1/RX2, if any.
    fn send_receive(
        &mut self,
        payload: &[u8],
        port: u8,
        confirmed: bool,
    ) -> Result<Option<Downlink>, MacError>;

    /// Signal quality of the last exchange.
    fn link_quality(&self) -> LinkQuality;

    /// Service pending stack work (timers, radio IRQs). Called once per loop.
    fn handle_events(&mut self) {}
}

impl<T: LoRaWanMac + ?Sized> LoRaWanMac for Box<T> {
    fn configure(&mut self, settings: &RadioSettings) -> Result<(), MacError> {
        (**self).configure(settings)
    }

    fn join_otaa(&mut self, credentials: &Credentials) -> Result<(), MacError> {
        (**self).join_otaa(credentials)
    }

    fn send_receive(
        &mut self,
        payload: &[u8],
        port: u8,
        confirmed: bool,
    ) -> Result<Option<Downlink>, MacError> {
        (**self).send_receive(payload, port, confirmed)
    }

    fn link_quality(&self) -> LinkQuality {
        (**self).link_quality()
    }

    fn handle_events(&mut self) {
        (**self).handle_events()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_codes_described() {
        assert_eq!(describe_error(ERR_NO_JOIN_ACCEPT), "Join Accept not received");
        assert_eq!(describe_error(ERR_CFLIST_MISSING), "CFList missing");
        assert_eq!(describe_error(ERR_INVALID_HEADER), "Invalid header format");
        assert_eq!(describe_error(-1), "Unknown error");
    }

    #[test]
    fn test_unknown_code_described() {
        assert_eq!(describe_error(-42), "Error code: -42");
    }

    #[test]
    fn test_mac_error_display() {
        let err = MacError::new(ERR_NO_JOIN_ACCEPT);
        assert_eq!(err.code(), -1106);
        assert_eq!(err.to_string(), "Join Accept not received (-1106)");
    }
}
