//! LoRaWAN session owner.
//!
//! [`RadioLink`] wraps a [`LoRaWanMac`] and the node's [`Credentials`] and
//! exposes join/send as deterministic operations. It keeps the live
//! [`NodeSession`] facts (joined flag, RSSI/SNR, sticky error code) and
//! publishes downlinks as [`DownlinkEvent`]s on a broadcast channel.
//!
//! # Usage
//!
//! ```ignore
//! let mut link = RadioLink::new(mac, Credentials::from_build_env());
//! let mut downlinks = link.subscribe_downlinks();
//!
//! link.join()?;
//! let ack = link.send(&payload.encode(), 1, true)?;
//!
//! while let Ok(event) = downlinks.try_recv() {
//!     // application layer handles commands
//! }
//! ```

use super::mac::{
    describe_error, LoRaWanMac, MacError, ERR_INVALID_CREDENTIALS, ERR_INVALID_PACKET_LENGTH,
    ERR_NETWORK_NOT_JOINED, ERR_NONE,
};
use super::RadioSettings;
use crate::config::{ConfigError, Credentials};
use crate::state::NodeSession;
use log::{debug, info, warn};
use std::fmt;
use tokio::sync::broadcast;

/// Buffered downlink events per subscriber.
const DOWNLINK_CHANNEL_CAPACITY: usize = 8;

/// Successful join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Joined {
    /// The session was already active; no radio I/O happened.
    pub already_joined: bool,
}

/// Successful uplink.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ack {
    /// RSSI of the exchange (dBm).
    pub rssi: f32,
    /// SNR of the exchange (dB).
    pub snr: f32,
    /// A downlink arrived in the receive window.
    pub downlink: bool,
}

/// Downlink published to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownlinkEvent {
    pub port: u8,
    pub payload: Vec<u8>,
}

/// RadioLink errors.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkError {
    /// Send attempted without an active session.
    NotJoined,
    /// Credentials could not be loaded.
    Configuration(ConfigError),
    /// The MAC library reported a failure.
    Transport(MacError),
    /// Payload exceeds the region's limit.
    PayloadTooLarge { size: usize, max: usize },
    /// Nothing to send.
    EmptyPayload,
}

impl LinkError {
    /// Signed status code, as kept in `last_error_code`.
    pub fn code(&self) -> i32 {
        match self {
            Self::NotJoined => ERR_NETWORK_NOT_JOINED,
            Self::Configuration(_) => ERR_INVALID_CREDENTIALS,
            Self::Transport(e) => e.code(),
            Self::PayloadTooLarge { .. } | Self::EmptyPayload => ERR_INVALID_PACKET_LENGTH,
        }
    }
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotJoined => write!(f, "{}", describe_error(ERR_NETWORK_NOT_JOINED)),
            Self::Configuration(e) => write!(f, "credentials: {}", e),
            Self::Transport(e) => write!(f, "{}", e),
            Self::PayloadTooLarge { size, max } => {
                write!(f, "payload too large: {} bytes (max {})", size, max)
            }
            Self::EmptyPayload => write!(f, "empty payload"),
        }
    }
}

impl std::error::Error for LinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Configuration(e) => Some(e),
            Self::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<MacError> for LinkError {
    fn from(e: MacError) -> Self {
        Self::Transport(e)
    }
}

/// Owner of the LoRaWAN session.
pub struct RadioLink<M: LoRaWanMac> {
    mac: M,
    credentials: Result<Credentials, ConfigError>,
    settings: RadioSettings,
    configured: bool,
    session: NodeSession,
    max_payload_len: usize,
    downlinks: broadcast::Sender<DownlinkEvent>,
    radio_operations: u64,
}

impl<M: LoRaWanMac> RadioLink<M> {
    /// Create a link. Malformed credentials are kept as the error and
    /// reported on every join attempt.
    pub fn new(mac: M, credentials: Result<Credentials, ConfigError>) -> Self {
        if let Err(e) = &credentials {
            warn!("LoRaWAN credentials invalid: {}", e);
        }
        let (downlinks, _) = broadcast::channel(DOWNLINK_CHANNEL_CAPACITY);
        let settings = RadioSettings::default();
        Self {
            mac,
            credentials,
            settings,
            configured: false,
            session: NodeSession::default(),
            max_payload_len: settings.region.max_payload_len(),
            downlinks,
            radio_operations: 0,
        }
    }

    /// Radio setup for the MAC, applied before the first join. Also limits
    /// uplinks to the region's payload size.
    pub fn with_radio_settings(mut self, settings: RadioSettings) -> Self {
        self.settings = settings;
        self.configured = false;
        self.max_payload_len = settings.region.max_payload_len();
        self
    }

    /// Override the uplink size limit.
    pub fn with_max_payload_len(mut self, max: usize) -> Self {
        self.max_payload_len = max;
        self
    }

    pub fn radio_settings(&self) -> &RadioSettings {
        &self.settings
    }

    /// Seed link quality and error code from retained memory.
    ///
    /// The MAC session does not survive deep sleep, so the link stays
    /// unjoined.
    pub fn restore(&mut self, retained: &NodeSession) {
        self.session = NodeSession {
            joined: false,
            ..*retained
        };
    }

    /// Join the network (OTAA). No-op success when already joined.
    pub fn join(&mut self) -> Result<Joined, LinkError> {
        if self.session.joined {
            return Ok(Joined {
                already_joined: true,
            });
        }

        let credentials = match &self.credentials {
            Ok(c) => c,
            Err(e) => {
                let err = LinkError::Configuration(e.clone());
                self.session.last_error_code = err.code();
                return Err(err);
            }
        };

        info!("Joining network (DevEUI {})", credentials.dev_eui_hex());
        self.radio_operations += 1;
        if !self.configured {
            if let Err(e) = self.mac.configure(&self.settings) {
                self.session.last_error_code = e.code();
                warn!("Radio setup failed: {}", e);
                return Err(LinkError::Transport(e));
            }
            self.configured = true;
        }
        match self.mac.join_otaa(credentials) {
            Ok(()) => {
                let quality = self.mac.link_quality();
                self.session.joined = true;
                self.session.last_rssi = quality.rssi;
                self.session.last_snr = quality.snr;
                self.session.last_error_code = ERR_NONE;
                info!("Joined (RSSI {:.0} dBm, SNR {:.1} dB)", quality.rssi, quality.snr);
                Ok(Joined {
                    already_joined: false,
                })
            }
            Err(e) => {
                self.session.last_error_code = e.code();
                warn!("Join failed: {}", e);
                Err(LinkError::Transport(e))
            }
        }
    }

    /// Send an uplink and process the receive windows.
    ///
    /// A radio failure does not clear the session.
    pub fn send(&mut self, payload: &[u8], port: u8, confirmed: bool) -> Result<Ack, LinkError> {
        if !self.session.joined {
            self.session.last_error_code = ERR_NETWORK_NOT_JOINED;
            return Err(LinkError::NotJoined);
        }
        if payload.is_empty() {
            return Err(LinkError::EmptyPayload);
        }
        if payload.len() > self.max_payload_len {
            return Err(LinkError::PayloadTooLarge {
                size: payload.len(),
                max: self.max_payload_len,
            });
        }

        debug!("Uplink {} bytes on port {} (confirmed: {})", payload.len(), port, confirmed);
        self.radio_operations += 1;
        match self.mac.send_receive(payload, port, confirmed) {
            Ok(downlink) => {
                let quality = self.mac.link_quality();
                self.session.last_rssi = quality.rssi;
                self.session.last_snr = quality.snr;
                self.session.last_error_code = ERR_NONE;

                let has_downlink = downlink.is_some();
                if let Some(downlink) = downlink {
                    self.receive_callback(&downlink.payload, downlink.port);
                }
                Ok(Ack {
                    rssi: quality.rssi,
                    snr: quality.snr,
                    downlink: has_downlink,
                })
            }
            Err(e) => {
                self.session.last_error_code = e.code();
                warn!("Uplink failed: {}", e);
                Err(LinkError::Transport(e))
            }
        }
    }

    /// Publish a downlink received in an uplink's receive window.
    pub fn receive_callback(&self, payload: &[u8], port: u8) {
        info!("Downlink on port {}: {} bytes", port, payload.len());
        let event = DownlinkEvent {
            port,
            payload: payload.to_vec(),
        };
        // No subscribers is fine: the frame is only logged.
        if self.downlinks.send(event).is_err() {
            debug!("Downlink dropped, no subscribers");
        }
    }

    /// Receive future downlink events.
    pub fn subscribe_downlinks(&self) -> broadcast::Receiver<DownlinkEvent> {
        self.downlinks.subscribe()
    }

    /// Pump the MAC's pending work.
    pub fn poll_events(&mut self) {
        self.mac.handle_events();
    }

    /// Drop the session so the next join performs a fresh OTAA exchange.
    pub fn reset_session(&mut self) {
        if self.session.joined {
            info!("Dropping LoRaWAN session");
        }
        self.session.joined = false;
    }

    pub fn is_joined(&self) -> bool {
        self.session.joined
    }

    /// Most recent join/send status (0 after a success).
    pub fn last_error_code(&self) -> i32 {
        self.session.last_error_code
    }

    pub fn last_rssi(&self) -> f32 {
        self.session.last_rssi
    }

    pub fn last_snr(&self) -> f32 {
        self.session.last_snr
    }

    /// Snapshot for persistence.
    pub fn session(&self) -> NodeSession {
        self.session
    }

    /// Number of calls made into the MAC's join/send.
    pub fn radio_operations(&self) -> u64 {
        self.radio_operations
    }

    pub fn mac(&self) -> &M {
        &self.mac
    }

    pub fn mac_mut(&mut self) -> &mut M {
        &mut self.mac
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lora::mac::{Downlink, ERR_INVALID_HEADER, ERR_INVALID_STATE, ERR_NO_JOIN_ACCEPT};
    use crate::lora::Region;
    use crate::lora::simulated::SimulatedMac;

    fn credentials() -> Result<Credentials, ConfigError> {
        Credentials::from_hex(
            "70B3D57ED8004069",
            "70B3D57ED8004069",
            "0EF9A3826DD27B1F46D82048EE598998",
            "0EF9A3826DD27B1F46D82048EE598998",
        )
    }

    fn joined_link() -> RadioLink<SimulatedMac> {
        let mut link = RadioLink::new(SimulatedMac::new(), credentials());
        link.join().unwrap();
        link
    }

    #[test]
    fn test_join_success() {
        let mut link = RadioLink::new(SimulatedMac::new(), credentials());
        assert!(!link.is_joined());

        let joined = link.join().unwrap();
        assert!(!joined.already_joined);
        assert!(link.is_joined());
        assert_eq!(link.last_error_code(), 0);
        assert_eq!(link.radio_operations(), 1);
    }

    #[test]
    fn test_first_join_configures_radio() {
        let settings = RadioSettings::new(Region::Au915, 3);
        let mut link =
            RadioLink::new(SimulatedMac::new(), credentials()).with_radio_settings(settings);
        assert!(link.mac().settings().is_none());

        link.join().unwrap();
        assert_eq!(link.mac().settings(), Some(&settings));
        assert_eq!(link.send(&[0u8; 51], 1, false).map(|_| ()), Ok(()));
        assert_eq!(
            link.send(&[0u8; 52], 1, false),
            Err(LinkError::PayloadTooLarge { size: 52, max: 51 })
        );
    }

    #[test]
    fn test_rejected_settings_block_join() {
        let settings = RadioSettings::new(Region::Us915, 9);
        let mut link =
            RadioLink::new(SimulatedMac::new(), credentials()).with_radio_settings(settings);

        let err = link.join().unwrap_err();
        assert_eq!(err.code(), ERR_INVALID_STATE);
        assert!(!link.is_joined());
        assert_eq!(link.mac().join_attempts(), 0);
    }

    #[test]
    fn test_join_is_idempotent() {
        let mut link = joined_link();
        let joined = link.join().unwrap();
        assert!(joined.already_joined);
        assert_eq!(link.radio_operations(), 1);
        assert_eq!(link.mac().join_attempts(), 1);
    }

    #[test]
    fn test_join_failure_keeps_unjoined() {
        let mut mac = SimulatedMac::new();
        mac.script_join(Err(MacError::new(ERR_NO_JOIN_ACCEPT)));
        let mut link = RadioLink::new(mac, credentials());

        let err = link.join().unwrap_err();
        assert_eq!(err.code(), ERR_NO_JOIN_ACCEPT);
        assert!(!link.is_joined());
        assert_eq!(link.last_error_code(), ERR_NO_JOIN_ACCEPT);
    }

    #[test]
    fn test_bad_credentials_fail_without_io() {
        let bad = Credentials::from_hex("zz", "", "", "");
        let mut link = RadioLink::new(SimulatedMac::new(), bad);

        for _ in 0..3 {
            let err = link.join().unwrap_err();
            assert!(matches!(err, LinkError::Configuration(_)));
        }
        assert_eq!(link.last_error_code(), ERR_INVALID_CREDENTIALS);
        assert_eq!(link.radio_operations(), 0);
    }

    #[test]
    fn test_send_not_joined_no_io() {
        let mut link = RadioLink::new(SimulatedMac::new(), credentials());
        let before = link.radio_operations();

        let err = link.send(&[1, 2, 3], 1, true).unwrap_err();
        assert_eq!(err, LinkError::NotJoined);
        assert_eq!(link.radio_operations(), before);
        assert_eq!(link.last_error_code(), ERR_NETWORK_NOT_JOINED);
        assert!(link.mac().uplinks().is_empty());
    }

    #[test]
    fn test_send_updates_link_quality() {
        let mut link = joined_link();
        link.mac_mut().set_link_quality(-101.0, -3.5);

        let ack = link.send(&[0u8; 8], 1, true).unwrap();
        assert_eq!(ack.rssi, -101.0);
        assert_eq!(link.last_rssi(), -101.0);
        assert_eq!(link.last_snr(), -3.5);
        assert!(!ack.downlink);
        assert_eq!(link.mac().uplinks().len(), 1);
    }

    #[test]
    fn test_send_failure_keeps_session() {
        let mut link = joined_link();
        link.mac_mut().script_send(Err(MacError::new(ERR_INVALID_HEADER)));

        let err = link.send(&[0u8; 8], 1, true).unwrap_err();
        assert_eq!(err.code(), ERR_INVALID_HEADER);
        assert!(link.is_joined());
        assert_eq!(link.last_error_code(), ERR_INVALID_HEADER);

        // Sticky until the next operation
        assert_eq!(link.last_error_code(), ERR_INVALID_HEADER);
        link.send(&[0u8; 8], 1, true).unwrap();
        assert_eq!(link.last_error_code(), 0);
    }

    #[test]
    fn test_payload_limits() {
        let mut link = joined_link().with_max_payload_len(11);
        assert_eq!(link.send(&[], 1, false), Err(LinkError::EmptyPayload));
        assert_eq!(
            link.send(&[0u8; 12], 1, false),
            Err(LinkError::PayloadTooLarge { size: 12, max: 11 })
        );
        assert_eq!(link.radio_operations(), 1);
    }

    #[test]
    fn test_downlink_published() {
        let mut link = joined_link();
        let mut rx = link.subscribe_downlinks();
        link.mac().downlink_queue().push(Downlink {
            port: 10,
            payload: vec![0x02, 0x02],
        });

        let ack = link.send(&[0u8; 8], 1, true).unwrap();
        assert!(ack.downlink);
        let event = rx.try_recv().unwrap();
        assert_eq!(event.port, 10);
        assert_eq!(event.payload, vec![0x02, 0x02]);
    }

    #[test]
    fn test_receive_without_subscribers() {
        let link = joined_link();
        link.receive_callback(&[1], 5);
    }

    #[test]
    fn test_restore_never_joined() {
        let mut link = RadioLink::new(SimulatedMac::new(), credentials());
        link.restore(&NodeSession {
            joined: true,
            last_rssi: -90.0,
            last_snr: 4.0,
            last_error_code: -1106,
        });
        assert!(!link.is_joined());
        assert_eq!(link.last_rssi(), -90.0);
        assert_eq!(link.last_error_code(), -1106);
    }

    #[test]
    fn test_reset_session() {
        let mut link = joined_link();
        link.reset_session();
        assert!(!link.is_joined());
        link.join().unwrap();
        assert_eq!(link.mac().join_attempts(), 2);
    }
}
