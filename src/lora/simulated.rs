//! In-memory LoRaWAN MAC for host runs and tests.
//!
//! Joins and uplinks succeed unless a result has been scripted or a random
//! failure rate is configured. Downlinks queued through a [`DownlinkQueue`]
//! are delivered on the next successful uplink, like a network server
//! answering in RX1.

use super::config::RadioSettings;
use super::mac::{
    Downlink, LinkQuality, LoRaWanMac, MacError, ERR_INVALID_STATE, ERR_NETWORK_NOT_JOINED,
    ERR_NO_JOIN_ACCEPT, ERR_UNKNOWN,
};
use crate::config::Credentials;
use log::debug;
use rand_core::{OsRng, RngCore};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Downlinks waiting for the next uplink. Cloneable across threads.
#[derive(Debug, Clone, Default)]
pub struct DownlinkQueue {
    inner: Arc<Mutex<VecDeque<Downlink>>>,
}

impl DownlinkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a downlink for the next successful uplink.
    pub fn push(&self, downlink: Downlink) {
        self.lock().push_back(downlink);
    }

    fn pop(&self) -> Option<Downlink> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Downlink>> {
        // A panicked holder cannot leave the queue half-updated
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// An uplink the simulated network received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentUplink {
    pub payload: Vec<u8>,
    pub port: u8,
    pub confirmed: bool,
}

/// Simulated MAC.
#[derive(Debug)]
pub struct SimulatedMac {
    settings: Option<RadioSettings>,
    joined: bool,
    join_script: VecDeque<Result<(), MacError>>,
    send_script: VecDeque<Result<(), MacError>>,
    join_failure_percent: u8,
    send_failure_percent: u8,
    quality: LinkQuality,
    downlinks: DownlinkQueue,
    join_attempts: u32,
    uplinks: Vec<SentUplink>,
    events_handled: u64,
}

impl Default for SimulatedMac {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedMac {
    pub fn new() -> Self {
        Self {
            settings: None,
            joined: false,
            join_script: VecDeque::new(),
            send_script: VecDeque::new(),
            join_failure_percent: 0,
            send_failure_percent: 0,
            quality: LinkQuality {
                rssi: -87.0,
                snr: 7.5,
            },
            downlinks: DownlinkQueue::new(),
            join_attempts: 0,
            uplinks: Vec::new(),
            events_handled: 0,
        }
    }

    /// Fail joins and uplinks at random with the given chances (0-100).
    pub fn with_failure_rates(mut self, join_percent: u8, send_percent: u8) -> Self {
        self.join_failure_percent = join_percent.min(100);
        self.send_failure_percent = send_percent.min(100);
        self
    }

    /// Deliver downlinks from an existing queue, so queued messages outlive
    /// this MAC instance.
    pub fn with_downlink_queue(mut self, queue: DownlinkQueue) -> Self {
        self.downlinks = queue;
        self
    }

    /// Result of the next join attempt. Scripted results are used in order.
    pub fn script_join(&mut self, result: Result<(), MacError>) {
        self.join_script.push_back(result);
    }

    /// Result of the next uplink.
    pub fn script_send(&mut self, result: Result<(), MacError>) {
        self.send_script.push_back(result);
    }

    pub fn set_link_quality(&mut self, rssi: f32, snr: f32) {
        self.quality = LinkQuality { rssi, snr };
    }

    /// Handle for queueing downlinks from elsewhere (stdin, tests).
    pub fn downlink_queue(&self) -> DownlinkQueue {
        self.downlinks.clone()
    }

    /// Settings from the last successful [`LoRaWanMac::configure`].
    pub fn settings(&self) -> Option<&RadioSettings> {
        self.settings.as_ref()
    }

    pub fn join_attempts(&self) -> u32 {
        self.join_attempts
    }

    pub fn uplinks(&self) -> &[SentUplink] {
        &self.uplinks
    }

    pub fn events_handled(&self) -> u64 {
        self.events_handled
    }

    fn roll(percent: u8) -> bool {
        percent > 0 && (OsRng.next_u32() % 100) < percent as u32
    }
}

impl LoRaWanMac for SimulatedMac {
    fn configure(&mut self, settings: &RadioSettings) -> Result<(), MacError> {
        if !settings.is_valid() {
            return Err(MacError::new(ERR_INVALID_STATE));
        }
        debug!(
            "SimulatedMac: {} sub-band {}, SF{}, {} dBm",
            settings.region.name(),
            settings.sub_band,
            settings.spreading_factor,
            settings.tx_power_dbm
        );
        self.settings = Some(*settings);
        Ok(())
    }

    fn join_otaa(&mut self, credentials: &Credentials) -> Result<(), MacError> {
        self.join_attempts += 1;
        debug!(
            "SimulatedMac: join #{} for {}",
            self.join_attempts,
            credentials.dev_eui_hex()
        );

        let result = match self.join_script.pop_front() {
            Some(scripted) => scripted,
            None if Self::roll(self.join_failure_percent) => {
                Err(MacError::new(ERR_NO_JOIN_ACCEPT))
            }
            None => Ok(()),
        };
        self.joined = result.is_ok();
        result
    }

    fn send_receive(
        &mut self,
        payload: &[u8],
        port: u8,
        confirmed: bool,
    ) -> Result<Option<Downlink>, MacError> {
        if !self.joined {
            return Err(MacError::new(ERR_NETWORK_NOT_JOINED));
        }
        if port == 0 {
            return Err(MacError::new(ERR_INVALID_STATE));
        }

        let result = match self.send_script.pop_front() {
            Some(scripted) => scripted,
            None if Self::roll(self.send_failure_percent) => Err(MacError::new(ERR_UNKNOWN)),
            None => Ok(()),
        };
        result?;

        self.uplinks.push(SentUplink {
            payload: payload.to_vec(),
            port,
            confirmed,
        });
        Ok(self.downlinks.pop())
    }

    fn link_quality(&self) -> LinkQuality {
        self.quality
    }

    fn handle_events(&mut self) {
        self.events_handled += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> Credentials {
        Credentials::new(1, 2, [0x11; 16], [0x22; 16])
    }

    #[test]
    fn test_defaults_succeed() {
        let mut mac = SimulatedMac::new();
        mac.join_otaa(&credentials()).unwrap();
        assert_eq!(mac.send_receive(&[1, 2], 1, true).unwrap(), None);
        assert_eq!(mac.uplinks().len(), 1);
        assert_eq!(mac.uplinks()[0].payload, vec![1, 2]);
    }

    #[test]
    fn test_scripted_results_in_order() {
        let mut mac = SimulatedMac::new();
        mac.script_join(Err(MacError::new(ERR_NO_JOIN_ACCEPT)));
        mac.script_join(Ok(()));

        assert!(mac.join_otaa(&credentials()).is_err());
        assert!(mac.join_otaa(&credentials()).is_ok());
        assert_eq!(mac.join_attempts(), 2);
    }

    #[test]
    fn test_configure_checks_sub_band() {
        let mut mac = SimulatedMac::new();
        let bad = RadioSettings::new(crate::lora::Region::Us915, 0);
        assert_eq!(mac.configure(&bad).unwrap_err().code(), ERR_INVALID_STATE);
        assert!(mac.settings().is_none());

        mac.configure(&RadioSettings::default()).unwrap();
        assert_eq!(mac.settings().map(|s| s.sub_band), Some(2));
    }

    #[test]
    fn test_send_requires_join() {
        let mut mac = SimulatedMac::new();
        let err = mac.send_receive(&[1], 1, false).unwrap_err();
        assert_eq!(err.code(), ERR_NETWORK_NOT_JOINED);
    }

    #[test]
    fn test_always_failing() {
        let mut mac = SimulatedMac::new().with_failure_rates(100, 100);
        assert!(mac.join_otaa(&credentials()).is_err());

        mac.script_join(Ok(()));
        mac.join_otaa(&credentials()).unwrap();
        assert!(mac.send_receive(&[1], 1, false).is_err());
        assert!(mac.uplinks().is_empty());
    }

    #[test]
    fn test_downlink_delivered_once() {
        let mut mac = SimulatedMac::new();
        let queue = mac.downlink_queue();
        queue.push(Downlink {
            port: 3,
            payload: vec![0xAB],
        });
        assert_eq!(queue.len(), 1);

        mac.join_otaa(&credentials()).unwrap();
        let first = mac.send_receive(&[1], 1, false).unwrap();
        assert_eq!(first.map(|d| d.port), Some(3));
        assert!(queue.is_empty());
        assert_eq!(mac.send_receive(&[1], 1, false).unwrap(), None);
    }
}
