//! Node state retention in RTC slow memory.
//!
//! The retained record lives in a `.rtc.data` section, which ESP-IDF keeps
//! powered during deep sleep and reinitializes on power-on reset. Nothing
//! is written to flash, so the record costs no wear and is gone after a
//! power cycle, which is exactly when the node should start cold.
//!
//! # Usage
//!
//! ```ignore
//! use lora_sensor_node::persistence::RtcStore;
//!
//! let store = RtcStore::take().ok_or("RTC store already taken")?;
//! let mut power = PowerController::new(DeepSleep::new(), store, &config);
//! let (ctx, state) = power.wake();
//! ```

use crate::power::{RetainedStore, StoreError};
use crate::state::NodeState;
use log::{debug, error};
use std::ptr::{addr_of, addr_of_mut};
use std::sync::atomic::{AtomicBool, Ordering};

const RECORD_LEN: usize = NodeState::RETAINED_LEN;

#[link_section = ".rtc.data.node_state"]
static mut RETAINED: [u8; RECORD_LEN] = [0; RECORD_LEN];

static TAKEN: AtomicBool = AtomicBool::new(false);

/// Handle to the retained RTC record. At most one exists.
pub struct RtcStore {
    _private: (),
}

impl RtcStore {
    /// Claim the retained record. Returns `None` if already claimed.
    pub fn take() -> Option<Self> {
        if TAKEN.swap(true, Ordering::SeqCst) {
            return None;
        }
        Some(Self { _private: () })
    }

    fn read() -> [u8; RECORD_LEN] {
        // SAFETY: the single RtcStore owns RETAINED exclusively.
        unsafe { addr_of!(RETAINED).read_volatile() }
    }

    fn write(record: &[u8; RECORD_LEN]) {
        // SAFETY: the single RtcStore owns RETAINED exclusively.
        unsafe { addr_of_mut!(RETAINED).write_volatile(*record) }
    }
}

impl Drop for RtcStore {
    fn drop(&mut self) {
        TAKEN.store(false, Ordering::SeqCst);
    }
}

impl RetainedStore for RtcStore {
    /// Returns the raw record. An all-zero record means nothing was saved
    /// since power-on.
    fn load(&mut self) -> Result<Option<[u8; RECORD_LEN]>, StoreError> {
        let record = Self::read();
        if record.iter().all(|&b| b == 0) {
            debug!("RTC record empty");
            return Ok(None);
        }
        Ok(Some(record))
    }

    /// Write with read-back verification.
    fn save(&mut self, record: &[u8; RECORD_LEN]) -> Result<(), StoreError> {
        Self::write(record);
        if Self::read() != *record {
            error!("RTC record verification failed - data mismatch after save");
            return Err(StoreError::VerifyFailed);
        }
        debug!("RTC record saved");
        Ok(())
    }
}

#[cfg(feature = "tap-tests")]
mod tap_tests {
    use super::*;
    use lora_sensor_node_macros::tap_test;

    #[tap_test]
    fn rtc_store_save_load() {
        let mut store = RtcStore::take().expect("RTC store in use");
        let mut state = NodeState::cold(120);
        state.boot_count = 7;
        let record = state.to_retained();

        store.save(&record).expect("save failed");
        assert_eq!(store.load().expect("load failed"), Some(record));
    }

    #[tap_test]
    fn rtc_store_single_owner() {
        let store = RtcStore::take().expect("RTC store in use");
        assert!(RtcStore::take().is_none());
        drop(store);
        assert!(RtcStore::take().is_some());
    }
}
