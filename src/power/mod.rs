//! Sleep entry, wake sources and state retention.
//!
//! [`PowerController`] sits between the control loop and two platform
//! seams:
//!
//! - [`SleepBackend`]: wake cause, timer/motion wake arming, deep sleep
//! - [`RetainedStore`]: the 32-byte [`NodeState`] record that survives sleep
//!
//! | Platform | SleepBackend | RetainedStore |
//! |----------|--------------|---------------|
//! | ESP32 | [`DeepSleep`] | `persistence::RtcStore` |
//! | Host | [`SimulatedSleep`] | `persistence_host::FileStore` |
//! | Tests | [`SimulatedSleep`] (instant) | [`MemoryStore`] |
//!
//! # Wake Cycle
//!
//! ```text
//! wake() ──▶ control loop ──▶ arm_wake_sources(secs) ──▶ enter_sleep()
//!   ▲                                                         │
//!   └──────────────── timer or motion ◀───────────────────────┘
//! ```

#[cfg(feature = "esp32")]
mod deep_sleep;
mod simulated;

#[cfg(feature = "esp32")]
pub use deep_sleep::DeepSleep;
pub use simulated::SimulatedSleep;

use crate::config::{MotionLevel, NodeConfig};
use crate::display::DisplayProvider;
use crate::state::{NodeState, WakeContext, WakeReason};
use log::{info, warn};
use std::fmt;
use std::sync::{Arc, Mutex};

/// Platform sleep primitives.
pub trait SleepBackend {
    /// What ended the previous sleep.
    fn wake_cause(&mut self) -> WakeReason;

    /// Wake after `secs` seconds.
    fn arm_timer(&mut self, secs: u32) -> Result<(), PowerError>;

    /// Wake when the motion pin reaches its active level.
    fn arm_motion(&mut self, level: MotionLevel) -> Result<(), PowerError>;

    /// Power down. On hardware this does not return; the next wake starts
    /// from reset.
    fn deep_sleep(&mut self) -> Result<(), PowerError>;
}

impl<T: SleepBackend + ?Sized> SleepBackend for Box<T> {
    fn wake_cause(&mut self) -> WakeReason {
        (**self).wake_cause()
    }

    fn arm_timer(&mut self, secs: u32) -> Result<(), PowerError> {
        (**self).arm_timer(secs)
    }

    fn arm_motion(&mut self, level: MotionLevel) -> Result<(), PowerError> {
        (**self).arm_motion(level)
    }

    fn deep_sleep(&mut self) -> Result<(), PowerError> {
        (**self).deep_sleep()
    }
}

/// Memory that survives deep sleep.
pub trait RetainedStore {
    /// Stored record, `None` if nothing was ever written.
    fn load(&mut self) -> Result<Option<[u8; NodeState::RETAINED_LEN]>, StoreError>;

    /// Overwrite the record.
    fn save(&mut self, record: &[u8; NodeState::RETAINED_LEN]) -> Result<(), StoreError>;
}

impl<T: RetainedStore + ?Sized> RetainedStore for Box<T> {
    fn load(&mut self) -> Result<Option<[u8; NodeState::RETAINED_LEN]>, StoreError> {
        (**self).load()
    }

    fn save(&mut self, record: &[u8; NodeState::RETAINED_LEN]) -> Result<(), StoreError> {
        (**self).save(record)
    }
}

/// Retained-store failures.
#[derive(Debug)]
pub enum StoreError {
    /// File I/O failed (host).
    Io(std::io::Error),
    /// Read-back after write did not match.
    VerifyFailed,
    /// The retained region is already owned by another store.
    AlreadyTaken,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::VerifyFailed => write!(f, "retained state verification failed"),
            Self::AlreadyTaken => write!(f, "retained memory already in use"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Power management errors.
#[derive(Debug)]
pub enum PowerError {
    /// Sleep requested before any wake source was armed.
    NotArmed,
    /// Sleep duration out of range.
    InvalidDuration(u32),
    /// State could not be persisted.
    Store(StoreError),
    /// Sleep interrupted by shutdown (host).
    Interrupted,
    /// ESP-IDF call failed.
    #[cfg(feature = "esp32")]
    Esp(esp_idf_sys::EspError),
}

impl fmt::Display for PowerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotArmed => write!(f, "no wake source armed"),
            Self::InvalidDuration(secs) => write!(f, "invalid sleep duration: {}s", secs),
            Self::Store(e) => write!(f, "persist failed: {}", e),
            Self::Interrupted => write!(f, "sleep interrupted"),
            #[cfg(feature = "esp32")]
            Self::Esp(e) => write!(f, "ESP-IDF error: {}", e),
        }
    }
}

impl std::error::Error for PowerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for PowerError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

#[cfg(feature = "esp32")]
impl From<esp_idf_sys::EspError> for PowerError {
    fn from(e: esp_idf_sys::EspError) -> Self {
        Self::Esp(e)
    }
}

/// In-memory retained store. Clones share the record.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    record: Arc<Mutex<Option<[u8; NodeState::RETAINED_LEN]>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current record, for inspection.
    pub fn snapshot(&self) -> Option<[u8; NodeState::RETAINED_LEN]> {
        match self.record.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Replace the record.
    pub fn corrupt_with(&self, bytes: [u8; NodeState::RETAINED_LEN]) {
        self.put(Some(bytes));
    }

    fn put(&self, value: Option<[u8; NodeState::RETAINED_LEN]>) {
        match self.record.lock() {
            Ok(mut guard) => *guard = value,
            Err(poisoned) => *poisoned.into_inner() = value,
        }
    }
}

impl RetainedStore for MemoryStore {
    fn load(&mut self) -> Result<Option<[u8; NodeState::RETAINED_LEN]>, StoreError> {
        Ok(self.snapshot())
    }

    fn save(&mut self, record: &[u8; NodeState::RETAINED_LEN]) -> Result<(), StoreError> {
        self.put(Some(*record));
        Ok(())
    }
}

/// Decides how the node sleeps and what it remembers.
pub struct PowerController<S: SleepBackend, R: RetainedStore> {
    backend: S,
    store: R,
    base_interval_secs: u32,
    max_backoff_secs: u32,
    motion_level: MotionLevel,
    armed: Option<u32>,
}

impl<S: SleepBackend, R: RetainedStore> PowerController<S, R> {
    pub fn new(backend: S, store: R, config: &NodeConfig) -> Self {
        Self {
            backend,
            store,
            base_interval_secs: config.base_interval_secs,
            max_backoff_secs: config.max_backoff_secs,
            motion_level: config.motion_level,
            armed: None,
        }
    }

    /// Start a wake cycle: read the cause, restore (or reset) the retained
    /// state and count the boot.
    ///
    /// A cold boot discards whatever the store holds. A timer or motion wake
    /// with a missing or corrupt record is treated as a cold boot.
    pub fn wake(&mut self) -> (WakeContext, NodeState) {
        self.armed = None;
        let cause = self.backend.wake_cause();

        let (reason, mut state) = match cause {
            WakeReason::ColdBoot => (WakeReason::ColdBoot, self.cold_state()),
            reason => match self.restore() {
                Some(state) => (reason, state),
                None => (WakeReason::ColdBoot, self.cold_state()),
            },
        };

        state.boot_count = state.boot_count.wrapping_add(1);
        state.motion_wake = reason == WakeReason::ExternalSignal;

        info!("Wake #{}: {:?}", state.boot_count, reason);
        if let Err(e) = self.persist(&state) {
            warn!("Failed to persist state at wake: {}", e);
        }

        (
            WakeContext {
                wake_reason: reason,
                boot_count: state.boot_count,
            },
            state,
        )
    }

    fn cold_state(&self) -> NodeState {
        NodeState::cold(self.base_interval_secs)
    }

    fn restore(&mut self) -> Option<NodeState> {
        let bytes = match self.store.load() {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                warn!("No retained state, starting cold");
                return None;
            }
            Err(e) => {
                warn!("Failed to read retained state: {}", e);
                return None;
            }
        };
        match NodeState::from_retained(&bytes, self.base_interval_secs, self.max_backoff_secs) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!("Discarding retained state: {}", e);
                None
            }
        }
    }

    /// Write the state to retained memory.
    pub fn persist(&mut self, state: &NodeState) -> Result<(), PowerError> {
        self.store.save(&state.to_retained())?;
        Ok(())
    }

    /// Arm the timer for `sleep_secs` and the motion wake.
    pub fn arm_wake_sources(&mut self, sleep_secs: u32) -> Result<(), PowerError> {
        if sleep_secs == 0 {
            return Err(PowerError::InvalidDuration(sleep_secs));
        }
        self.backend.arm_timer(sleep_secs)?;
        self.backend.arm_motion(self.motion_level)?;
        self.armed = Some(sleep_secs);
        Ok(())
    }

    /// Seconds the timer is armed for, if any.
    pub fn armed(&self) -> Option<u32> {
        self.armed
    }

    /// Persist, let the display show final status, then sleep.
    ///
    /// Returns only on platforms where sleep is simulated.
    pub fn enter_sleep<D: DisplayProvider + ?Sized>(
        &mut self,
        state: &NodeState,
        display: &mut D,
    ) -> Result<(), PowerError> {
        let secs = self.armed.ok_or(PowerError::NotArmed)?;
        self.persist(state)?;

        info!("Going to sleep for {} seconds", secs);
        display.log_message(&format!("Sleep: {}s", secs));
        display.sleep();

        let result = self.backend.deep_sleep();
        self.armed = None;
        result
    }

    pub fn backend(&self) -> &S {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut S {
        &mut self.backend
    }

    pub fn store(&self) -> &R {
        &self.store
    }
}
