//! Digital inputs: PIR motion sensor and the UI button.
//!
//! # Pin Configuration (Heltec WiFi LoRa 32 V3)
//!
//! | Signal | GPIO | Notes |
//! |--------|------|-------|
//! | PIR out | 5 | RTC-capable, also the deep-sleep wake source |
//! | PRG button | 0 | Active low, internal pull-up |
//!
//! Inputs are polled from the cooperative loop. [`MotionEdgeDetector`]
//! turns the PIR level into rising edges honoring the configured active
//! level; [`ButtonDebouncer`] samples the button every 100 ms.

#[cfg(feature = "esp32")]
mod gpio;

#[cfg(feature = "esp32")]
pub use gpio::GpioInput;

use crate::config::MotionLevel;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// GPIO number of the PIR output, armed as the ext0 wake source.
pub const PIR_GPIO: i32 = 5;

/// Button sampling period (ms).
pub const BUTTON_POLL_MS: u64 = 100;

/// A readable digital input.
pub trait PinLevel {
    fn is_high(&mut self) -> bool;
}

impl<T: PinLevel + ?Sized> PinLevel for Box<T> {
    fn is_high(&mut self) -> bool {
        (**self).is_high()
    }
}

/// Pin whose level is set from another thread (host console, tests).
///
/// A pulse inverts the idle level for exactly one read, which the edge
/// detectors see as one press or one motion event.
#[derive(Debug, Clone, Default)]
pub struct SharedPin {
    level: Arc<AtomicBool>,
    pulse: Arc<AtomicBool>,
}

impl SharedPin {
    /// Pin idling at `high`.
    pub fn new(high: bool) -> Self {
        Self {
            level: Arc::new(AtomicBool::new(high)),
            pulse: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_high(&self, high: bool) {
        self.level.store(high, Ordering::SeqCst);
    }

    /// Invert the level for the next read.
    pub fn pulse(&self) {
        self.pulse.store(true, Ordering::SeqCst);
    }

    /// Consume a pending pulse without reading the level.
    pub fn take_pulse(&self) -> bool {
        self.pulse.swap(false, Ordering::SeqCst)
    }

    pub fn level(&self) -> bool {
        self.level.load(Ordering::SeqCst)
    }
}

impl PinLevel for SharedPin {
    fn is_high(&mut self) -> bool {
        let level = self.level();
        if self.take_pulse() {
            !level
        } else {
            level
        }
    }
}

/// Rising-edge detector for the PIR output.
#[derive(Debug, Clone)]
pub struct MotionEdgeDetector {
    level: MotionLevel,
    was_active: bool,
}

impl MotionEdgeDetector {
    pub fn new(level: MotionLevel) -> Self {
        Self {
            level,
            was_active: false,
        }
    }

    /// Treat the sensor as already active, so the motion that woke the node
    /// is not reported a second time.
    pub fn prime(&mut self) {
        self.was_active = true;
    }

    /// Feed the raw pin level. Returns true on an inactive-to-active edge.
    pub fn update(&mut self, pin_high: bool) -> bool {
        let active = self.level.is_active(pin_high);
        let edge = active && !self.was_active;
        self.was_active = active;
        edge
    }
}

/// Press detector for the active-low button.
#[derive(Debug, Clone)]
pub struct ButtonDebouncer {
    last_sample_ms: Option<u64>,
    was_high: bool,
}

impl Default for ButtonDebouncer {
    fn default() -> Self {
        Self::new()
    }
}

impl ButtonDebouncer {
    pub fn new() -> Self {
        Self {
            last_sample_ms: None,
            was_high: true,
        }
    }

    /// Whether the next sample is due at `now_ms`.
    pub fn due(&self, now_ms: u64) -> bool {
        match self.last_sample_ms {
            Some(last) => now_ms.saturating_sub(last) >= BUTTON_POLL_MS,
            None => true,
        }
    }

    /// Returns true on a high-to-low transition, sampled at most every
    /// [`BUTTON_POLL_MS`].
    pub fn update(&mut self, now_ms: u64, pin_high: bool) -> bool {
        if !self.due(now_ms) {
            return false;
        }
        self.last_sample_ms = Some(now_ms);
        let pressed = !pin_high && self.was_high;
        self.was_high = pin_high;
        pressed
    }
}
