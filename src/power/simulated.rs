//! Deep sleep stand-in for the host and tests.
//!
//! Sleeping blocks the calling thread for the armed duration divided by
//! the time scale, or returns at once in instant mode. A pulse or active
//! level on the motion pin ends the sleep early, like the ext0 wake on
//! hardware.

use super::{PowerError, SleepBackend};
use crate::config::MotionLevel;
use crate::input::SharedPin;
use crate::state::WakeReason;
use log::debug;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// How often a simulated sleep checks for motion and shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

pub struct SimulatedSleep {
    cause: WakeReason,
    time_scale: u32,
    instant: bool,
    motion: SharedPin,
    cancel: CancellationToken,
    timer_secs: Option<u32>,
    motion_level: Option<MotionLevel>,
    last_sleep: Option<u32>,
    sleep_count: u64,
}

impl SimulatedSleep {
    /// Sleep in scaled real time: one simulated second lasts
    /// `1 / time_scale` real seconds.
    pub fn new(time_scale: u32) -> Self {
        Self {
            cause: WakeReason::ColdBoot,
            time_scale: time_scale.max(1),
            instant: false,
            motion: SharedPin::new(false),
            cancel: CancellationToken::new(),
            timer_secs: None,
            motion_level: None,
            last_sleep: None,
            sleep_count: 0,
        }
    }

    /// Sleep that returns immediately.
    pub fn instant() -> Self {
        Self {
            instant: true,
            ..Self::new(1)
        }
    }

    /// Watch `pin` for motion while asleep.
    pub fn with_motion_pin(mut self, pin: SharedPin) -> Self {
        self.motion = pin;
        self
    }

    /// Abort sleeps once `token` is cancelled.
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Cause reported by the first [`wake_cause`](SleepBackend::wake_cause).
    pub fn with_initial_cause(mut self, cause: WakeReason) -> Self {
        self.cause = cause;
        self
    }

    /// Make the next wake a cold boot, as after a reset.
    pub fn power_cycle(&mut self) {
        self.cause = WakeReason::ColdBoot;
        self.timer_secs = None;
        self.motion_level = None;
    }

    pub fn motion_pin(&self) -> SharedPin {
        self.motion.clone()
    }

    pub fn armed_timer(&self) -> Option<u32> {
        self.timer_secs
    }

    pub fn armed_motion(&self) -> Option<MotionLevel> {
        self.motion_level
    }

    /// Duration of the last completed sleep, in seconds.
    pub fn last_sleep(&self) -> Option<u32> {
        self.last_sleep
    }

    /// Completed sleeps since creation.
    pub fn sleep_count(&self) -> u64 {
        self.sleep_count
    }

    fn motion_triggered(&self) -> bool {
        let Some(level) = self.motion_level else {
            return false;
        };
        self.motion.take_pulse() || level.is_active(self.motion.level())
    }
}

impl SleepBackend for SimulatedSleep {
    fn wake_cause(&mut self) -> WakeReason {
        self.cause
    }

    fn arm_timer(&mut self, secs: u32) -> Result<(), PowerError> {
        self.timer_secs = Some(secs);
        Ok(())
    }

    fn arm_motion(&mut self, level: MotionLevel) -> Result<(), PowerError> {
        self.motion_level = Some(level);
        Ok(())
    }

    fn deep_sleep(&mut self) -> Result<(), PowerError> {
        let secs = self.timer_secs.take().ok_or(PowerError::NotArmed)?;

        let cause = if self.instant {
            if self.motion_triggered() {
                WakeReason::ExternalSignal
            } else {
                WakeReason::Timer
            }
        } else {
            let real = Duration::from_millis(u64::from(secs) * 1000 / u64::from(self.time_scale));
            let deadline = Instant::now() + real;
            debug!("Simulated sleep: {}s ({:?} real)", secs, real);
            loop {
                if self.cancel.is_cancelled() {
                    self.motion_level = None;
                    return Err(PowerError::Interrupted);
                }
                if self.motion_triggered() {
                    break WakeReason::ExternalSignal;
                }
                let now = Instant::now();
                if now >= deadline {
                    break WakeReason::Timer;
                }
                std::thread::sleep(POLL_INTERVAL.min(deadline - now));
            }
        };

        self.motion_level = None;
        self.last_sleep = Some(secs);
        self.sleep_count += 1;
        self.cause = cause;
        Ok(())
    }
}
