//! ESP32 deep sleep via ESP-IDF.
//!
//! The timer and ext0 wake sources are armed before
//! `esp_deep_sleep_start`. ext0 watches the PIR pin, which must be
//! RTC-capable.

use super::{PowerError, SleepBackend};
use crate::config::MotionLevel;
use crate::input::PIR_GPIO;
use crate::state::WakeReason;
use esp_idf_sys::{
    esp, esp_deep_sleep_start, esp_sleep_enable_ext0_wakeup, esp_sleep_enable_timer_wakeup,
    esp_sleep_get_wakeup_cause, esp_sleep_source_t_ESP_SLEEP_WAKEUP_EXT0,
    esp_sleep_source_t_ESP_SLEEP_WAKEUP_TIMER,
};
use log::info;

#[derive(Debug, Default)]
pub struct DeepSleep {
    _private: (),
}

impl DeepSleep {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SleepBackend for DeepSleep {
    fn wake_cause(&mut self) -> WakeReason {
        // SAFETY: reads a register latched by the ROM bootloader.
        #[allow(non_upper_case_globals)]
        match unsafe { esp_sleep_get_wakeup_cause() } {
            esp_sleep_source_t_ESP_SLEEP_WAKEUP_TIMER => WakeReason::Timer,
            esp_sleep_source_t_ESP_SLEEP_WAKEUP_EXT0 => WakeReason::ExternalSignal,
            _ => WakeReason::ColdBoot,
        }
    }

    fn arm_timer(&mut self, secs: u32) -> Result<(), PowerError> {
        esp!(unsafe { esp_sleep_enable_timer_wakeup(u64::from(secs) * 1_000_000) })?;
        Ok(())
    }

    fn arm_motion(&mut self, level: MotionLevel) -> Result<(), PowerError> {
        esp!(unsafe { esp_sleep_enable_ext0_wakeup(PIR_GPIO, i32::from(level.wake_level())) })?;
        Ok(())
    }

    #[allow(unreachable_code)]
    fn deep_sleep(&mut self) -> Result<(), PowerError> {
        info!("Entering deep sleep");
        // SAFETY: wake sources are armed; the chip resets on wake.
        unsafe { esp_deep_sleep_start() };
        Ok(())
    }
}
