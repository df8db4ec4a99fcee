//! ESP32 GPIO inputs.

use super::PinLevel;
use esp_idf_hal::gpio::{AnyInputPin, Input, PinDriver, Pull};
use esp_idf_hal::sys::EspError;

/// Polled GPIO input.
pub struct GpioInput<'d> {
    driver: PinDriver<'d, AnyInputPin, Input>,
}

impl<'d> GpioInput<'d> {
    /// Configure `pin` as an input with the given pull resistor.
    pub fn new(pin: AnyInputPin, pull: Pull) -> Result<Self, EspError> {
        let mut driver = PinDriver::input(pin)?;
        driver.set_pull(pull)?;
        Ok(Self { driver })
    }
}

impl PinLevel for GpioInput<'_> {
    fn is_high(&mut self) -> bool {
        self.driver.is_high()
    }
}
