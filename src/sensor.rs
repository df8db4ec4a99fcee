//! Environmental sensor seam.
//!
//! The node reads temperature, humidity and pressure through
//! [`SensorProvider`]. Hardware drivers live behind it; the node only
//! cares whether a reading is available and falls back through
//! [`ReadingCache`] when it is not.

use log::{debug, warn};
use rand_core::{OsRng, RngCore};

/// Standard sea-level pressure used for altitude estimates (hPa).
pub const SEA_LEVEL_PRESSURE_HPA: f32 = 1013.25;

/// One environmental sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvironmentReading {
    /// °C
    pub temperature: f32,
    /// % relative humidity
    pub humidity: f32,
    /// hPa
    pub pressure: f32,
    /// False when the sensor did not respond; the values are meaningless.
    pub available: bool,
}

impl EnvironmentReading {
    /// Reading reported when no sensor is present.
    pub const UNAVAILABLE: Self = Self {
        temperature: 0.0,
        humidity: 0.0,
        pressure: 0.0,
        available: false,
    };

    /// Barometric altitude estimate in metres.
    pub fn altitude(&self) -> f32 {
        altitude_from_pressure(self.pressure, SEA_LEVEL_PRESSURE_HPA)
    }
}

/// International barometric formula.
pub fn altitude_from_pressure(pressure_hpa: f32, sea_level_hpa: f32) -> f32 {
    if pressure_hpa <= 0.0 || sea_level_hpa <= 0.0 {
        return 0.0;
    }
    44_330.0 * (1.0 - (pressure_hpa / sea_level_hpa).powf(0.1903))
}

/// Source of environmental readings.
pub trait SensorProvider {
    /// Take a reading. Never fails; `available` is false on error.
    fn read_environment(&mut self) -> EnvironmentReading;

    /// Sensor detected at bring-up.
    fn is_available(&self) -> bool;
}

impl<T: SensorProvider + ?Sized> SensorProvider for Box<T> {
    fn read_environment(&mut self) -> EnvironmentReading {
        (**self).read_environment()
    }

    fn is_available(&self) -> bool {
        (**self).is_available()
    }
}

/// What goes into the next uplink.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResolvedReading {
    /// Fresh sample.
    Measured(EnvironmentReading),
    /// Sensor failed; most recent good sample of this wake.
    LastKnown(EnvironmentReading),
    /// Sensor failed and nothing was measured yet.
    Placeholder,
}

impl ResolvedReading {
    /// The reading to report, if there is one.
    pub fn reading(&self) -> Option<&EnvironmentReading> {
        match self {
            Self::Measured(r) | Self::LastKnown(r) => Some(r),
            Self::Placeholder => None,
        }
    }
}

/// Fallback policy for a missing sensor.
#[derive(Debug, Clone, Default)]
pub struct ReadingCache {
    last_good: Option<EnvironmentReading>,
}

impl ReadingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember good readings and substitute for bad ones.
    pub fn resolve(&mut self, reading: EnvironmentReading) -> ResolvedReading {
        if reading.available {
            self.last_good = Some(reading);
            return ResolvedReading::Measured(reading);
        }
        match self.last_good {
            Some(last) => {
                warn!("Sensor unavailable, sending last known reading");
                ResolvedReading::LastKnown(last)
            }
            None => {
                warn!("Sensor unavailable, sending placeholder");
                ResolvedReading::Placeholder
            }
        }
    }

    pub fn last_good(&self) -> Option<&EnvironmentReading> {
        self.last_good.as_ref()
    }
}

/// Synthetic BME280 for host runs.
///
/// Values wander slowly around a room-climate baseline.
#[derive(Debug, Clone)]
pub struct SimulatedSensor {
    present: bool,
    baseline: EnvironmentReading,
    jitter: bool,
}

impl SimulatedSensor {
    pub fn new() -> Self {
        Self {
            present: true,
            baseline: EnvironmentReading {
                temperature: 22.5,
                humidity: 45.0,
                pressure: 1013.25,
                available: true,
            },
            jitter: true,
        }
    }

    /// Sensor that always returns `reading` unchanged.
    pub fn fixed(reading: EnvironmentReading) -> Self {
        Self {
            present: reading.available,
            baseline: reading,
            jitter: false,
        }
    }

    /// Sensor that is not on the bus.
    pub fn missing() -> Self {
        Self {
            present: false,
            baseline: EnvironmentReading::UNAVAILABLE,
            jitter: false,
        }
    }

    /// Plug or unplug the sensor.
    pub fn set_present(&mut self, present: bool) {
        self.present = present;
    }

    /// Offset in [-range, +range] in steps of range/50.
    fn wobble(range: f32) -> f32 {
        let step = (OsRng.next_u32() % 101) as f32 - 50.0;
        step * range / 50.0
    }
}

impl Default for SimulatedSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorProvider for SimulatedSensor {
    fn read_environment(&mut self) -> EnvironmentReading {
        if !self.present {
            return EnvironmentReading::UNAVAILABLE;
        }
        let reading = if self.jitter {
            EnvironmentReading {
                temperature: self.baseline.temperature + Self::wobble(0.5),
                humidity: (self.baseline.humidity + Self::wobble(2.0)).clamp(0.0, 100.0),
                pressure: self.baseline.pressure + Self::wobble(1.5),
                available: true,
            }
        } else {
            EnvironmentReading {
                available: true,
                ..self.baseline
            }
        };
        debug!(
            "Sensor: {:.1} C, {:.1} %, {:.1} hPa",
            reading.temperature, reading.humidity, reading.pressure
        );
        reading
    }

    fn is_available(&self) -> bool {
        self.present
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn good(temperature: f32) -> EnvironmentReading {
        EnvironmentReading {
            temperature,
            humidity: 40.0,
            pressure: 1000.0,
            available: true,
        }
    }

    #[test]
    fn test_altitude_at_sea_level() {
        assert_eq!(altitude_from_pressure(1013.25, 1013.25), 0.0);
        let reading = good(20.0);
        // ~111 m for 1000 hPa
        assert!((reading.altitude() - 111.0).abs() < 2.0);
        assert_eq!(EnvironmentReading::UNAVAILABLE.altitude(), 0.0);
    }

    #[test]
    fn test_cache_passes_good_readings() {
        let mut cache = ReadingCache::new();
        assert_eq!(cache.resolve(good(21.0)), ResolvedReading::Measured(good(21.0)));
        assert_eq!(cache.last_good(), Some(&good(21.0)));
    }

    #[test]
    fn test_cache_falls_back_to_last_known() {
        let mut cache = ReadingCache::new();
        cache.resolve(good(21.0));
        cache.resolve(good(23.0));
        let resolved = cache.resolve(EnvironmentReading::UNAVAILABLE);
        assert_eq!(resolved, ResolvedReading::LastKnown(good(23.0)));
        assert_eq!(resolved.reading().map(|r| r.temperature), Some(23.0));
    }

    #[test]
    fn test_cache_placeholder_without_history() {
        let mut cache = ReadingCache::new();
        let resolved = cache.resolve(EnvironmentReading::UNAVAILABLE);
        assert_eq!(resolved, ResolvedReading::Placeholder);
        assert!(resolved.reading().is_none());
    }

    #[test]
    fn test_simulated_sensor_stays_near_baseline() {
        let mut sensor = SimulatedSensor::new();
        for _ in 0..20 {
            let r = sensor.read_environment();
            assert!(r.available);
            assert!((r.temperature - 22.5).abs() <= 0.5 + f32::EPSILON);
            assert!((0.0..=100.0).contains(&r.humidity));
        }
    }

    #[test]
    fn test_missing_sensor() {
        let mut sensor = SimulatedSensor::missing();
        assert!(!sensor.is_available());
        assert!(!sensor.read_environment().available);

        let mut fixed = SimulatedSensor::fixed(good(19.0));
        fixed.set_present(false);
        assert!(!fixed.read_environment().available);
        fixed.set_present(true);
        assert_eq!(fixed.read_environment(), good(19.0));
    }
}
