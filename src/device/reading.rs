//! Values read from a Flower Care device.

use chrono::{DateTime, Utc};

/// Firmware characteristic contents.
#[derive(Debug, Clone, PartialEq)]
pub struct Firmware {
    /// Firmware version string, e.g. `"3.2.2"`.
    pub version: String,
    /// Battery level in percent.
    pub battery: u8,
}

/// Sensor characteristic contents, in the units the device reports.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sensors {
    /// Soil conductivity in µS/cm.
    pub conductivity: u16,
    /// Ambient light in lux.
    pub light: u32,
    /// Soil relative moisture in percent.
    pub moisture: u8,
    /// Ambient temperature in degrees celsius.
    pub temperature: f64,
}

/// Result of a single successful device round trip.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceData {
    /// Firmware characteristic.
    pub firmware: Firmware,
    /// Live sensor characteristic.
    pub sensors: Sensors,
}

/// A device reading stamped with the time it was captured.
///
/// Readings are immutable; a refresh replaces the whole value.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    captured_at: DateTime<Utc>,
    firmware: Firmware,
    sensors: Sensors,
}

impl SensorReading {
    /// Stamps device data with its capture time.
    pub fn new(data: DeviceData, captured_at: DateTime<Utc>) -> Self {
        Self {
            captured_at,
            firmware: data.firmware,
            sensors: data.sensors,
        }
    }

    #[inline]
    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    #[inline]
    pub fn firmware(&self) -> &Firmware {
        &self.firmware
    }

    #[inline]
    pub fn sensors(&self) -> &Sensors {
        &self.sensors
    }
}
