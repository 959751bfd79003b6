//! Flower Care device access.
//!
//! This module provides the blocking reader abstraction used by the
//! collector, the value types a device round trip produces, and a
//! `gatttool`-based implementation for BlueZ hosts.

mod gatt;
mod reader;
mod reading;

pub use gatt::{
    decode_firmware, decode_sensors, parse_char_value, GattToolReader, DEFAULT_COMMAND_TIMEOUT,
};
pub use reader::{DeviceReader, MockDevice, ReadError};
pub use reading::{DeviceData, Firmware, SensorReading, Sensors};
