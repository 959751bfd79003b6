//! Prometheus exporter for Flower Care readings.
//!
//! The collector contacts the device at scrape time, but at most once per
//! cache window. Failed reads never fail a scrape: they show up only in
//! `flowercare_up` and `flowercare_scrape_errors_total`.
//!
//! # Metrics Exposed
//!
//! All metrics carry a `macaddress` label with the lower-cased device address.
//!
//! - `flowercare_up` - 1 if the last device read succeeded, 0 otherwise
//! - `flowercare_scrape_errors_total` - Failed device reads
//! - `flowercare_scrape_timestamp` - Unix time of the cached reading
//! - `flowercare_info{version}` - Firmware version, always 1
//! - `flowercare_battery_percent` - Battery level in percent
//! - `flowercare_conductivity_sm` - Soil conductivity in S/m
//! - `flowercare_brightness_lux` - Ambient light in lux
//! - `flowercare_moisture_percent` - Soil moisture in percent
//! - `flowercare_temperature_celsius` - Ambient temperature
//!
//! The last six are only present while the cached reading is younger than
//! the cache duration.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use flowercare_exporter::config::CollectorConfig;
//! use flowercare_exporter::device::GattToolReader;
//! use flowercare_exporter::metrics::{FlowercareCollector, MetricsRegistry};
//!
//! let config = CollectorConfig::new("C4:7C:8D:6A:3E:11", "hci0", Duration::from_secs(120))
//!     .expect("invalid config");
//! let collector = FlowercareCollector::new(config, Arc::new(GattToolReader::new()))
//!     .expect("Failed to create collector");
//! let registry = MetricsRegistry::new(collector).expect("Failed to create registry");
//!
//! println!("{}", registry.encode().unwrap());
//! ```

mod clock;
mod collector;
mod registry;
mod server;

pub use clock::{Clock, ManualClock, SystemClock};
pub use collector::{FlowercareCollector, MetricsError, CONDUCTIVITY_FACTOR};
pub use registry::MetricsRegistry;
pub use server::{MetricsServer, MetricsServerConfig, ServerError};
