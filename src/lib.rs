//! Flower Care Prometheus Exporter Library
//!
//! Reads a Flower Care (Mi Flora) plant sensor over Bluetooth Low Energy
//! and exposes its readings as Prometheus metrics.
//!
//! # Architecture
//!
//! ```text
//! HTTP scrape → registry → collector → (cache stale?) → device reader
//!                              ↓
//!                       metric families
//! ```
//!
//! # Design Principles
//!
//! - **Scrape-driven**: No background polling; the device is read during a
//!   scrape, at most once per cache window
//! - **Failure isolation**: Read errors are counted and logged, never
//!   returned to the scraper
//! - **No fake zeros**: Sensor gauges disappear once the cached reading
//!   expires instead of reporting placeholder values
//! - **Fail fast on config**: A missing device address or adapter stops
//!   startup
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use flowercare_exporter::{CollectorConfig, FlowercareCollector, GattToolReader};
//!
//! let config = CollectorConfig::new("C4:7C:8D:6A:3E:11", "hci0", Duration::from_secs(120))
//!     .unwrap();
//! let collector = FlowercareCollector::new(config, Arc::new(GattToolReader::new())).unwrap();
//!
//! for family in collector.snapshot() {
//!     println!("{}", family.get_name());
//! }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod config;
pub mod device;
pub mod metrics;

// Re-export commonly used types at crate root
pub use config::{CollectorConfig, ConfigError, FileConfig};
pub use device::{DeviceData, DeviceReader, GattToolReader, MockDevice, ReadError, SensorReading};
pub use metrics::{FlowercareCollector, MetricsRegistry, MetricsServer, MetricsServerConfig};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
