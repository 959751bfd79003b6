//! Metrics registry and text encoding.

use super::collector::{FlowercareCollector, MetricsError};
use prometheus::{Encoder, Registry, TextEncoder};

/// Prometheus registry holding the device collector.
///
/// Gathering runs the collector, which may block on the device; call
/// [`MetricsRegistry::encode`] from a blocking context.
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Registry,
}

impl MetricsRegistry {
    /// Creates a registry with the collector registered.
    ///
    /// Fails if the collector's descriptors are rejected by the registry.
    pub fn new(collector: FlowercareCollector) -> Result<Self, MetricsError> {
        let registry = Registry::new();
        registry.register(Box::new(collector))?;
        Ok(Self { registry })
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
