//! Caching Prometheus collector for a single Flower Care device.

use super::clock::{Clock, SystemClock};
use crate::config::CollectorConfig;
use crate::device::{DeviceReader, ReadError, SensorReading};
use prometheus::core::{Collector, Desc};
use prometheus::proto::{self, LabelPair, MetricFamily, MetricType};
use prometheus::{Gauge, IntCounter, Opts};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;

const METRIC_PREFIX: &str = "flowercare_";
const NO_LABELS: &[&str] = &[];

/// Conversion factor from µS/cm to S/m.
pub const CONDUCTIVITY_FACTOR: f64 = 0.0001;

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// A gauge derived from one field of a sensor reading.
struct SensorGauge {
    name: &'static str,
    help: &'static str,
    value: fn(&SensorReading) -> f64,
}

/// Physical quantities, in emission order.
const SENSOR_GAUGES: [SensorGauge; 5] = [
    SensorGauge {
        name: "battery_percent",
        help: "Battery level in percent.",
        value: |r: &SensorReading| f64::from(r.firmware().battery),
    },
    SensorGauge {
        name: "conductivity_sm",
        help: "Soil conductivity in Siemens/meter.",
        value: |r: &SensorReading| f64::from(r.sensors().conductivity) * CONDUCTIVITY_FACTOR,
    },
    SensorGauge {
        name: "brightness_lux",
        help: "Ambient lighting in lux.",
        value: |r: &SensorReading| f64::from(r.sensors().light),
    },
    SensorGauge {
        name: "moisture_percent",
        help: "Soil relative moisture in percent.",
        value: |r: &SensorReading| f64::from(r.sensors().moisture),
    },
    SensorGauge {
        name: "temperature_celsius",
        help: "Ambient temperature in celsius.",
        value: |r: &SensorReading| r.sensors().temperature,
    },
];

/// Prometheus collector that reads the device on scrape and caches the result.
///
/// The device is only contacted when the cached reading is older than the
/// configured cache duration. Failed reads leave the cache untouched and are
/// reported through `flowercare_up` and `flowercare_scrape_errors_total`
/// only; sensor gauges are emitted while the cached reading is still fresh.
pub struct FlowercareCollector {
    config: CollectorConfig,
    reader: Arc<dyn DeviceReader>,
    clock: Arc<dyn Clock>,

    cache: Mutex<Option<SensorReading>>,

    up: Gauge,
    scrape_errors: IntCounter,
    scrape_timestamp_desc: Desc,
    info_desc: Desc,
    sensor_descs: Vec<(Desc, fn(&SensorReading) -> f64)>,
}

impl FlowercareCollector {
    /// Creates a collector that reads time from the system clock.
    pub fn new(
        config: CollectorConfig,
        reader: Arc<dyn DeviceReader>,
    ) -> Result<Self, MetricsError> {
        Self::with_clock(config, reader, Arc::new(SystemClock))
    }

    /// Creates a collector with an explicit time source.
    pub fn with_clock(
        config: CollectorConfig,
        reader: Arc<dyn DeviceReader>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, MetricsError> {
        let const_labels: HashMap<String, String> = HashMap::from([(
            "macaddress".to_string(),
            config.device_address().to_lowercase(),
        )]);

        let up = Gauge::with_opts(
            Opts::new(
                format!("{}up", METRIC_PREFIX),
                "Shows if data could be successfully retrieved by the collector.",
            )
            .const_labels(const_labels.clone()),
        )?;
        let scrape_errors = IntCounter::with_opts(
            Opts::new(
                format!("{}scrape_errors_total", METRIC_PREFIX),
                "Counts the number of scrape errors by this collector.",
            )
            .const_labels(const_labels.clone()),
        )?;
        let scrape_timestamp_desc = Desc::new(
            format!("{}scrape_timestamp", METRIC_PREFIX),
            "Contains the timestamp when the last communication with the Bluetooth device happened."
                .to_string(),
            vec![],
            const_labels.clone(),
        )?;
        let info_desc = Desc::new(
            format!("{}info", METRIC_PREFIX),
            "Contains information about the Flower Care device.".to_string(),
            vec!["version".to_string()],
            const_labels.clone(),
        )?;

        let sensor_descs = SENSOR_GAUGES
            .iter()
            .map(|g| {
                let desc = Desc::new(
                    format!("{}{}", METRIC_PREFIX, g.name),
                    g.help.to_string(),
                    vec![],
                    const_labels.clone(),
                )?;
                Ok((desc, g.value))
            })
            .collect::<Result<Vec<_>, prometheus::Error>>()?;

        Ok(Self {
            config,
            reader,
            clock,
            cache: Mutex::new(None),
            up,
            scrape_errors,
            scrape_timestamp_desc,
            info_desc,
            sensor_descs,
        })
    }

    /// Refreshes the cache if it is stale and returns the current metric set.
    ///
    /// `up` and `scrape_errors_total` are always present. The sensor metrics
    /// follow only if the cache holds a reading younger than the cache
    /// duration. Errors are logged, never returned.
    pub fn snapshot(&self) -> Vec<MetricFamily> {
        let reading = {
            // Held across the refresh so overlapping scrapes share one fetch.
            let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);

            let age = age_of(cache.as_ref(), self.clock.now());
            if age.map_or(true, |age| age > self.config.cache_duration()) {
                match self.refresh(&mut cache) {
                    Ok(()) => self.up.set(1.0),
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            device = self.config.device_address(),
                            "Error during scrape"
                        );
                        self.scrape_errors.inc();
                        self.up.set(0.0);
                    }
                }
            }

            cache.clone()
        };

        let mut families = self.up.collect();
        families.extend(self.scrape_errors.collect());

        let fresh = age_of(reading.as_ref(), self.clock.now())
            .is_some_and(|age| age < self.config.cache_duration());
        match reading {
            Some(ref reading) if fresh => {
                if let Err(e) = self.collect_reading(reading, &mut families) {
                    tracing::warn!(error = %e, "Error collecting metrics");
                }
            }
            _ => {}
        }

        families
    }

    fn refresh(&self, cache: &mut Option<SensorReading>) -> Result<(), ReadError> {
        let data = self
            .reader
            .fetch(self.config.device_address(), self.config.adapter())?;

        let reading = SensorReading::new(data, self.clock.now());
        tracing::debug!(
            device = self.config.device_address(),
            captured_at = %reading.captured_at(),
            "Refreshed sensor reading"
        );
        *cache = Some(reading);
        Ok(())
    }

    /// Appends the metrics derived from `reading` to `out`.
    ///
    /// Stops at the first metric that cannot be built; everything appended
    /// before it stays in `out`.
    fn collect_reading(
        &self,
        reading: &SensorReading,
        out: &mut Vec<MetricFamily>,
    ) -> Result<(), MetricsError> {
        let version = [reading.firmware().version.as_str()];

        let samples = [
            (
                &self.scrape_timestamp_desc,
                reading.captured_at().timestamp() as f64,
                NO_LABELS,
            ),
            (&self.info_desc, 1.0, &version[..]),
        ]
        .into_iter()
        .chain(
            self.sensor_descs
                .iter()
                .map(|(desc, value)| (desc, value(reading), NO_LABELS)),
        );

        emit_gauges(samples, out)
    }
}

impl Collector for FlowercareCollector {
    fn desc(&self) -> Vec<&Desc> {
        let mut descs = Vec::with_capacity(4 + self.sensor_descs.len());
        descs.extend(self.up.desc());
        descs.extend(self.scrape_errors.desc());
        descs.push(&self.scrape_timestamp_desc);
        descs.push(&self.info_desc);
        descs.extend(self.sensor_descs.iter().map(|(desc, _)| desc));
        descs
    }

    fn collect(&self) -> Vec<MetricFamily> {
        self.snapshot()
    }
}

/// Age of a cached reading; `None` when nothing has been read yet.
///
/// A capture time in the future counts as age zero.
fn age_of(
    reading: Option<&SensorReading>,
    now: chrono::DateTime<chrono::Utc>,
) -> Option<Duration> {
    reading.map(|r| {
        now.signed_duration_since(r.captured_at())
            .to_std()
            .unwrap_or(Duration::ZERO)
    })
}

fn emit_gauges<'a>(
    samples: impl IntoIterator<Item = (&'a Desc, f64, &'a [&'a str])>,
    out: &mut Vec<MetricFamily>,
) -> Result<(), MetricsError> {
    for (desc, value, label_values) in samples {
        out.push(const_gauge(desc, value, label_values)?);
    }
    Ok(())
}

/// Builds a single-sample gauge family for `desc`.
fn const_gauge(
    desc: &Desc,
    value: f64,
    label_values: &[&str],
) -> Result<MetricFamily, prometheus::Error> {
    if desc.variable_labels.len() != label_values.len() {
        return Err(prometheus::Error::InconsistentCardinality {
            expect: desc.variable_labels.len(),
            got: label_values.len(),
        });
    }

    let mut labels = desc.const_label_pairs.clone();
    for (name, value) in desc.variable_labels.iter().zip(label_values) {
        let mut pair = LabelPair::default();
        pair.set_name(name.clone());
        pair.set_value(value.to_string());
        labels.push(pair);
    }
    labels.sort_by(|a, b| a.get_name().cmp(b.get_name()));

    let mut gauge = proto::Gauge::default();
    gauge.set_value(value);

    let mut metric = proto::Metric::default();
    metric.set_label(labels.into());
    metric.set_gauge(gauge);

    let mut family = MetricFamily::default();
    family.set_name(desc.fq_name.clone());
    family.set_help(desc.help.clone());
    family.set_field_type(MetricType::GAUGE);
    family.mut_metric().push(metric);
    Ok(family)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceData, Firmware, MockDevice, Sensors};
    use crate::metrics::ManualClock;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    const ADDRESS: &str = "C4:7C:8D:6A:3E:11";

    fn sample() -> DeviceData {
        DeviceData {
            firmware: Firmware {
                version: "1.2".into(),
                battery: 80,
            },
            sensors: Sensors {
                conductivity: 350,
                light: 1200,
                moisture: 30,
                temperature: 22.5,
            },
        }
    }

    fn setup(cache: Duration) -> (FlowercareCollector, Arc<MockDevice>, Arc<ManualClock>) {
        let device = Arc::new(MockDevice::new());
        let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(0, 0).unwrap()));
        let config = CollectorConfig::new(ADDRESS, "hci0", cache).unwrap();
        let collector =
            FlowercareCollector::with_clock(config, device.clone(), clock.clone()).unwrap();
        (collector, device, clock)
    }

    fn value(families: &[MetricFamily], name: &str) -> Option<f64> {
        let family = families.iter().find(|f| f.get_name() == name)?;
        let metric = &family.get_metric()[0];
        Some(match family.get_field_type() {
            MetricType::COUNTER => metric.get_counter().get_value(),
            _ => metric.get_gauge().get_value(),
        })
    }

    fn names(families: &[MetricFamily]) -> Vec<&str> {
        families.iter().map(|f| f.get_name()).collect()
    }

    #[test]
    fn test_end_to_end_scenario() {
        let (collector, device, clock) = setup(Duration::from_secs(120));
        device.push_ok(sample());

        collector.snapshot();
        clock.advance(Duration::from_secs(10));
        let families = collector.snapshot();

        assert_eq!(device.calls(), 1);
        assert_eq!(value(&families, "flowercare_up"), Some(1.0));
        assert_eq!(value(&families, "flowercare_scrape_errors_total"), Some(0.0));
        assert_eq!(value(&families, "flowercare_scrape_timestamp"), Some(0.0));
        assert_eq!(value(&families, "flowercare_info"), Some(1.0));
        assert_eq!(value(&families, "flowercare_battery_percent"), Some(80.0));
        assert_eq!(
            value(&families, "flowercare_conductivity_sm"),
            Some(350.0 * CONDUCTIVITY_FACTOR)
        );
        assert_eq!(value(&families, "flowercare_brightness_lux"), Some(1200.0));
        assert_eq!(value(&families, "flowercare_moisture_percent"), Some(30.0));
        assert_eq!(value(&families, "flowercare_temperature_celsius"), Some(22.5));

        let info = families
            .iter()
            .find(|f| f.get_name() == "flowercare_info")
            .unwrap();
        let labels: Vec<(&str, &str)> = info.get_metric()[0]
            .get_label()
            .iter()
            .map(|l| (l.get_name(), l.get_value()))
            .collect();
        assert_eq!(
            labels,
            vec![("macaddress", "c4:7c:8d:6a:3e:11"), ("version", "1.2")]
        );

        // Past the cache window: refresh before emission.
        device.push_ok(DeviceData {
            firmware: Firmware {
                version: "1.3".into(),
                battery: 79,
            },
            ..sample()
        });
        clock.set(Utc.timestamp_opt(130, 0).unwrap());
        let families = collector.snapshot();

        assert_eq!(device.calls(), 2);
        assert_eq!(value(&families, "flowercare_scrape_timestamp"), Some(130.0));
        assert_eq!(value(&families, "flowercare_battery_percent"), Some(79.0));
    }

    #[test]
    fn test_emission_order() {
        let (collector, device, _clock) = setup(Duration::from_secs(120));
        device.push_ok(sample());

        assert_eq!(
            names(&collector.snapshot()),
            vec![
                "flowercare_up",
                "flowercare_scrape_errors_total",
                "flowercare_scrape_timestamp",
                "flowercare_info",
                "flowercare_battery_percent",
                "flowercare_conductivity_sm",
                "flowercare_brightness_lux",
                "flowercare_moisture_percent",
                "flowercare_temperature_celsius",
            ]
        );
    }

    #[test]
    fn test_failure_without_prior_reading() {
        let (collector, device, _clock) = setup(Duration::from_secs(120));
        device.push_err(ReadError::Transport("connection refused".into()));

        let families = collector.snapshot();

        assert_eq!(
            names(&families),
            vec!["flowercare_up", "flowercare_scrape_errors_total"]
        );
        assert_eq!(value(&families, "flowercare_up"), Some(0.0));
        assert_eq!(value(&families, "flowercare_scrape_errors_total"), Some(1.0));
    }

    #[test]
    fn test_failure_preserves_cached_reading() {
        let (collector, device, clock) = setup(Duration::from_secs(120));
        device.push_ok(sample());
        collector.snapshot();

        clock.advance(Duration::from_secs(121));
        device.push_err(ReadError::Transport("timeout".into()));
        let families = collector.snapshot();

        assert_eq!(device.calls(), 2);
        assert_eq!(value(&families, "flowercare_up"), Some(0.0));
        assert_eq!(value(&families, "flowercare_scrape_errors_total"), Some(1.0));
        // Expired, so not emitted, but still cached as-is.
        assert_eq!(value(&families, "flowercare_battery_percent"), None);
        let cached = collector.cache.lock().unwrap().clone().unwrap();
        assert_eq!(cached.captured_at().timestamp(), 0);
        assert_eq!(cached.firmware().battery, 80);
    }

    /// Returns queued instants in order, then repeats the last one.
    struct StepClock(Mutex<Vec<chrono::DateTime<Utc>>>);

    impl Clock for StepClock {
        fn now(&self) -> chrono::DateTime<Utc> {
            let mut times = self.0.lock().unwrap();
            if times.len() > 1 {
                times.remove(0)
            } else {
                times[0]
            }
        }
    }

    #[test]
    fn test_failure_serves_fresh_prior_reading() {
        let at = |secs| Utc.timestamp_opt(secs, 0).unwrap();
        let device = Arc::new(MockDevice::new());
        // One entry per `now()` call; the wall clock steps back during the
        // failed fetch of the second scrape.
        let clock = Arc::new(StepClock(Mutex::new(vec![
            at(0),   // scrape 1: staleness check (empty cache)
            at(0),   // scrape 1: capture time of the fetched reading
            at(0),   // scrape 1: freshness re-check
            at(121), // scrape 2: staleness check, refresh attempted and fails
            at(100), // scrape 2: freshness re-check, reading still in window
        ])));
        let config = CollectorConfig::new(ADDRESS, "hci0", Duration::from_secs(120)).unwrap();
        let collector = FlowercareCollector::with_clock(config, device.clone(), clock).unwrap();

        device.push_ok(sample());
        let before = collector.snapshot();

        device.push_err(ReadError::Transport("timeout".into()));
        let after = collector.snapshot();

        assert_eq!(device.calls(), 2);
        assert_eq!(value(&after, "flowercare_up"), Some(0.0));
        assert_eq!(value(&after, "flowercare_scrape_errors_total"), Some(1.0));
        assert_eq!(before[2..], after[2..]);
    }

    #[test]
    fn test_cache_window_edges() {
        let at_millis = |ms| Utc.timestamp_millis_opt(ms).unwrap();
        let (collector, device, clock) = setup(Duration::from_secs(120));
        device.push_ok(sample());
        collector.snapshot();

        // Just inside the window: served from cache.
        clock.set(at_millis(119_999));
        let families = collector.snapshot();
        assert_eq!(device.calls(), 1);
        assert_eq!(value(&families, "flowercare_battery_percent"), Some(80.0));

        // Exactly at the window: neither refreshed nor emitted.
        clock.set(at_millis(120_000));
        let families = collector.snapshot();
        assert_eq!(device.calls(), 1);
        assert_eq!(value(&families, "flowercare_battery_percent"), None);
        assert_eq!(value(&families, "flowercare_up"), Some(1.0));

        // Just past the window: refreshed, then emitted.
        device.push_ok(DeviceData {
            firmware: Firmware {
                version: "1.2".into(),
                battery: 77,
            },
            ..sample()
        });
        clock.set(at_millis(120_001));
        let families = collector.snapshot();
        assert_eq!(device.calls(), 2);
        assert_eq!(value(&families, "flowercare_battery_percent"), Some(77.0));
        assert_eq!(value(&families, "flowercare_scrape_timestamp"), Some(120.0));
    }

    #[test]
    fn test_zero_duration_refreshes_every_scrape() {
        let (collector, device, clock) = setup(Duration::ZERO);
        device.push_ok(sample());
        device.push_err(ReadError::Transport("timeout".into()));

        let families = collector.snapshot();
        assert_eq!(value(&families, "flowercare_up"), Some(1.0));
        // Age zero is never younger than a zero window.
        assert_eq!(value(&families, "flowercare_battery_percent"), None);

        clock.advance(Duration::from_millis(1));
        let families = collector.snapshot();
        assert_eq!(device.calls(), 2);
        assert_eq!(value(&families, "flowercare_up"), Some(0.0));
        assert_eq!(value(&families, "flowercare_scrape_errors_total"), Some(1.0));
    }

    #[test]
    fn test_scrapes_within_window_are_identical() {
        let (collector, device, clock) = setup(Duration::from_secs(120));
        device.push_ok(sample());

        let first = collector.snapshot();
        clock.advance(Duration::from_secs(60));
        let second = collector.snapshot();

        assert_eq!(device.calls(), 1);
        assert_eq!(first, second);
    }

    #[test]
    fn test_passes_address_and_adapter() {
        let (collector, device, _clock) = setup(Duration::from_secs(120));
        collector.snapshot();
        assert_eq!(
            device.requests(),
            vec![(ADDRESS.to_string(), "hci0".to_string())]
        );
    }

    #[test]
    fn test_emit_stops_at_first_bad_metric() {
        let (collector, _device, _clock) = setup(Duration::from_secs(120));
        let battery = &collector.sensor_descs[0].0;
        let light = &collector.sensor_descs[2].0;

        let mut out = Vec::new();
        let result = emit_gauges(
            [
                (battery, 80.0, NO_LABELS),
                // info requires a version label
                (&collector.info_desc, 1.0, NO_LABELS),
                (light, 1200.0, NO_LABELS),
            ],
            &mut out,
        );

        assert!(matches!(
            result,
            Err(MetricsError::Prometheus(
                prometheus::Error::InconsistentCardinality { expect: 1, got: 0 }
            ))
        ));
        assert_eq!(names(&out), vec!["flowercare_battery_percent"]);
    }

    #[test]
    fn test_describes_all_metrics() {
        let (collector, _device, _clock) = setup(Duration::from_secs(120));
        let names: Vec<&str> = collector.desc().iter().map(|d| d.fq_name.as_str()).collect();
        assert_eq!(names.len(), 9);
        assert!(names.contains(&"flowercare_up"));
        assert!(names.contains(&"flowercare_info"));
        assert!(names.contains(&"flowercare_temperature_celsius"));
    }

    proptest! {
        #[test]
        fn prop_conductivity_is_scaled(raw in any::<u16>()) {
            let (collector, device, _clock) = setup(Duration::from_secs(120));
            let mut data = sample();
            data.sensors.conductivity = raw;
            device.push_ok(data);

            let families = collector.snapshot();
            prop_assert_eq!(
                value(&families, "flowercare_conductivity_sm"),
                Some(f64::from(raw) * 0.0001)
            );
        }

        #[test]
        fn prop_reading_served_within_window(offset_ms in 0i64..120_000) {
            let (collector, device, clock) = setup(Duration::from_secs(120));
            device.push_ok(sample());
            collector.snapshot();

            clock.set(Utc.timestamp_millis_opt(offset_ms).unwrap());
            let families = collector.snapshot();

            prop_assert_eq!(device.calls(), 1);
            prop_assert_eq!(value(&families, "flowercare_scrape_timestamp"), Some(0.0));
            prop_assert_eq!(value(&families, "flowercare_temperature_celsius"), Some(22.5));
        }

        #[test]
        fn prop_error_counter_never_decreases(outcomes in prop::collection::vec(any::<bool>(), 1..20)) {
            let (collector, device, clock) = setup(Duration::from_secs(30));
            let mut last = 0.0;

            for ok in outcomes {
                if ok {
                    device.push_ok(sample());
                } else {
                    device.push_err(ReadError::Transport("timeout".into()));
                }
                clock.advance(Duration::from_secs(31));

                let errors = value(&collector.snapshot(), "flowercare_scrape_errors_total").unwrap();
                prop_assert!(errors >= last);
                last = errors;
            }
        }
    }
}
