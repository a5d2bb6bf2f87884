//! Metric registry that stores every exported series and renders them.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Write;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, trace};

use crate::entity::StreamEntity;
use crate::exposition::{
    build_metric_name, escape_help, format_labels, format_value, sanitize_label_name,
};
use crate::schema::{Labels, METRICS, MetricDescriptor, MetricKind, descriptor};

/// Registry misuse. Every variant indicates a programming error.
#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("Unknown metric: {0}")]
    UnknownMetric(String),
    #[error("Label schema mismatch for '{metric}': expected [{expected}], got [{actual}]")]
    SchemaMismatch {
        metric: String,
        expected: String,
        actual: String,
    },
    #[error("Invalid delta {delta} for counter '{metric}'")]
    InvalidDelta { metric: String, delta: f64 },
    #[error("Metric '{metric}' is a {actual}, not a {expected}")]
    WrongKind {
        metric: String,
        expected: &'static str,
        actual: &'static str,
    },
}

/// A unique identifier for a metric time series.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SeriesKey {
    /// The declared (unprefixed) metric name.
    pub name: &'static str,
    /// Label pairs in the descriptor's declared order.
    pub labels: Vec<(String, String)>,
}

impl SeriesKey {
    /// Validate `labels` against the descriptor and build the canonical key.
    fn new(desc: &'static MetricDescriptor, labels: &Labels) -> Result<Self, RegistryError> {
        let names = desc.label_names();
        if !labels.matches(names) {
            return Err(RegistryError::SchemaMismatch {
                metric: desc.name.to_string(),
                expected: names.join(","),
                actual: labels.keys().collect::<Vec<_>>().join(","),
            });
        }

        let labels = names
            .iter()
            .map(|n| (n.to_string(), labels.get(n).unwrap_or_default().to_string()))
            .collect();

        Ok(Self {
            name: desc.name,
            labels,
        })
    }
}

/// The current value of one series.
#[derive(Debug, Clone, PartialEq)]
pub enum SeriesValue {
    Gauge(f64),
    Counter(f64),
    Info(BTreeMap<String, String>),
}

/// Thread-safe metric registry.
///
/// Lock order is `registered` before `series`.
pub struct MetricRegistry {
    /// Metric name prefix used when rendering.
    prefix: String,
    /// Current value of every series.
    series: RwLock<HashMap<SeriesKey, SeriesValue>>,
    /// Keys of streams whose series have been zero-initialized.
    registered: Mutex<HashSet<String>>,
}

/// Create a shareable registry handle.
pub type SharedRegistry = Arc<MetricRegistry>;

impl MetricRegistry {
    /// Create an empty registry rendering names as `{prefix}_{metric}`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            series: RwLock::new(HashMap::new()),
            registered: Mutex::new(HashSet::new()),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Zero-initialize every numeric series of a stream, once.
    ///
    /// Returns `Ok(false)` if the stream was already registered, in which
    /// case nothing is touched. Series shared with an already registered
    /// stream (channel-level gauges) keep their current value.
    pub fn register_stream(&self, entity: &StreamEntity) -> Result<bool, RegistryError> {
        let key = entity.key();
        let mut registered = self.registered.lock();

        if registered.contains(&key) {
            trace!(stream = %entity.stream_name, "Stream already registered");
            return Ok(false);
        }

        let mut initialized = 0;
        for desc in METRICS.iter().filter(|d| d.is_numeric()) {
            let series_key = SeriesKey::new(desc, &entity.labels(desc.family))?;
            let zero = match desc.kind {
                MetricKind::Counter => SeriesValue::Counter(0.0),
                _ => SeriesValue::Gauge(0.0),
            };

            let mut series = self.series.write();
            if !series.contains_key(&series_key) {
                series.insert(series_key, zero);
                initialized += 1;
            }
        }

        registered.insert(key);
        debug!(
            stream = %entity.stream_name,
            channel = %entity.channel_name,
            initialized,
            "Registered stream"
        );

        Ok(true)
    }

    /// Overwrite the value of a gauge series.
    pub fn set_gauge(&self, name: &str, labels: &Labels, value: f64) -> Result<(), RegistryError> {
        let desc = lookup(name, MetricKind::Gauge)?;
        let key = SeriesKey::new(desc, labels)?;

        self.series.write().insert(key, SeriesValue::Gauge(value));
        Ok(())
    }

    /// Add `delta` to a counter series, creating it at zero first if needed.
    pub fn increment_counter(
        &self,
        name: &str,
        labels: &Labels,
        delta: f64,
    ) -> Result<(), RegistryError> {
        let desc = lookup(name, MetricKind::Counter)?;
        if !delta.is_finite() || delta < 0.0 {
            return Err(RegistryError::InvalidDelta {
                metric: name.to_string(),
                delta,
            });
        }
        let key = SeriesKey::new(desc, labels)?;

        let mut series = self.series.write();
        if let SeriesValue::Counter(value) = series.entry(key).or_insert(SeriesValue::Counter(0.0))
        {
            *value += delta;
        }
        Ok(())
    }

    /// Increment a counter series by one.
    pub fn inc(&self, name: &str, labels: &Labels) -> Result<(), RegistryError> {
        self.increment_counter(name, labels, 1.0)
    }

    /// Replace the whole field map of an info series.
    pub fn record_info(
        &self,
        name: &str,
        labels: &Labels,
        fields: BTreeMap<String, String>,
    ) -> Result<(), RegistryError> {
        let desc = lookup(name, MetricKind::Info)?;
        let key = SeriesKey::new(desc, labels)?;

        self.series.write().insert(key, SeriesValue::Info(fields));
        Ok(())
    }

    /// Current value of a gauge series.
    pub fn gauge(&self, name: &str, labels: &Labels) -> Option<f64> {
        match self.value(name, labels)? {
            SeriesValue::Gauge(v) => Some(v),
            _ => None,
        }
    }

    /// Current value of a counter series.
    pub fn counter(&self, name: &str, labels: &Labels) -> Option<f64> {
        match self.value(name, labels)? {
            SeriesValue::Counter(v) => Some(v),
            _ => None,
        }
    }

    /// Current field map of an info series.
    pub fn info(&self, name: &str, labels: &Labels) -> Option<BTreeMap<String, String>> {
        match self.value(name, labels)? {
            SeriesValue::Info(fields) => Some(fields),
            _ => None,
        }
    }

    fn value(&self, name: &str, labels: &Labels) -> Option<SeriesValue> {
        let desc = descriptor(name)?;
        let key = SeriesKey::new(desc, labels).ok()?;
        self.series.read().get(&key).cloned()
    }

    /// Get the current number of stored series.
    pub fn series_count(&self) -> usize {
        self.series.read().len()
    }

    /// Number of streams registered so far.
    pub fn registered_streams(&self) -> usize {
        self.registered.lock().len()
    }

    pub fn is_registered(&self, entity: &StreamEntity) -> bool {
        self.registered.lock().contains(&entity.key())
    }

    /// Render all series in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        let registered = self.registered_streams();
        let series = self.series.read();
        let mut output = Vec::with_capacity(series.len() * 120);

        // Group series by metric for HELP/TYPE comments
        let mut by_name: HashMap<&str, Vec<(&SeriesKey, &SeriesValue)>> = HashMap::new();
        for (key, value) in series.iter() {
            by_name.entry(key.name).or_default().push((key, value));
        }

        let mut descriptors: Vec<&MetricDescriptor> = METRICS.iter().collect();
        descriptors.sort_by_key(|d| d.name);

        for desc in descriptors {
            let Some(entries) = by_name.get_mut(desc.name) else {
                continue;
            };
            entries.sort_by(|a, b| a.0.labels.cmp(&b.0.labels));

            let full_name = build_metric_name(&self.prefix, desc.name);
            writeln!(output, "# HELP {} {}", full_name, escape_help(desc.help)).ok();
            writeln!(output, "# TYPE {} {}", full_name, desc.kind.exposition_type()).ok();

            for (key, value) in entries.iter() {
                match value {
                    SeriesValue::Gauge(v) | SeriesValue::Counter(v) => {
                        writeln!(
                            output,
                            "{}{} {}",
                            full_name,
                            format_labels(&key.labels),
                            format_value(*v)
                        )
                        .ok();
                    }
                    SeriesValue::Info(fields) => {
                        // Info records get value=1 with the fields as labels
                        let mut labels = key.labels.clone();
                        for (k, v) in fields {
                            let k = sanitize_label_name(k);
                            if !labels.iter().any(|(lk, _)| lk == &k) {
                                labels.push((k, v.clone()));
                            }
                        }
                        writeln!(output, "{}{} 1", full_name, format_labels(&labels)).ok();
                    }
                }
            }
        }

        // Exporter self-metrics
        let series_total = build_metric_name(&self.prefix, "exporter_series_total");
        let streams = build_metric_name(&self.prefix, "exporter_streams_registered");
        writeln!(output).ok();
        writeln!(output, "# TYPE {} gauge", series_total).ok();
        writeln!(output, "{} {}", series_total, series.len()).ok();
        writeln!(output, "# TYPE {} gauge", streams).ok();
        writeln!(output, "{} {}", streams, registered).ok();

        String::from_utf8(output).unwrap_or_default()
    }
}

/// Look up a declared metric and check it has the expected kind.
fn lookup(name: &str, expected: MetricKind) -> Result<&'static MetricDescriptor, RegistryError> {
    let desc = descriptor(name).ok_or_else(|| RegistryError::UnknownMetric(name.to_string()))?;
    if desc.kind != expected {
        return Err(RegistryError::WrongKind {
            metric: name.to_string(),
            expected: expected.as_str(),
            actual: desc.kind.as_str(),
        });
    }
    Ok(desc)
}
