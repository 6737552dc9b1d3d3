//! In-memory metrics recorder and its JSON export.
//!
//! The `elevtile` binary installs an [`InMemoryRecorder`] when asked for a
//! metrics file and writes [`InMemoryRecorder::export`] once the command
//! has finished. Tests install one locally with
//! [`metrics::with_local_recorder`] and query it directly.

use metrics::{Counter, Gauge, Histogram, HistogramFn, Key, KeyName, Metadata, Recorder, SharedString, Unit};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Per-label breakdown: label name, then label value, then the figure for
/// every series carrying that pair.
pub type LabelBreakdown<T> = BTreeMap<String, BTreeMap<String, T>>;

/// Every recorded metric, keyed by name.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsExport {
    pub metrics: BTreeMap<String, MetricValue>,
}

/// Aggregated value of one metric across all its label sets.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricValue {
    Counter {
        total: u64,
        labels: LabelBreakdown<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Gauge {
        total: f64,
        labels: LabelBreakdown<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Histogram {
        count: u64,
        sum: f64,
        min: f64,
        max: f64,
        mean: f64,
        /// Observation counts.
        labels: LabelBreakdown<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
}

/// Observations of one histogram series.
#[derive(Debug, Default)]
struct Samples(Mutex<Vec<f64>>);

impl Samples {
    fn values(&self) -> Vec<f64> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl HistogramFn for Samples {
    fn record(&self, value: f64) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).push(value);
    }
}

#[derive(Debug, Default)]
struct Registry {
    counters: HashMap<Key, Arc<AtomicU64>>,
    /// Gauge values are stored as `f64` bits.
    gauges: HashMap<Key, Arc<AtomicU64>>,
    histograms: HashMap<Key, Arc<Samples>>,
    descriptions: HashMap<String, String>,
}

/// Recorder keeping every series in memory.
///
/// Clones share the same storage, so one handle can be installed as the
/// global recorder while another is kept for export.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRecorder {
    registry: Arc<Mutex<Registry>>,
}

impl InMemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn describe(&self, key: KeyName, description: SharedString) {
        let text: &str = &description;
        self.lock().descriptions.insert(key.as_str().to_owned(), text.to_owned());
    }

    /// Description registered for `name`, if any.
    pub fn description(&self, name: &str) -> Option<String> {
        self.lock().descriptions.get(name).cloned()
    }

    /// Sum of every counter series named `name` whose labels include all of
    /// `labels`.
    pub fn counter_value(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.lock()
            .counters
            .iter()
            .filter(|(key, _)| key_matches(key, name, labels))
            .map(|(_, value)| value.load(Ordering::Relaxed))
            .sum()
    }

    /// Number of observations recorded for histogram `name` across all
    /// label sets.
    pub fn histogram_count(&self, name: &str) -> usize {
        self.lock()
            .histograms
            .iter()
            .filter(|(key, _)| key.name() == name)
            .map(|(_, samples)| samples.values().len())
            .sum()
    }

    /// Aggregate every series into one value per metric name.
    pub fn export(&self) -> MetricsExport {
        let registry = self.lock();
        let description = |name: &str| registry.descriptions.get(name).cloned();
        let mut metrics = BTreeMap::new();

        let mut counters: BTreeMap<&str, (u64, LabelBreakdown<u64>)> = BTreeMap::new();
        for (key, value) in &registry.counters {
            let value = value.load(Ordering::Relaxed);
            let entry = counters.entry(key.name()).or_default();
            entry.0 += value;
            for label in key.labels() {
                *entry
                    .1
                    .entry(label.key().to_owned())
                    .or_default()
                    .entry(label.value().to_owned())
                    .or_default() += value;
            }
        }
        for (name, (total, labels)) in counters {
            metrics.insert(
                name.to_owned(),
                MetricValue::Counter {
                    total,
                    labels,
                    description: description(name),
                },
            );
        }

        let mut gauges: BTreeMap<&str, (f64, LabelBreakdown<f64>)> = BTreeMap::new();
        for (key, bits) in &registry.gauges {
            let value = f64::from_bits(bits.load(Ordering::Relaxed));
            let entry = gauges.entry(key.name()).or_default();
            entry.0 += value;
            for label in key.labels() {
                *entry
                    .1
                    .entry(label.key().to_owned())
                    .or_default()
                    .entry(label.value().to_owned())
                    .or_default() += value;
            }
        }
        for (name, (total, labels)) in gauges {
            metrics.insert(
                name.to_owned(),
                MetricValue::Gauge {
                    total,
                    labels,
                    description: description(name),
                },
            );
        }

        let mut histograms: BTreeMap<&str, (Vec<f64>, LabelBreakdown<u64>)> = BTreeMap::new();
        for (key, samples) in &registry.histograms {
            let values = samples.values();
            let entry = histograms.entry(key.name()).or_default();
            for label in key.labels() {
                *entry
                    .1
                    .entry(label.key().to_owned())
                    .or_default()
                    .entry(label.value().to_owned())
                    .or_default() += values.len() as u64;
            }
            entry.0.extend(values);
        }
        for (name, (values, labels)) in histograms {
            let count = values.len() as u64;
            let sum: f64 = values.iter().sum();
            let (min, max) = if values.is_empty() {
                (0.0, 0.0)
            } else {
                values
                    .iter()
                    .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)))
            };
            let mean = if count == 0 { 0.0 } else { sum / count as f64 };
            metrics.insert(
                name.to_owned(),
                MetricValue::Histogram {
                    count,
                    sum,
                    min,
                    max,
                    mean,
                    labels,
                    description: description(name),
                },
            );
        }

        MetricsExport { metrics }
    }

    /// Write [`export`](Self::export) to `path` as pretty-printed JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let text = serde_json::to_string_pretty(&self.export()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }
}

fn key_matches(key: &Key, name: &str, labels: &[(&str, &str)]) -> bool {
    key.name() == name
        && labels
            .iter()
            .all(|(k, v)| key.labels().any(|label| label.key() == *k && label.value() == *v))
}

impl Recorder for InMemoryRecorder {
    fn describe_counter(&self, key: KeyName, _unit: Option<Unit>, description: SharedString) {
        self.describe(key, description);
    }

    fn describe_gauge(&self, key: KeyName, _unit: Option<Unit>, description: SharedString) {
        self.describe(key, description);
    }

    fn describe_histogram(&self, key: KeyName, _unit: Option<Unit>, description: SharedString) {
        self.describe(key, description);
    }

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        let handle = self.lock().counters.entry(key.clone()).or_default().clone();
        Counter::from_arc(handle)
    }

    fn register_gauge(&self, key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        let handle = self.lock().gauges.entry(key.clone()).or_default().clone();
        Gauge::from_arc(handle)
    }

    fn register_histogram(&self, key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        let handle = self.lock().histograms.entry(key.clone()).or_default().clone();
        Histogram::from_arc(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_aggregate_by_label() {
        let recorder = InMemoryRecorder::new();
        metrics::with_local_recorder(&recorder, || {
            metrics::counter!("requests", "operation" => "stats", "zoom" => "3").increment(2);
            metrics::counter!("requests", "operation" => "render", "zoom" => "3").increment(1);
            metrics::describe_counter!("requests", "Requests received");
        });

        assert_eq!(recorder.counter_value("requests", &[]), 3);
        assert_eq!(recorder.counter_value("requests", &[("operation", "stats")]), 2);
        assert_eq!(recorder.counter_value("requests", &[("zoom", "3")]), 3);
        assert_eq!(recorder.counter_value("requests", &[("operation", "other")]), 0);

        let export = recorder.export();
        match &export.metrics["requests"] {
            MetricValue::Counter {
                total,
                labels,
                description,
            } => {
                assert_eq!(*total, 3);
                assert_eq!(labels["operation"]["render"], 1);
                assert_eq!(description.as_deref(), Some("Requests received"));
            }
            other => panic!("expected a counter, got {other:?}"),
        }
    }

    #[test]
    fn test_histogram_summary() {
        let recorder = InMemoryRecorder::new();
        metrics::with_local_recorder(&recorder, || {
            for v in [1.0, 2.0, 6.0] {
                metrics::histogram!("sizes", "operation" => "render").record(v);
            }
            metrics::gauge!("level").set(2.5);
        });

        assert_eq!(recorder.histogram_count("sizes"), 3);
        let export = recorder.export();
        match &export.metrics["sizes"] {
            MetricValue::Histogram {
                count,
                sum,
                min,
                max,
                mean,
                labels,
                ..
            } => {
                assert_eq!((*count, *sum, *min, *max, *mean), (3, 9.0, 1.0, 6.0, 3.0));
                assert_eq!(labels["operation"]["render"], 3);
            }
            other => panic!("expected a histogram, got {other:?}"),
        }
        assert!(matches!(export.metrics["level"], MetricValue::Gauge { total, .. } if total == 2.5));

        let json = serde_json::to_value(&export).unwrap();
        assert_eq!(json["metrics"]["sizes"]["kind"], "histogram");
    }
}
