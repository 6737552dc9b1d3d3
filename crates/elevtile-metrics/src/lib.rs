//! Metric declarations for the elevation tile service.
//!
//! Every metric the service records is declared once as a [`Metric`]
//! constant in [`metric_defs`], carrying its name, kind, unit and label
//! keys. The `metrics` crate is re-exported so callers record through the
//! same facade version.
//!
//! # Example
//!
//! ```rust
//! use elevtile_metrics::{metric_defs, RequestLabels};
//!
//! elevtile_metrics::describe_metrics();
//!
//! let labels = RequestLabels::new("histogram").with_zoom(12);
//! metrics::counter!(metric_defs::REQUESTS.name, &labels.to_labels()).increment(1);
//! ```

pub use metrics;

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

/// The kind of metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Monotonically increasing.
    Counter,
    /// Goes up and down.
    Gauge,
    /// Records a distribution.
    Histogram,
}

impl MetricKind {
    /// Lowercase name of the kind.
    pub const fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A metric declaration.
///
/// Built with the `const` constructors so declarations live in constants:
///
/// ```rust
/// use elevtile_metrics::{Metric, MetricKind};
/// use metrics::Unit;
///
/// const TILES_DECODED: Metric = Metric::counter("elevtile.geotiff.decoded")
///     .with_description("GeoTIFF tiles decoded from disk")
///     .with_unit(Unit::Count)
///     .with_labels(&["zoom"]);
///
/// assert_eq!(TILES_DECODED.kind, MetricKind::Counter);
/// ```
#[derive(Debug, Clone)]
pub struct Metric {
    /// Dotted metric name.
    pub name: &'static str,
    pub kind: MetricKind,
    pub description: &'static str,
    pub unit: Option<Unit>,
    /// Label keys recorded with the metric.
    pub labels: &'static [&'static str],
}

impl Metric {
    const fn new(name: &'static str, kind: MetricKind) -> Self {
        Self {
            name,
            kind,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    /// Declare a counter.
    pub const fn counter(name: &'static str) -> Self {
        Self::new(name, MetricKind::Counter)
    }

    /// Declare a gauge.
    pub const fn gauge(name: &'static str) -> Self {
        Self::new(name, MetricKind::Gauge)
    }

    /// Declare a histogram.
    pub const fn histogram(name: &'static str) -> Self {
        Self::new(name, MetricKind::Histogram)
    }

    pub const fn with_description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    pub const fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    pub const fn with_labels(mut self, labels: &'static [&'static str]) -> Self {
        self.labels = labels;
        self
    }

    /// Register the description with the installed recorder.
    pub fn describe(&self) {
        match (self.kind, self.unit) {
            (MetricKind::Counter, Some(unit)) => {
                describe_counter!(self.name, unit, self.description);
            }
            (MetricKind::Counter, None) => {
                describe_counter!(self.name, self.description);
            }
            (MetricKind::Gauge, Some(unit)) => {
                describe_gauge!(self.name, unit, self.description);
            }
            (MetricKind::Gauge, None) => {
                describe_gauge!(self.name, self.description);
            }
            (MetricKind::Histogram, Some(unit)) => {
                describe_histogram!(self.name, unit, self.description);
            }
            (MetricKind::Histogram, None) => {
                describe_histogram!(self.name, self.description);
            }
        }
    }
}

/// Every metric recorded by the service.
pub mod metric_defs {
    use super::{Metric, Unit};

    /// Labels on every per-request metric.
    pub const REQUEST_LABELS: &[&str] = &["operation", "zoom"];

    /// Requests handled, including rejected ones.
    pub const REQUESTS: Metric = Metric::counter("elevtile.requests")
        .with_description("Requests handled per operation")
        .with_unit(Unit::Count)
        .with_labels(REQUEST_LABELS);

    /// Requests rejected before any computation.
    pub const INVALID_REQUESTS: Metric = Metric::counter("elevtile.requests.invalid")
        .with_description("Requests rejected for invalid parameters")
        .with_unit(Unit::Count)
        .with_labels(REQUEST_LABELS);

    /// Statistics requests that found no data.
    pub const NOT_FOUND: Metric = Metric::counter("elevtile.requests.not_found")
        .with_description("Single-value requests with no underlying data")
        .with_unit(Unit::Count)
        .with_labels(REQUEST_LABELS);

    /// Requests that failed reaching the tile store.
    pub const FAILED_REQUESTS: Metric = Metric::counter("elevtile.requests.failed")
        .with_description("Requests failed by tile store or encoding errors")
        .with_unit(Unit::Count)
        .with_labels(REQUEST_LABELS);

    /// Tile fetches by outcome.
    ///
    /// Labels: outcome (`hit`, `absent`, `failed`)
    pub const TILE_FETCHES: Metric = Metric::counter("elevtile.tiles.fetched")
        .with_description("Tile store lookups by outcome")
        .with_unit(Unit::Count)
        .with_labels(&["outcome"]);

    /// Tiles merged into one envelope mosaic.
    pub const ENVELOPE_TILES: Metric = Metric::histogram("elevtile.envelope.tiles")
        .with_description("Tiles intersecting a statistics envelope")
        .with_unit(Unit::Count)
        .with_labels(&["zoom"]);

    /// Render requests answered with the empty-tile placeholder.
    pub const PLACEHOLDER_RENDERS: Metric = Metric::counter("elevtile.render.placeholder")
        .with_description("Renders answered with the empty-tile placeholder")
        .with_unit(Unit::Count)
        .with_labels(REQUEST_LABELS);

    /// Wall time from tile fetch to encoded PNG.
    pub const RENDER_DURATION: Metric = Metric::histogram("elevtile.render.duration_ms")
        .with_description("Time to produce a rendered tile")
        .with_unit(Unit::Milliseconds)
        .with_labels(&["operation"]);

    /// Encoded PNG size.
    pub const PNG_SIZE: Metric = Metric::histogram("elevtile.render.png_bytes")
        .with_description("Size of encoded PNG tiles")
        .with_unit(Unit::Bytes)
        .with_labels(&["operation"]);

    /// Colormap names that fell back to the operation's default ramp.
    pub const COLORMAP_FALLBACKS: Metric = Metric::counter("elevtile.render.colormap_fallback")
        .with_description("Unrecognised colormap names replaced by the fallback ramp")
        .with_unit(Unit::Count)
        .with_labels(&["operation"]);

    /// All metrics, for bulk registration.
    pub const ALL: &[Metric] = &[
        REQUESTS,
        INVALID_REQUESTS,
        NOT_FOUND,
        FAILED_REQUESTS,
        TILE_FETCHES,
        ENVELOPE_TILES,
        PLACEHOLDER_RENDERS,
        RENDER_DURATION,
        PNG_SIZE,
        COLORMAP_FALLBACKS,
    ];
}

/// Labels attached to per-request metrics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLabels {
    /// Operation name, e.g. `statistics` or `render.hillshade`.
    pub operation: String,
    /// Zoom level of the requested tiles, when the request has one.
    pub zoom: Option<u8>,
}

impl RequestLabels {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            zoom: None,
        }
    }

    pub fn with_zoom(mut self, zoom: u8) -> Self {
        self.zoom = Some(zoom);
        self
    }

    /// Labels in the `metrics` crate's `(key, value)` form.
    pub fn to_labels(&self) -> Vec<(&'static str, String)> {
        let mut labels = vec![("operation", self.operation.clone())];
        if let Some(zoom) = self.zoom {
            labels.push(("zoom", zoom.to_string()));
        }
        labels
    }

    /// Only the operation label.
    pub fn operation_only(&self) -> Vec<(&'static str, String)> {
        vec![("operation", self.operation.clone())]
    }
}

/// Register every metric description; call once after installing a recorder.
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}
