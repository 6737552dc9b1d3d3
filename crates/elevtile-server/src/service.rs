//! The request surface: validated operations over a tile store.
//!
//! Each operation validates its parameters before touching the store, so
//! invalid requests never reach the engine. Missing data is an ordinary
//! outcome: single-value operations report [`ServiceError::NotFound`],
//! collection operations return an empty list and renders return
//! [`EMPTY_TILE`].

use crate::config::ServerConfig;
use elevtile_analytics::{
    compute_histogram, compute_quantiles, compute_statistics, compute_statistics_over_envelope, derive_tile, png,
    AnalyticsError, ColorRamp, Derivative, EnvelopeResolver, HistogramBucket, Palette, Quantile, RampRegistry,
    Statistics, ARCTIC, BW_LINEAR, EMPTY_TILE, GRAY_DK, MBY,
};
use elevtile_metrics::{metric_defs, RequestLabels};
use elevtile_raster::{Envelope, GeoTiffTileStore, Grid, RasterError, TileAddress, TileStore, MAX_ZOOM};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, trace};

/// Outcome classes of a failed request.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Rejected before any computation.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The address or envelope has no data.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The tile store or the encoder failed.
    #[error("Internal error: {0}")]
    Internal(#[source] AnalyticsError),
}

impl From<AnalyticsError> for ServiceError {
    fn from(err: AnalyticsError) -> Self {
        match err {
            AnalyticsError::InvalidParameter(msg) => ServiceError::InvalidParameter(msg),
            AnalyticsError::Raster(RasterError::InvalidParameter(msg)) => ServiceError::InvalidParameter(msg),
            other => ServiceError::Internal(other),
        }
    }
}

impl From<RasterError> for ServiceError {
    fn from(err: RasterError) -> Self {
        AnalyticsError::from(err).into()
    }
}

/// Result type for service operations.
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// What a render request draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum RenderKind {
    /// Elevation itself.
    Elevation,
    /// Gradient magnitude.
    Slope,
    /// Bearing of the steepest descent.
    Aspect,
    /// Hillshade computed over the tile and its neighbours.
    Hillshade,
    /// Hillshade computed from the tile alone.
    HillshadeTile,
    /// Terrain ruggedness index.
    Tri,
    /// Topographic position index.
    Tpi,
}

impl RenderKind {
    pub const ALL: [RenderKind; 7] = [
        RenderKind::Elevation,
        RenderKind::Slope,
        RenderKind::Aspect,
        RenderKind::Hillshade,
        RenderKind::HillshadeTile,
        RenderKind::Tri,
        RenderKind::Tpi,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            RenderKind::Elevation => "elevation",
            RenderKind::Slope => "slope",
            RenderKind::Aspect => "aspect",
            RenderKind::Hillshade => "hillshade",
            RenderKind::HillshadeTile => "hillshade-tile",
            RenderKind::Tri => "tri",
            RenderKind::Tpi => "tpi",
        }
    }

    /// The terrain derivative drawn, if any.
    pub fn derivative(&self) -> Option<Derivative> {
        match self {
            RenderKind::Elevation => None,
            RenderKind::Slope => Some(Derivative::Slope),
            RenderKind::Aspect => Some(Derivative::Aspect),
            RenderKind::Hillshade | RenderKind::HillshadeTile => Some(Derivative::Hillshade),
            RenderKind::Tri => Some(Derivative::Tri),
            RenderKind::Tpi => Some(Derivative::Tpi),
        }
    }

    /// Ramp used when no colormap is given.
    pub fn default_ramp(&self) -> &'static str {
        match self {
            RenderKind::Elevation => ARCTIC,
            RenderKind::Hillshade | RenderKind::HillshadeTile => BW_LINEAR,
            _ => GRAY_DK,
        }
    }

    /// Ramp used when the colormap name is not recognised.
    pub fn fallback_ramp(&self) -> &'static str {
        match self {
            RenderKind::Elevation => MBY,
            other => other.default_ramp(),
        }
    }

    /// Whether the derivative pulls in neighbouring tiles.
    pub fn is_buffered(&self) -> bool {
        matches!(self, RenderKind::Hillshade)
    }
}

impl fmt::Display for RenderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Elevation statistics and rendering over one tile store.
///
/// Holds no per-request state; one instance serves any number of
/// concurrent requests.
pub struct ElevationService<S> {
    resolver: EnvelopeResolver<S>,
    ramps: Arc<RampRegistry>,
    config: ServerConfig,
}

impl ElevationService<GeoTiffTileStore> {
    /// Build a service over the GeoTIFF pyramid named by `config`.
    ///
    /// Ramps are parsed here, once; `ramp_dir` adds to the built-in set.
    pub fn from_config(config: ServerConfig) -> ServiceResult<Self> {
        let store = GeoTiffTileStore::with_cache_size(&config.tile_dir, config.tile_cache_size);
        let ramps = match &config.ramp_dir {
            Some(dir) => {
                let mut registry = RampRegistry::builtin()?;
                let loaded = registry.load_dir(dir)?;
                info!("loaded {} ramps from {}", loaded, dir.display());
                Arc::new(registry)
            }
            None => RampRegistry::shared()?,
        };
        info!("serving tiles from {}", store.root().display());
        Ok(Self::new(store, ramps, config))
    }
}

impl<S: TileStore> ElevationService<S> {
    /// Create a service over any tile store.
    pub fn new(store: S, ramps: Arc<RampRegistry>, config: ServerConfig) -> Self {
        Self {
            resolver: EnvelopeResolver::new(store),
            ramps,
            config,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn ramps(&self) -> &RampRegistry {
        &self.ramps
    }

    pub fn store(&self) -> &S {
        self.resolver.store()
    }

    /// Validate a tile address against the configured bounds policy.
    pub fn tile_address(&self, zoom: u8, x: u32, y: u32) -> ServiceResult<TileAddress> {
        let address = if self.config.strict_tile_bounds {
            TileAddress::new_strict(zoom, x, y)?
        } else {
            TileAddress::new(zoom, x, y)?
        };
        Ok(address)
    }

    /// Summary statistics of one tile.
    pub fn statistics(&self, zoom: u8, x: u32, y: u32) -> ServiceResult<Statistics> {
        let labels = RequestLabels::new("statistics").with_zoom(zoom);
        observe(&labels, || {
            let address = self.tile_address(zoom, x, y)?;
            let stats = self
                .fetch_tile(&address)?
                .map(|grid| compute_statistics(&grid))
                .unwrap_or_default();
            if stats.is_empty() {
                return Err(ServiceError::NotFound(format!("no elevation data at {address}")));
            }
            Ok(stats)
        })
    }

    /// Summary statistics of every sample under a WGS84 envelope.
    pub fn statistics_by_envelope(
        &self,
        zoom: u8,
        x_min: f64,
        y_min: f64,
        x_max: f64,
        y_max: f64,
    ) -> ServiceResult<Statistics> {
        let labels = RequestLabels::new("statistics-envelope").with_zoom(zoom);
        observe(&labels, || {
            if zoom > MAX_ZOOM {
                return Err(ServiceError::InvalidParameter(format!(
                    "zoom should be at most {MAX_ZOOM}, got {zoom}"
                )));
            }
            let envelope = Envelope::new(x_min, y_min, x_max, y_max)?;
            let bounds = envelope.to_mercator();

            let candidates = self.resolver.candidates(zoom, &bounds)?;
            metrics::histogram!(metric_defs::ENVELOPE_TILES.name, "zoom" => zoom.to_string())
                .record(candidates.len() as f64);
            let (tiles, summary) = self.resolver.fetch_all(&candidates)?;
            record_fetches("hit", summary.loaded);
            record_fetches("absent", summary.absent);
            record_fetches("failed", summary.failed);

            let stats = compute_statistics_over_envelope(tiles.iter().map(|(_, grid)| grid), &bounds);
            debug!("envelope {:?} at zoom {}: {} samples from {} tiles", envelope, zoom, stats.count, tiles.len());
            if stats.is_empty() {
                return Err(ServiceError::NotFound(format!("no elevation data in {envelope:?} at zoom {zoom}")));
            }
            Ok(stats)
        })
    }

    /// Equal-width histogram of one tile; empty when the tile has no data.
    pub fn histogram(&self, zoom: u8, x: u32, y: u32, bins: Option<usize>) -> ServiceResult<Vec<HistogramBucket>> {
        let labels = RequestLabels::new("histogram").with_zoom(zoom);
        observe(&labels, || {
            let address = self.tile_address(zoom, x, y)?;
            let bins = bins.unwrap_or(self.config.default_bins);
            if bins < 1 {
                return Err(ServiceError::InvalidParameter(format!(
                    "number of bins should be at least 1, got {bins}"
                )));
            }
            match self.fetch_tile(&address)? {
                Some(grid) => Ok(compute_histogram(&grid, bins)?),
                None => Ok(Vec::new()),
            }
        })
    }

    /// The five standard quantiles of one tile; empty when the tile has no data.
    pub fn quantiles(&self, zoom: u8, x: u32, y: u32) -> ServiceResult<Vec<Quantile>> {
        let labels = RequestLabels::new("quantiles").with_zoom(zoom);
        observe(&labels, || {
            let address = self.tile_address(zoom, x, y)?;
            Ok(self
                .fetch_tile(&address)?
                .map(|grid| compute_quantiles(&grid))
                .unwrap_or_default())
        })
    }

    /// Resolve a colormap name for a render kind.
    ///
    /// Unknown names fall back to the kind's fallback ramp rather than
    /// failing the request.
    pub fn resolve_colormap(&self, kind: RenderKind, colormap: Option<&str>) -> ServiceResult<ColorRamp> {
        if let Some(name) = colormap.map(str::trim).filter(|n| !n.is_empty()) {
            if Palette::from_name(name).is_none() && self.ramps.get(name).is_none() {
                metrics::counter!(metric_defs::COLORMAP_FALLBACKS.name, "operation" => kind.name()).increment(1);
            }
        }
        Ok(self.ramps.resolve(colormap, kind.default_ramp(), kind.fallback_ramp())?)
    }

    /// Render one tile as PNG bytes, or [`EMPTY_TILE`] when it has no data.
    pub fn render(&self, kind: RenderKind, zoom: u8, x: u32, y: u32, colormap: Option<&str>) -> ServiceResult<Vec<u8>> {
        let labels = RequestLabels::new(format!("render.{kind}")).with_zoom(zoom);
        observe(&labels, || {
            let address = self.tile_address(zoom, x, y)?;
            let ramp = self.resolve_colormap(kind, colormap)?;
            let started = Instant::now();

            let grid = match kind.derivative() {
                None => self.fetch_tile(&address)?,
                Some(derivative) => {
                    let buffer = if kind.is_buffered() {
                        self.config.hillshade_buffer_px
                    } else {
                        0
                    };
                    let params = self.config.derivative_params(buffer);
                    derive_tile(&self.resolver, &address, derivative, &params)?
                }
            };

            let Some(grid) = grid.filter(|g| !g.is_empty()) else {
                debug!("{} at {}: no tile, returning placeholder", kind, address);
                metrics::counter!(metric_defs::PLACEHOLDER_RENDERS.name, &labels.to_labels()).increment(1);
                return Ok(EMPTY_TILE.to_vec());
            };

            let bytes = png::render(&grid, &ramp)?;
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
            metrics::histogram!(metric_defs::RENDER_DURATION.name, &labels.operation_only()).record(elapsed_ms);
            metrics::histogram!(metric_defs::PNG_SIZE.name, &labels.operation_only()).record(bytes.len() as f64);
            trace!("{} at {}: {} bytes in {:.1} ms", kind, address, bytes.len(), elapsed_ms);
            Ok(bytes)
        })
    }

    fn fetch_tile(&self, address: &TileAddress) -> ServiceResult<Option<Grid>> {
        match self.resolver.fetch(address) {
            Ok(Some(grid)) => {
                record_fetches("hit", 1);
                Ok(Some(grid))
            }
            Ok(None) => {
                record_fetches("absent", 1);
                Ok(None)
            }
            Err(err) => {
                record_fetches("failed", 1);
                Err(err.into())
            }
        }
    }
}

fn record_fetches(outcome: &'static str, count: usize) {
    if count > 0 {
        metrics::counter!(metric_defs::TILE_FETCHES.name, "outcome" => outcome).increment(count as u64);
    }
}

/// Run one request, counting it and its failure class.
fn observe<T>(labels: &RequestLabels, op: impl FnOnce() -> ServiceResult<T>) -> ServiceResult<T> {
    let labels_vec = labels.to_labels();
    metrics::counter!(metric_defs::REQUESTS.name, &labels_vec).increment(1);
    let result = op();
    if let Err(err) = &result {
        let metric = match err {
            ServiceError::InvalidParameter(_) => metric_defs::INVALID_REQUESTS,
            ServiceError::NotFound(_) => metric_defs::NOT_FOUND,
            ServiceError::Internal(_) => metric_defs::FAILED_REQUESTS,
        };
        metrics::counter!(metric.name, &labels_vec).increment(1);
        debug!("{} failed: {}", labels.operation, err);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use elevtile_raster::MemoryTileStore;

    fn service() -> ElevationService<MemoryTileStore> {
        ElevationService::new(
            MemoryTileStore::new(),
            RampRegistry::shared().unwrap(),
            ServerConfig::default(),
        )
    }

    #[test]
    fn test_render_kind_ramps() {
        assert_eq!(RenderKind::Elevation.default_ramp(), "arctic");
        assert_eq!(RenderKind::Elevation.fallback_ramp(), "mby");
        assert_eq!(RenderKind::Slope.fallback_ramp(), "gray_dk");
        assert_eq!(RenderKind::Hillshade.default_ramp(), "00_bw_linear");
        assert!(RenderKind::Hillshade.is_buffered());
        assert!(!RenderKind::HillshadeTile.is_buffered());
        assert_eq!(RenderKind::HillshadeTile.derivative(), Some(Derivative::Hillshade));
    }

    #[test]
    fn test_address_bounds_policy() {
        let loose = service();
        assert!(loose.tile_address(3, 100, 100).is_ok());
        assert!(matches!(loose.tile_address(3, 32768, 0), Err(ServiceError::InvalidParameter(_))));
        assert!(matches!(loose.tile_address(16, 0, 0), Err(ServiceError::InvalidParameter(_))));

        let strict = ElevationService::new(
            MemoryTileStore::new(),
            RampRegistry::shared().unwrap(),
            ServerConfig {
                strict_tile_bounds: true,
                ..ServerConfig::default()
            },
        );
        assert!(strict.tile_address(3, 7, 7).is_ok());
        assert!(matches!(strict.tile_address(3, 8, 0), Err(ServiceError::InvalidParameter(_))));
    }

    #[test]
    fn test_error_mapping() {
        let err: ServiceError = AnalyticsError::InvalidParameter("bins".into()).into();
        assert!(matches!(err, ServiceError::InvalidParameter(_)));

        let err: ServiceError = RasterError::StoreUnavailable {
            z: 1,
            x: 0,
            y: 0,
            reason: "down".into(),
        }
        .into();
        assert!(matches!(err, ServiceError::Internal(_)));
    }

    #[test]
    fn test_colormap_resolution() {
        let svc = service();
        let arctic = ColorRamp::Continuous(svc.ramps().get(ARCTIC).unwrap());
        let mby = ColorRamp::Continuous(svc.ramps().get(MBY).unwrap());
        let gray_dk = ColorRamp::Continuous(svc.ramps().get(GRAY_DK).unwrap());

        assert_eq!(svc.resolve_colormap(RenderKind::Elevation, None).unwrap(), arctic);
        assert_eq!(svc.resolve_colormap(RenderKind::Elevation, Some("bogus")).unwrap(), mby);
        assert_eq!(svc.resolve_colormap(RenderKind::Tri, Some("bogus")).unwrap(), gray_dk);
        assert_eq!(
            svc.resolve_colormap(RenderKind::Slope, Some("pseudocolor")).unwrap(),
            ColorRamp::Discrete(Palette::Pseudocolor)
        );
    }
}
