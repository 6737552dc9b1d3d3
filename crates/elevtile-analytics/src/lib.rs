//! # elevtile-analytics
//!
//! Numeric summaries and rendered terrain derivatives for elevation tiles.
//!
//! - [`compute_statistics`], [`compute_histogram`] and [`compute_quantiles`]
//!   summarise the valid samples of a [`Grid`](elevtile_raster::Grid)
//! - [`EnvelopeResolver`] mosaics the tiles under a WGS84 envelope into one grid
//! - [`compute_derivative`] and [`derive_tile`] produce slope, aspect,
//!   hillshade, TRI and TPI grids
//! - [`apply_colormap`] and [`png::encode`] turn a grid into PNG bytes
//!
//! ## Example
//!
//! ```
//! use elevtile_analytics::{compute_histogram, compute_statistics, png, ColorRamp, Palette};
//! use elevtile_raster::{Grid, TileAddress};
//!
//! let address = TileAddress::new(2, 1, 1)?;
//! let grid = Grid::for_tile(&address, 2, 2, vec![1.0, 3.0, 5.0, 7.0], -9999.0)?;
//!
//! let stats = compute_statistics(&grid);
//! assert_eq!(stats.mean, 4.0);
//! assert_eq!(compute_histogram(&grid, 2)?.len(), 2);
//!
//! let bytes = png::render(&grid, &ColorRamp::Discrete(Palette::Fire))?;
//! assert_eq!(bytes[..8], png::PNG_SIGNATURE);
//! # Ok::<(), elevtile_analytics::AnalyticsError>(())
//! ```

mod colormap;
mod error;
mod histogram;
mod mosaic;
pub mod png;
mod ramps;
mod statistics;
mod terrain;

pub use colormap::{
    apply_colormap, ColorRamp, ColorStop, ColorStops, Palette, PixelFormat, PixelGrid, Rgba, StopValue, RAMP_STOP_COUNT,
    TRANSPARENT,
};
pub use error::AnalyticsError;
pub use histogram::{
    compute_histogram, compute_quantiles, compute_quantiles_at, HistogramBucket, Quantile, DEFAULT_BINS,
    STANDARD_QUANTILES,
};
pub use mosaic::{mosaic, EnvelopeResolver, FetchSummary, Neighborhood, MAX_MOSAIC_FILL};
pub use png::EMPTY_TILE;
pub use ramps::{RampRegistry, ARCTIC, BW_LINEAR, GRAY_DK, MBY, RAMP_EXTENSION};
pub use statistics::{
    compute_statistics, compute_statistics_over, compute_statistics_over_envelope, Statistics, StatisticsAccumulator,
};
pub use terrain::{
    compute_derivative, derive_tile, Derivative, DerivativeParams, SlopeUnits, DEFAULT_HILLSHADE_BUFFER_PX,
    DEFAULT_SUN_ALTITUDE_DEG, DEFAULT_SUN_AZIMUTH_DEG, FLAT_ASPECT,
};

/// Result type for analytics operations.
pub type Result<T> = std::result::Result<T, AnalyticsError>;
