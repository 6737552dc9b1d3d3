//! Error types for the analytics crate.

use elevtile_raster::RasterError;
use thiserror::Error;

/// Errors that can occur while computing statistics or rendering tiles.
#[derive(Debug, Error)]
pub enum AnalyticsError {
    /// A caller-supplied parameter is outside its declared range.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// A color ramp definition could not be parsed.
    #[error("Invalid color ramp at line {line}: {reason}")]
    RampParse {
        /// 1-based line number in the ramp text (0 when the whole ramp is wrong).
        line: usize,
        /// What was wrong with it.
        reason: String,
    },

    /// No ramp is registered under the requested name.
    #[error("Unknown color ramp: {0}")]
    UnknownRamp(String),

    /// The tiles to merge are too scattered for one dense grid.
    #[error("Mosaic would need {cells} cells to hold {pixels} tile pixels")]
    MosaicTooSparse {
        /// Cells in the destination grid.
        cells: u64,
        /// Pixels held by the source tiles.
        pixels: u64,
    },

    /// Reading ramp definitions from disk failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// PNG encoding failed.
    #[error("PNG encoding failed: {0}")]
    PngEncode(#[from] image::ImageError),

    /// Error from the raster layer (grid construction or tile store access).
    #[error(transparent)]
    Raster(#[from] RasterError),
}
