//! Error types for the raster crate.

use thiserror::Error;

/// Errors that can occur when addressing, building or loading elevation grids.
#[derive(Debug, Error)]
pub enum RasterError {
    /// A caller-supplied parameter is outside its declared range.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// I/O error reading a tile file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TIFF decoding error.
    #[error("TIFF decode error: {0}")]
    TiffDecode(#[from] tiff::TiffError),

    /// Invalid GeoTIFF - unusable tags or layout.
    #[error("Invalid GeoTIFF: {0}")]
    InvalidGeoTiff(String),

    /// Sample buffer does not match the declared grid dimensions.
    #[error("Grid shape mismatch: {width}x{height} needs {expected} samples, got {actual}")]
    GridShape {
        /// Grid width in pixels.
        width: usize,
        /// Grid height in pixels.
        height: usize,
        /// Required number of samples.
        expected: usize,
        /// Number of samples supplied.
        actual: usize,
    },

    /// The tile store could not be reached.
    #[error("Tile store unavailable for z={z} x={x} y={y}: {reason}")]
    StoreUnavailable {
        /// Zoom level.
        z: u8,
        /// X tile coordinate.
        x: u32,
        /// Y tile coordinate.
        y: u32,
        /// Reason for failure.
        reason: String,
    },

    /// Cache lock was poisoned (a thread panicked while holding the lock).
    #[error("Tile cache lock was poisoned")]
    CacheLockPoisoned,
}
