//! # elevtile-raster
//!
//! Elevation grids and the tile pyramid they are served from.
//!
//! This crate provides the data side of the elevation tile engine:
//! - [`Grid`]: a single-band raster with an affine transform and nodata sentinel
//! - [`TileAddress`]: `(zoom, x, y)` addressing in the Web Mercator pyramid
//! - [`Envelope`]: WGS84 bounding boxes and their projection to [`Bounds`]
//! - [`TileStore`]: the contract for resolving addresses to grids, with an
//!   in-memory store and a GeoTIFF directory store
//!
//! ## Example
//!
//! ```
//! use elevtile_raster::{Grid, MemoryTileStore, TileAddress, TileStore};
//!
//! let store = MemoryTileStore::new();
//! let address = TileAddress::new(2, 1, 1)?;
//! let grid = Grid::for_tile(&address, 2, 2, vec![1.0, 3.0, 5.0, 7.0], -9999.0)?;
//! store.insert(address, grid)?;
//!
//! let tile = store.fetch(&address)?.expect("tile was inserted");
//! assert_eq!(tile.valid_values().count(), 4);
//! # Ok::<(), elevtile_raster::RasterError>(())
//! ```

mod address;
mod envelope;
mod error;
mod geotiff;
mod grid;
mod store;

pub use address::{
    tile_span_m, tiles_covering, tiles_per_side, TileAddress, TileRange, MAX_TILE_INDEX, MAX_ZOOM, MIN_ZOOM,
};
pub use envelope::{
    lon_lat_to_mercator, mercator_to_lon_lat, Bounds, Envelope, EARTH_RADIUS_M, MAX_MERCATOR_LAT, ORIGIN_SHIFT_M,
};
pub use error::RasterError;
pub use geotiff::GeoTiffTileStore;
pub use grid::{GeoTransform, Grid};
pub use store::{MemoryTileStore, TileStore, MAX_SCANNED_TILES};

/// Result type for raster operations.
pub type Result<T> = std::result::Result<T, RasterError>;
