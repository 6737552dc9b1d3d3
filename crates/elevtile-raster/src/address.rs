//! Tile pyramid addressing.
//!
//! Uses the OpenStreetMap Slippy Map tile naming convention over the Web
//! Mercator square:
//! - `zoom` is the pyramid level (0-15)
//! - `x` is the column (0 at 180°W, increasing eastward)
//! - `y` is the row (0 at ~85.05°N, increasing southward)
//!
//! Request validation only enforces the fixed ceiling of [`MAX_TILE_INDEX`]
//! on `x`/`y`, whatever the zoom. Addresses beyond `2^zoom - 1` are accepted
//! and simply have no backing tile; [`TileAddress::is_within_pyramid`] gives
//! the strict check to callers that want it.

use crate::envelope::{Bounds, ORIGIN_SHIFT_M};
use crate::{RasterError, Result};

/// Minimum valid zoom level.
pub const MIN_ZOOM: u8 = 0;

/// Maximum valid zoom level.
pub const MAX_ZOOM: u8 = 15;

/// Upper bound accepted for `x` and `y` at every zoom level.
pub const MAX_TILE_INDEX: u32 = 32_767;

/// Address of one tile in the pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileAddress {
    /// Zoom level (0-15).
    pub zoom: u8,
    /// Column.
    pub x: u32,
    /// Row.
    pub y: u32,
}

impl std::fmt::Display for TileAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

impl TileAddress {
    /// Create a validated tile address.
    pub fn new(zoom: u8, x: u32, y: u32) -> Result<Self> {
        if zoom > MAX_ZOOM {
            return Err(RasterError::InvalidParameter(format!(
                "zoom level {zoom} should be between {MIN_ZOOM} and {MAX_ZOOM}"
            )));
        }
        if x > MAX_TILE_INDEX {
            return Err(RasterError::InvalidParameter(format!(
                "x={x} should be between 0 and {MAX_TILE_INDEX}"
            )));
        }
        if y > MAX_TILE_INDEX {
            return Err(RasterError::InvalidParameter(format!(
                "y={y} should be between 0 and {MAX_TILE_INDEX}"
            )));
        }
        Ok(Self { zoom, x, y })
    }

    /// Create a tile address that additionally lies inside the pyramid for its zoom.
    pub fn new_strict(zoom: u8, x: u32, y: u32) -> Result<Self> {
        let address = Self::new(zoom, x, y)?;
        if !address.is_within_pyramid() {
            let max = tiles_per_side(zoom) - 1;
            return Err(RasterError::InvalidParameter(format!(
                "tile {address} is outside 0..={max} for zoom {zoom}"
            )));
        }
        Ok(address)
    }

    /// Check whether `x` and `y` are both below `2^zoom`.
    pub fn is_within_pyramid(&self) -> bool {
        let n = tiles_per_side(self.zoom);
        self.x < n && self.y < n
    }

    /// Web Mercator extent of this tile.
    pub fn bounds(&self) -> Bounds {
        let size = tile_span_m(self.zoom);
        let min_x = -ORIGIN_SHIFT_M + self.x as f64 * size;
        let max_y = ORIGIN_SHIFT_M - self.y as f64 * size;
        Bounds {
            min_x,
            min_y: max_y - size,
            max_x: min_x + size,
            max_y,
        }
    }

    /// The tiles within `radius` rings around this one, excluding itself.
    ///
    /// Neighbours that fall outside the pyramid are skipped; the world does
    /// not wrap across the antimeridian.
    pub fn neighbors(&self, radius: u32) -> Vec<TileAddress> {
        let n = tiles_per_side(self.zoom) as i64;
        let r = radius as i64;
        let mut out = Vec::with_capacity(((2 * r + 1) * (2 * r + 1) - 1).max(0) as usize);
        for dy in -r..=r {
            for dx in -r..=r {
                if dx == 0 && dy == 0 {
                    continue;
                }
                let x = self.x as i64 + dx;
                let y = self.y as i64 + dy;
                if x < 0 || y < 0 || x >= n || y >= n {
                    continue;
                }
                out.push(TileAddress {
                    zoom: self.zoom,
                    x: x as u32,
                    y: y as u32,
                });
            }
        }
        out
    }
}

/// Number of tiles along one side of the pyramid at `zoom`.
pub fn tiles_per_side(zoom: u8) -> u32 {
    1u32 << zoom
}

/// Width (and height) of one tile at `zoom`, in Mercator metres.
pub fn tile_span_m(zoom: u8) -> f64 {
    2.0 * ORIGIN_SHIFT_M / tiles_per_side(zoom) as f64
}

/// Inclusive block of tile columns and rows at one zoom level.
///
/// Iterating a range is lazy, so a block spanning the whole pyramid at the
/// deepest zoom costs nothing until it is walked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileRange {
    /// Zoom level of every address in the range.
    pub zoom: u8,
    /// First column.
    pub min_x: u32,
    /// Last column (inclusive).
    pub max_x: u32,
    /// First row.
    pub min_y: u32,
    /// Last row (inclusive).
    pub max_y: u32,
}

impl TileRange {
    /// Whether `address` lies in this block.
    pub fn contains(&self, address: &TileAddress) -> bool {
        address.zoom == self.zoom
            && (self.min_x..=self.max_x).contains(&address.x)
            && (self.min_y..=self.max_y).contains(&address.y)
    }

    /// Number of addresses in the block.
    pub fn tile_count(&self) -> u64 {
        (self.max_x - self.min_x + 1) as u64 * (self.max_y - self.min_y + 1) as u64
    }

    /// Addresses in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = TileAddress> {
        let range = *self;
        (range.min_y..=range.max_y)
            .flat_map(move |y| (range.min_x..=range.max_x).map(move |x| TileAddress { zoom: range.zoom, x, y }))
    }
}

/// The block of tiles at `zoom` whose extent overlaps `bounds`.
///
/// This is the index-level rejection step: only addresses whose extent can
/// intersect the rectangle are in the block. Returns `None` when the
/// rectangle is empty or misses the pyramid.
pub fn tiles_covering(zoom: u8, bounds: &Bounds) -> Option<TileRange> {
    let world = Bounds::new(-ORIGIN_SHIFT_M, -ORIGIN_SHIFT_M, ORIGIN_SHIFT_M, ORIGIN_SHIFT_M);
    if !world.intersects(bounds) {
        return None;
    }

    let last = tiles_per_side(zoom) as i64 - 1;
    let size = tile_span_m(zoom);
    // Open intervals: a tile that only touches the rectangle is left out
    let first_index = |offset: f64| ((offset / size).floor() as i64).clamp(0, last) as u32;
    let last_index = |offset: f64| ((offset / size).ceil() as i64 - 1).clamp(0, last) as u32;

    let min_x = first_index(bounds.min_x + ORIGIN_SHIFT_M);
    let max_x = last_index(bounds.max_x + ORIGIN_SHIFT_M);
    let min_y = first_index(ORIGIN_SHIFT_M - bounds.max_y);
    let max_y = last_index(ORIGIN_SHIFT_M - bounds.min_y);
    (min_x <= max_x && min_y <= max_y).then_some(TileRange {
        zoom,
        min_x,
        max_x,
        min_y,
        max_y,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Envelope;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_validation_uses_fixed_ceiling() {
        assert!(TileAddress::new(0, 0, 0).is_ok());
        // Loose: x beyond 2^z - 1 is still a valid request
        assert!(TileAddress::new(2, 100, 3).is_ok());
        assert!(TileAddress::new(15, 32_767, 32_767).is_ok());
        assert!(TileAddress::new(16, 0, 0).is_err());
        assert!(TileAddress::new(3, 32_768, 0).is_err());
        assert!(TileAddress::new(3, 0, 32_768).is_err());
    }

    #[test]
    fn test_strict_validation() {
        assert!(TileAddress::new_strict(2, 3, 3).is_ok());
        assert!(TileAddress::new_strict(2, 4, 0).is_err());
        assert!(!TileAddress::new(2, 100, 3).unwrap().is_within_pyramid());
    }

    #[test]
    fn test_bounds_zoom0_is_world() {
        let b = TileAddress::new(0, 0, 0).unwrap().bounds();
        assert_abs_diff_eq!(b.min_x, -ORIGIN_SHIFT_M, epsilon = 1e-6);
        assert_abs_diff_eq!(b.max_x, ORIGIN_SHIFT_M, epsilon = 1e-6);
        assert_abs_diff_eq!(b.min_y, -ORIGIN_SHIFT_M, epsilon = 1e-6);
        assert_abs_diff_eq!(b.max_y, ORIGIN_SHIFT_M, epsilon = 1e-6);
    }

    #[test]
    fn test_bounds_quadrants() {
        // Zoom 1: tile (1, 0) is the north-east quadrant
        let b = TileAddress::new(1, 1, 0).unwrap().bounds();
        assert_abs_diff_eq!(b.min_x, 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(b.min_y, 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(b.max_x, ORIGIN_SHIFT_M, epsilon = 1e-6);
        assert_abs_diff_eq!(b.max_y, ORIGIN_SHIFT_M, epsilon = 1e-6);
    }

    #[test]
    fn test_neighbors_clip_to_pyramid() {
        let corner = TileAddress::new(2, 0, 0).unwrap();
        let ring = corner.neighbors(1);
        assert_eq!(ring.len(), 3);
        assert!(ring.contains(&TileAddress { zoom: 2, x: 1, y: 1 }));

        let inner = TileAddress::new(3, 4, 4).unwrap();
        assert_eq!(inner.neighbors(1).len(), 8);
        assert_eq!(inner.neighbors(2).len(), 24);
        assert!(inner.neighbors(0).is_empty());
    }

    #[test]
    fn test_tiles_covering_envelope() {
        // Seattle area at zoom 12 falls in a handful of tiles
        let env = Envelope::new(-122.40, 47.58, -122.30, 47.64).unwrap();
        let range = tiles_covering(12, &env.to_mercator()).unwrap();
        assert!(range.tile_count() >= 1);
        for t in range.iter() {
            assert!(t.bounds().intersects(&env.to_mercator()));
        }

        // Whole world at zoom 1 covers all four tiles
        let world = Envelope::new(-180.0, -90.0, 180.0, 90.0).unwrap();
        assert_eq!(tiles_covering(1, &world.to_mercator()).unwrap().iter().count(), 4);
    }

    #[test]
    fn test_tiles_covering_excludes_touching_tiles() {
        let tile = TileAddress::new(5, 10, 12).unwrap();
        let inset = tile.bounds().expand(-1.0, -1.0);
        let range = tiles_covering(5, &inset).unwrap();
        assert_eq!(range.tile_count(), 1);
        assert!(range.contains(&tile));
    }

    #[test]
    fn test_tiles_covering_whole_world_at_max_zoom_is_lazy() {
        let world = Envelope::new(-180.0, -85.0, 180.0, 85.0).unwrap();
        let range = tiles_covering(MAX_ZOOM, &world.to_mercator()).unwrap();
        assert_eq!((range.min_x, range.max_x), (0, 32_767));
        assert!(range.tile_count() > 1 << 29);
        assert_eq!(range.iter().take(3).last(), Some(TileAddress { zoom: 15, x: 2, y: range.min_y }));
        assert!(!range.contains(&TileAddress { zoom: 14, x: 0, y: range.min_y }));
    }

    #[test]
    fn test_tiles_covering_outside_world() {
        let far = Bounds::new(5.0e7, 5.0e7, 6.0e7, 6.0e7);
        assert!(tiles_covering(4, &far).is_none());
    }
}
