//! Elevation grid: a dense single-band raster with an affine transform and a
//! nodata sentinel.

use crate::address::TileAddress;
use crate::envelope::Bounds;
use crate::{RasterError, Result};

/// Relative tolerance when comparing pixel sizes of grids being merged.
const PIXEL_SIZE_TOLERANCE: f64 = 1e-6;

/// Affine pixel-to-map transform without rotation terms.
///
/// Pixel `(col, row)` has its top-left corner at
/// `(origin_x + col * pixel_size_x, origin_y + row * pixel_size_y)`.
/// North-up grids have a negative `pixel_size_y`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    /// Map x of the top-left corner of pixel (0, 0).
    pub origin_x: f64,
    /// Map y of the top-left corner of pixel (0, 0).
    pub origin_y: f64,
    /// Pixel width in map units.
    pub pixel_size_x: f64,
    /// Pixel height in map units (negative for north-up).
    pub pixel_size_y: f64,
}

impl GeoTransform {
    /// Create a transform.
    pub fn new(origin_x: f64, origin_y: f64, pixel_size_x: f64, pixel_size_y: f64) -> Self {
        Self {
            origin_x,
            origin_y,
            pixel_size_x,
            pixel_size_y,
        }
    }

    /// North-up transform covering a tile's Mercator extent with `width` x `height` pixels.
    pub fn for_tile(address: &TileAddress, width: usize, height: usize) -> Self {
        let b = address.bounds();
        Self {
            origin_x: b.min_x,
            origin_y: b.max_y,
            pixel_size_x: b.width() / width as f64,
            pixel_size_y: -b.height() / height as f64,
        }
    }

    /// Map coordinate of a pixel's centre.
    pub fn pixel_center(&self, col: usize, row: usize) -> (f64, f64) {
        (
            self.origin_x + (col as f64 + 0.5) * self.pixel_size_x,
            self.origin_y + (row as f64 + 0.5) * self.pixel_size_y,
        )
    }

    /// Transform shifted so that pixel `(col, row)` becomes the new origin.
    ///
    /// Negative offsets move the origin outward, which is how halos are added.
    pub fn offset(&self, col: i64, row: i64) -> Self {
        Self {
            origin_x: self.origin_x + col as f64 * self.pixel_size_x,
            origin_y: self.origin_y + row as f64 * self.pixel_size_y,
            ..*self
        }
    }

    /// Whether two transforms share the same pixel size.
    pub fn same_resolution(&self, other: &GeoTransform) -> bool {
        let close = |a: f64, b: f64| (a - b).abs() <= PIXEL_SIZE_TOLERANCE * a.abs().max(b.abs());
        close(self.pixel_size_x, other.pixel_size_x) && close(self.pixel_size_y, other.pixel_size_y)
    }
}

/// A single-band elevation raster.
///
/// Samples are stored row-major (north to south, west to east). A sample is
/// treated as missing when it equals the nodata sentinel or is NaN; missing
/// samples are excluded from every statistic and propagate through every
/// derivative.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    width: usize,
    height: usize,
    data: Vec<f64>,
    nodata: f64,
    transform: GeoTransform,
}

impl Grid {
    /// Create a grid from row-major samples.
    pub fn new(
        width: usize,
        height: usize,
        data: Vec<f64>,
        nodata: f64,
        transform: GeoTransform,
    ) -> Result<Self> {
        let expected = width * height;
        if data.len() != expected {
            return Err(RasterError::GridShape {
                width,
                height,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
            nodata,
            transform,
        })
    }

    /// Create a grid where every sample has the same value.
    pub fn filled(width: usize, height: usize, value: f64, nodata: f64, transform: GeoTransform) -> Self {
        Self {
            width,
            height,
            data: vec![value; width * height],
            nodata,
            transform,
        }
    }

    /// Create a grid georeferenced to a tile's Mercator extent.
    pub fn for_tile(
        address: &TileAddress,
        width: usize,
        height: usize,
        data: Vec<f64>,
        nodata: f64,
    ) -> Result<Self> {
        Self::new(width, height, data, nodata, GeoTransform::for_tile(address, width, height))
    }

    /// Width in pixels.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> usize {
        self.height
    }

    /// The nodata sentinel.
    pub fn nodata(&self) -> f64 {
        self.nodata
    }

    /// The pixel-to-map transform.
    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    /// Raw row-major samples, nodata included.
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Whether the grid has no pixels at all.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether `value` counts as missing in this grid.
    #[inline]
    pub fn is_nodata(&self, value: f64) -> bool {
        value.is_nan() || value == self.nodata
    }

    /// Raw sample at a pixel (nodata included).
    ///
    /// # Panics
    /// Panics if the pixel is outside the grid.
    #[inline]
    pub fn raw(&self, col: usize, row: usize) -> f64 {
        self.data[row * self.width + col]
    }

    /// Valid sample at a pixel, or `None` when it is nodata or out of range.
    pub fn get(&self, col: usize, row: usize) -> Option<f64> {
        if col >= self.width || row >= self.height {
            return None;
        }
        let v = self.raw(col, row);
        (!self.is_nodata(v)).then_some(v)
    }

    /// Overwrite a sample.
    ///
    /// # Panics
    /// Panics if the pixel is outside the grid.
    pub fn set(&mut self, col: usize, row: usize, value: f64) {
        let idx = row * self.width + col;
        self.data[idx] = value;
    }

    /// Iterate over all valid (non-nodata) samples.
    pub fn valid_values(&self) -> impl Iterator<Item = f64> + '_ {
        self.data.iter().copied().filter(move |v| !self.is_nodata(*v))
    }

    /// Whether any sample is nodata.
    pub fn has_nodata(&self) -> bool {
        self.data.iter().any(|v| self.is_nodata(*v))
    }

    /// Map extent covered by the grid.
    pub fn bounds(&self) -> Bounds {
        let t = &self.transform;
        Bounds::new(
            t.origin_x,
            t.origin_y,
            t.origin_x + self.width as f64 * t.pixel_size_x,
            t.origin_y + self.height as f64 * t.pixel_size_y,
        )
    }

    /// Iterate over valid samples whose pixel centre lies inside `bounds`.
    ///
    /// Partially covered boundary pixels are included only when their centre
    /// is inside the rectangle.
    pub fn values_within<'a>(&'a self, bounds: &'a Bounds) -> impl Iterator<Item = f64> + 'a {
        (0..self.height).flat_map(move |row| {
            (0..self.width).filter_map(move |col| {
                let (x, y) = self.transform.pixel_center(col, row);
                if bounds.contains(x, y) {
                    self.get(col, row)
                } else {
                    None
                }
            })
        })
    }

    /// Copy out a rectangular window of pixels.
    pub fn crop(&self, col: usize, row: usize, width: usize, height: usize) -> Result<Grid> {
        if col + width > self.width || row + height > self.height {
            return Err(RasterError::InvalidParameter(format!(
                "window {width}x{height}+{col}+{row} exceeds grid {}x{}",
                self.width, self.height
            )));
        }
        let mut data = Vec::with_capacity(width * height);
        for r in row..row + height {
            let start = r * self.width + col;
            data.extend_from_slice(&self.data[start..start + width]);
        }
        Ok(Grid {
            width,
            height,
            data,
            nodata: self.nodata,
            transform: self.transform.offset(col as i64, row as i64),
        })
    }

    /// Pixel offset of `other`'s origin within this grid's pixel lattice.
    ///
    /// Both grids must share a resolution; the offset is rounded to the
    /// nearest whole pixel.
    pub fn pixel_offset_of(&self, other: &GeoTransform) -> Result<(i64, i64)> {
        if !self.transform.same_resolution(other) {
            return Err(RasterError::InvalidParameter(format!(
                "pixel size mismatch: ({}, {}) vs ({}, {})",
                self.transform.pixel_size_x,
                self.transform.pixel_size_y,
                other.pixel_size_x,
                other.pixel_size_y
            )));
        }
        let dc = (other.origin_x - self.transform.origin_x) / self.transform.pixel_size_x;
        let dr = (other.origin_y - self.transform.origin_y) / self.transform.pixel_size_y;
        Ok((dc.round() as i64, dr.round() as i64))
    }

    /// Copy the valid samples of `src` into this grid where they overlap.
    ///
    /// Nodata samples in `src` never overwrite existing data, so tiles can be
    /// pasted in any order. Returns the number of samples written.
    pub fn paste(&mut self, src: &Grid) -> Result<usize> {
        let (dc, dr) = self.pixel_offset_of(&src.transform)?;
        let mut written = 0;
        for row in 0..src.height {
            let dst_row = dr + row as i64;
            if dst_row < 0 || dst_row >= self.height as i64 {
                continue;
            }
            for col in 0..src.width {
                let dst_col = dc + col as i64;
                if dst_col < 0 || dst_col >= self.width as i64 {
                    continue;
                }
                if let Some(v) = src.get(col, row) {
                    self.set(dst_col as usize, dst_row as usize, v);
                    written += 1;
                }
            }
        }
        Ok(written)
    }
}
