//! Geographic envelopes and their Web Mercator (EPSG:3857) projection.
//!
//! Envelopes arrive in WGS84 degrees. Every intersection test against tile
//! geometry happens in projected metres, so an envelope is reprojected once
//! with [`Envelope::to_mercator`] and the resulting [`Bounds`] is what the
//! rest of the pipeline works with.

use crate::{RasterError, Result};
use std::f64::consts::PI;

/// WGS84 semi-major axis used by the spherical Mercator projection, in metres.
pub const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// Half the projected world width: the Mercator x (and y) of the antimeridian.
pub const ORIGIN_SHIFT_M: f64 = PI * EARTH_RADIUS_M;

/// Latitude at which the square Mercator world ends (`atan(sinh(π))`).
pub const MAX_MERCATOR_LAT: f64 = 85.051_128_779_806_59;

/// Axis-aligned rectangle in projected metres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    /// West edge.
    pub min_x: f64,
    /// South edge.
    pub min_y: f64,
    /// East edge.
    pub max_x: f64,
    /// North edge.
    pub max_y: f64,
}

impl Bounds {
    /// Create bounds from two corners given in any order.
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self {
            min_x: x0.min(x1),
            min_y: y0.min(y1),
            max_x: x0.max(x1),
            max_y: y0.max(y1),
        }
    }

    /// Check whether a point lies inside the bounds (edges inclusive).
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    /// Check whether two rectangles overlap with a non-empty interior.
    pub fn intersects(&self, other: &Bounds) -> bool {
        self.min_x < other.max_x
            && other.min_x < self.max_x
            && self.min_y < other.max_y
            && other.min_y < self.max_y
    }

    /// Grow the rectangle by `dx` horizontally and `dy` vertically on every side.
    pub fn expand(&self, dx: f64, dy: f64) -> Self {
        Self {
            min_x: self.min_x - dx,
            min_y: self.min_y - dy,
            max_x: self.max_x + dx,
            max_y: self.max_y + dy,
        }
    }

    /// Smallest rectangle containing both rectangles.
    pub fn union(&self, other: &Bounds) -> Self {
        Self {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    /// Width in metres.
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    /// Height in metres.
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }
}

/// A bounding box in WGS84 degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    /// Minimum longitude.
    pub x_min: f64,
    /// Minimum latitude.
    pub y_min: f64,
    /// Maximum longitude.
    pub x_max: f64,
    /// Maximum latitude.
    pub y_max: f64,
}

impl Envelope {
    /// Create a validated envelope.
    ///
    /// Longitudes must lie in `[-180, 180]` and latitudes in `[-90, 90]`.
    /// Corners given in inverted order are normalised rather than rejected.
    pub fn new(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Result<Self> {
        for (name, lon) in [("xMin", x_min), ("xMax", x_max)] {
            if !(-180.0..=180.0).contains(&lon) {
                return Err(RasterError::InvalidParameter(format!(
                    "{name}={lon} must be a longitude between -180 and 180 degrees"
                )));
            }
        }
        for (name, lat) in [("yMin", y_min), ("yMax", y_max)] {
            if !(-90.0..=90.0).contains(&lat) {
                return Err(RasterError::InvalidParameter(format!(
                    "{name}={lat} must be a latitude between -90 and 90 degrees"
                )));
            }
        }

        Ok(Self {
            x_min: x_min.min(x_max),
            y_min: y_min.min(y_max),
            x_max: x_min.max(x_max),
            y_max: y_min.max(y_max),
        })
    }

    /// Reproject the envelope into Web Mercator metres.
    pub fn to_mercator(&self) -> Bounds {
        let (min_x, min_y) = lon_lat_to_mercator(self.x_min, self.y_min);
        let (max_x, max_y) = lon_lat_to_mercator(self.x_max, self.y_max);
        Bounds::new(min_x, min_y, max_x, max_y)
    }
}

/// Project a WGS84 coordinate into Web Mercator metres.
///
/// Latitude is clamped to the Mercator square, so the poles map onto the
/// top and bottom edges of the tile pyramid.
pub fn lon_lat_to_mercator(lon: f64, lat: f64) -> (f64, f64) {
    let lat = lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT);
    let x = lon.to_radians() * EARTH_RADIUS_M;
    let y = (PI / 4.0 + lat.to_radians() / 2.0).tan().ln() * EARTH_RADIUS_M;
    (x, y)
}

/// Inverse of [`lon_lat_to_mercator`].
pub fn mercator_to_lon_lat(x: f64, y: f64) -> (f64, f64) {
    let lon = (x / EARTH_RADIUS_M).to_degrees();
    let lat = (2.0 * (y / EARTH_RADIUS_M).exp().atan() - PI / 2.0).to_degrees();
    (lon, lat)
}
