//! Terrain derivatives over 3x3 neighbourhoods.
//!
//! Gradients use Horn's weighted kernel over the window
//!
//! ```text
//! a b c
//! d e f
//! g h i
//! ```
//!
//! with rows running north to south. Pixels on the grid edge replicate the
//! nearest sample for the missing neighbours. Any nodata sample in the window
//! makes the output pixel nodata (NaN).

use crate::mosaic::EnvelopeResolver;
use crate::{AnalyticsError, Result};
use elevtile_raster::{Grid, TileAddress, TileStore};
use rayon::prelude::*;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, trace};

/// Default sun azimuth for hillshading, degrees clockwise from north.
pub const DEFAULT_SUN_AZIMUTH_DEG: f64 = 315.0;
/// Default sun altitude for hillshading, degrees above the horizon.
pub const DEFAULT_SUN_ALTITUDE_DEG: f64 = 45.0;
/// Halo used by the buffered hillshade, in pixels.
pub const DEFAULT_HILLSHADE_BUFFER_PX: usize = 100;
/// Aspect reported for cells with no gradient.
pub const FLAT_ASPECT: f64 = -1.0;

/// A per-pixel terrain derivative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Derivative {
    /// Gradient magnitude.
    Slope,
    /// Compass bearing of the steepest descent.
    Aspect,
    /// Lambertian illumination, 0-255.
    Hillshade,
    /// Terrain ruggedness index.
    Tri,
    /// Topographic position index.
    Tpi,
}

impl Derivative {
    /// All derivatives.
    pub const ALL: [Derivative; 5] = [
        Derivative::Slope,
        Derivative::Aspect,
        Derivative::Hillshade,
        Derivative::Tri,
        Derivative::Tpi,
    ];

    /// Lowercase name.
    pub fn name(&self) -> &'static str {
        match self {
            Derivative::Slope => "slope",
            Derivative::Aspect => "aspect",
            Derivative::Hillshade => "hillshade",
            Derivative::Tri => "tri",
            Derivative::Tpi => "tpi",
        }
    }
}

impl fmt::Display for Derivative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Derivative {
    type Err = AnalyticsError;

    fn from_str(s: &str) -> Result<Self> {
        Derivative::ALL
            .into_iter()
            .find(|d| d.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| AnalyticsError::InvalidParameter(format!("unknown derivative '{s}'")))
    }
}

/// Units of the slope derivative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SlopeUnits {
    /// Rise over run, in the grid's own units.
    #[default]
    RiseOverRun,
    /// Angle from horizontal.
    Degrees,
    /// Rise over run times 100.
    Percent,
}

/// Parameters shared by every derivative.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DerivativeParams {
    /// Pixels of neighbouring tiles to pull in around a tile before
    /// computing; 0 computes from the tile alone.
    pub neighborhood_buffer: usize,
    /// Compass bearing of the light source, clockwise from north.
    pub sun_azimuth_deg: f64,
    /// Elevation of the light source above the horizon.
    pub sun_altitude_deg: f64,
    /// Vertical exaggeration applied to elevations.
    pub z_factor: f64,
    /// Units of slope output.
    pub slope_units: SlopeUnits,
}

impl Default for DerivativeParams {
    fn default() -> Self {
        Self {
            neighborhood_buffer: 0,
            sun_azimuth_deg: DEFAULT_SUN_AZIMUTH_DEG,
            sun_altitude_deg: DEFAULT_SUN_ALTITUDE_DEG,
            z_factor: 1.0,
            slope_units: SlopeUnits::default(),
        }
    }
}

impl DerivativeParams {
    /// Same parameters with a different neighbourhood buffer.
    pub fn with_buffer(self, neighborhood_buffer: usize) -> Self {
        Self {
            neighborhood_buffer,
            ..self
        }
    }

    fn validate(&self) -> Result<()> {
        if !self.z_factor.is_finite() || self.z_factor == 0.0 {
            return Err(AnalyticsError::InvalidParameter(format!(
                "z factor should be finite and non-zero, got {}",
                self.z_factor
            )));
        }
        if !(0.0..=90.0).contains(&self.sun_altitude_deg) {
            return Err(AnalyticsError::InvalidParameter(format!(
                "sun altitude should be between 0 and 90 degrees, got {}",
                self.sun_altitude_deg
            )));
        }
        if !self.sun_azimuth_deg.is_finite() {
            return Err(AnalyticsError::InvalidParameter("sun azimuth should be finite".into()));
        }
        Ok(())
    }
}

/// Horn gradient at one pixel, `(dz/dx, dz/dy)` with y increasing southward.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Gradient {
    dzdx: f64,
    dzdy: f64,
}

impl Gradient {
    fn magnitude(&self) -> f64 {
        self.dzdx.hypot(self.dzdy)
    }

    fn is_flat(&self) -> bool {
        self.dzdx == 0.0 && self.dzdy == 0.0
    }

    /// Bearing of steepest descent in degrees, `[0, 360)`.
    fn aspect_deg(&self) -> f64 {
        if self.is_flat() {
            return FLAT_ASPECT;
        }
        let deg = (-self.dzdx).atan2(self.dzdy).to_degrees();
        let deg = if deg < 0.0 { deg + 360.0 } else { deg };
        if deg >= 360.0 {
            0.0
        } else {
            deg
        }
    }
}

/// The 3x3 window around a pixel, edges replicated.
struct Window([f64; 9]);

impl Window {
    fn at(grid: &Grid, col: usize, row: usize) -> Option<Self> {
        let last_col = grid.width() - 1;
        let last_row = grid.height() - 1;
        let mut w = [0.0; 9];
        for (i, dr) in [-1i64, 0, 1].into_iter().enumerate() {
            let r = (row as i64 + dr).clamp(0, last_row as i64) as usize;
            for (j, dc) in [-1i64, 0, 1].into_iter().enumerate() {
                let c = (col as i64 + dc).clamp(0, last_col as i64) as usize;
                w[i * 3 + j] = grid.get(c, r)?;
            }
        }
        Some(Window(w))
    }

    fn center(&self) -> f64 {
        self.0[4]
    }

    fn neighbors(&self) -> impl Iterator<Item = f64> + '_ {
        self.0.iter().enumerate().filter(|(i, _)| *i != 4).map(|(_, v)| *v)
    }

    fn gradient(&self, px: f64, py: f64, z_factor: f64) -> Gradient {
        let [a, b, c, d, _, f, g, h, i] = self.0;
        Gradient {
            dzdx: ((c + 2.0 * f + i) - (a + 2.0 * d + g)) / (8.0 * px) * z_factor,
            dzdy: ((g + 2.0 * h + i) - (a + 2.0 * b + c)) / (8.0 * py) * z_factor,
        }
    }
}

/// Compute a derivative over a whole grid.
///
/// The result has the input's size and georeferencing and uses NaN as its
/// nodata value.
pub fn compute_derivative(grid: &Grid, derivative: Derivative, params: &DerivativeParams) -> Result<Grid> {
    params.validate()?;
    let width = grid.width();
    let mut data = vec![f64::NAN; grid.data().len()];
    if grid.is_empty() {
        return Ok(Grid::new(width, grid.height(), data, f64::NAN, *grid.transform())?);
    }

    let px = grid.transform().pixel_size_x.abs();
    let py = grid.transform().pixel_size_y.abs();
    if px == 0.0 || py == 0.0 {
        return Err(AnalyticsError::InvalidParameter("grid has a zero pixel size".into()));
    }

    let zenith = (90.0 - params.sun_altitude_deg).to_radians();
    let azimuth = params.sun_azimuth_deg.to_radians();
    let z = params.z_factor;

    data.par_chunks_mut(width).enumerate().for_each(|(row, out)| {
        for (col, value) in out.iter_mut().enumerate() {
            let Some(window) = Window::at(grid, col, row) else {
                continue;
            };
            *value = match derivative {
                Derivative::Slope => {
                    let rise = window.gradient(px, py, z).magnitude();
                    match params.slope_units {
                        SlopeUnits::RiseOverRun => rise,
                        SlopeUnits::Degrees => rise.atan().to_degrees(),
                        SlopeUnits::Percent => rise * 100.0,
                    }
                }
                Derivative::Aspect => window.gradient(px, py, z).aspect_deg(),
                Derivative::Hillshade => hillshade(window.gradient(px, py, z), zenith, azimuth),
                Derivative::Tri => {
                    let e = window.center();
                    window.neighbors().map(|v| (v - e).abs()).sum::<f64>() / 8.0 * z
                }
                Derivative::Tpi => {
                    let mean = window.neighbors().sum::<f64>() / 8.0;
                    (window.center() - mean) * z
                }
            };
        }
    });

    trace!("{} over {}x{}", derivative, width, grid.height());
    Ok(Grid::new(width, grid.height(), data, f64::NAN, *grid.transform())?)
}

fn hillshade(gradient: Gradient, zenith: f64, azimuth: f64) -> f64 {
    let shade = if gradient.is_flat() {
        zenith.cos()
    } else {
        let slope = gradient.magnitude().atan();
        let aspect = gradient.aspect_deg().to_radians();
        zenith.cos() * slope.cos() + zenith.sin() * slope.sin() * (azimuth - aspect).cos()
    };
    (255.0 * shade.max(0.0)).round()
}

/// Compute a derivative for one tile of a store.
///
/// With a zero `neighborhood_buffer` only the tile's own samples are used.
/// Otherwise the tile is first merged with the surrounding tiles, the
/// derivative is computed over that neighbourhood, and the result is cut
/// back to the tile footprint, which removes seams along tile edges.
/// Returns `None` when the store has no such tile.
pub fn derive_tile<S: TileStore>(
    resolver: &EnvelopeResolver<S>,
    address: &TileAddress,
    derivative: Derivative,
    params: &DerivativeParams,
) -> Result<Option<Grid>> {
    let Some(hood) = resolver.neighborhood(address, params.neighborhood_buffer)? else {
        debug!("no tile at {} for {}", address, derivative);
        return Ok(None);
    };
    let full = compute_derivative(&hood.grid, derivative, params)?;
    if hood.grid.width() == hood.width && hood.grid.height() == hood.height {
        return Ok(Some(full));
    }
    Ok(Some(hood.crop_to_tile(&full)?))
}
