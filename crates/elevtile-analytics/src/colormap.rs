//! Colour ramps and their application to grids.
//!
//! A [`ColorRamp`] is either one of the four fixed palettes or a continuous
//! gradient of colour stops. Stop values are absolute elevations or
//! percentages of the grid's valid value range; percentages are resolved
//! per grid when the ramp is applied.

use crate::{AnalyticsError, Result};
use elevtile_raster::Grid;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Number of rows in a ramp definition file.
pub const RAMP_STOP_COUNT: usize = 5;

/// RGBA colour.
pub type Rgba = [u8; 4];

/// Colour of nodata pixels.
pub const TRANSPARENT: Rgba = [0, 0, 0, 0];

/// Position of a colour stop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StopValue {
    /// Value in the grid's own units.
    Absolute(f64),
    /// Percentage of the valid value range, 0 at the minimum and 100 at the maximum.
    Percent(f64),
}

impl StopValue {
    fn resolve(&self, min: f64, max: f64) -> f64 {
        match *self {
            StopValue::Absolute(v) => v,
            StopValue::Percent(p) => min + (max - min) * p / 100.0,
        }
    }
}

/// A colour pinned at a value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorStop {
    /// Where the stop sits on the value axis.
    pub value: StopValue,
    /// Colour at the stop.
    pub color: Rgba,
}

impl ColorStop {
    const fn percent(p: f64, r: u8, g: u8, b: u8) -> Self {
        Self {
            value: StopValue::Percent(p),
            color: [r, g, b, 255],
        }
    }
}

/// An ordered piecewise-linear gradient.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorStops {
    stops: Vec<ColorStop>,
}

impl ColorStops {
    /// Build a gradient from at least one stop.
    pub fn new(stops: Vec<ColorStop>) -> Result<Self> {
        if stops.is_empty() {
            return Err(AnalyticsError::InvalidParameter("a colour ramp needs at least one stop".into()));
        }
        Ok(Self { stops })
    }

    /// Parse a ramp definition.
    ///
    /// Each non-blank line is `value r g b a`, fields separated by
    /// whitespace, commas or colons. A value ending in `%` is a percentage of
    /// the value range. `#` starts a comment. Exactly five stops are
    /// required.
    pub fn parse(text: &str) -> Result<Self> {
        let mut stops = Vec::with_capacity(RAMP_STOP_COUNT);
        for (idx, raw) in text.lines().enumerate() {
            let line = idx + 1;
            let content = raw.split('#').next().unwrap_or_default().trim();
            if content.is_empty() {
                continue;
            }
            let fields: Vec<&str> = content
                .split(|c: char| c.is_whitespace() || c == ',' || c == ':')
                .filter(|f| !f.is_empty())
                .collect();
            if fields.len() != 5 {
                return Err(AnalyticsError::RampParse {
                    line,
                    reason: format!("expected 'value r g b a', found {} fields", fields.len()),
                });
            }
            let value = parse_stop_value(fields[0]).ok_or_else(|| AnalyticsError::RampParse {
                line,
                reason: format!("invalid stop value '{}'", fields[0]),
            })?;
            let mut color = [0u8; 4];
            for (channel, field) in color.iter_mut().zip(&fields[1..]) {
                *channel = field.parse().map_err(|_| AnalyticsError::RampParse {
                    line,
                    reason: format!("invalid colour component '{field}'"),
                })?;
            }
            stops.push(ColorStop { value, color });
        }
        if stops.len() != RAMP_STOP_COUNT {
            return Err(AnalyticsError::RampParse {
                line: text.lines().count(),
                reason: format!("expected {RAMP_STOP_COUNT} stops, found {}", stops.len()),
            });
        }
        Self::new(stops)
    }

    /// The stops in definition order.
    pub fn stops(&self) -> &[ColorStop] {
        &self.stops
    }

    fn uses_percent(&self) -> bool {
        self.stops.iter().any(|s| matches!(s.value, StopValue::Percent(_)))
    }

    /// Stops with values resolved against a value range, sorted ascending.
    fn resolve(&self, min: f64, max: f64) -> Vec<(f64, Rgba)> {
        let mut resolved: Vec<(f64, Rgba)> = self.stops.iter().map(|s| (s.value.resolve(min, max), s.color)).collect();
        resolved.sort_by(|a, b| a.0.total_cmp(&b.0));
        resolved
    }
}

fn parse_stop_value(field: &str) -> Option<StopValue> {
    match field.strip_suffix('%') {
        Some(p) => p.parse().ok().map(StopValue::Percent),
        None => field.parse().ok().map(StopValue::Absolute),
    }
}

/// Colour of `value` on a resolved, ascending gradient.
///
/// Values past either end take the end colour.
fn interpolate(stops: &[(f64, Rgba)], value: f64) -> Rgba {
    let (first, last) = match (stops.first(), stops.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return TRANSPARENT,
    };
    if value <= first.0 {
        return first.1;
    }
    if value >= last.0 {
        return last.1;
    }
    let upper = stops.partition_point(|(v, _)| *v <= value).min(stops.len() - 1);
    let (lo_v, lo_c) = stops[upper - 1];
    let (hi_v, hi_c) = stops[upper];
    let span = hi_v - lo_v;
    if span <= 0.0 {
        return lo_c;
    }
    let t = (value - lo_v) / span;
    let mut out = [0u8; 4];
    for (k, channel) in out.iter_mut().enumerate() {
        let a = lo_c[k] as f64;
        let b = hi_c[k] as f64;
        *channel = (a + (b - a) * t).round().clamp(0.0, 255.0) as u8;
    }
    out
}

/// One of the fixed palettes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Palette {
    /// Black to white.
    Grayscale,
    /// Blue through green to red.
    Pseudocolor,
    /// Black through red and yellow to near white.
    Fire,
    /// Diverging blue to red.
    BlueRed,
}

const GRAYSCALE_STOPS: &[ColorStop] = &[ColorStop::percent(0.0, 0, 0, 0), ColorStop::percent(100.0, 255, 255, 255)];

const PSEUDOCOLOR_STOPS: &[ColorStop] = &[
    ColorStop::percent(0.0, 0, 0, 255),
    ColorStop::percent(50.0, 0, 255, 0),
    ColorStop::percent(100.0, 255, 0, 0),
];

const FIRE_STOPS: &[ColorStop] = &[
    ColorStop::percent(0.0, 0, 0, 0),
    ColorStop::percent(6.25, 12, 15, 0),
    ColorStop::percent(12.5, 58, 58, 1),
    ColorStop::percent(18.75, 99, 82, 0),
    ColorStop::percent(25.0, 140, 93, 0),
    ColorStop::percent(31.25, 183, 91, 0),
    ColorStop::percent(37.5, 224, 74, 0),
    ColorStop::percent(43.75, 255, 42, 0),
    ColorStop::percent(50.0, 255, 0, 0),
    ColorStop::percent(56.25, 255, 42, 0),
    ColorStop::percent(62.5, 255, 84, 0),
    ColorStop::percent(68.75, 255, 131, 7),
    ColorStop::percent(75.0, 255, 187, 53),
    ColorStop::percent(81.25, 255, 228, 96),
    ColorStop::percent(87.5, 255, 255, 135),
    ColorStop::percent(93.75, 242, 255, 178),
    ColorStop::percent(100.0, 243, 255, 221),
];

const BLUERED_STOPS: &[ColorStop] = &[
    ColorStop::percent(0.0, 36, 0, 216),
    ColorStop::percent(5.88, 24, 28, 247),
    ColorStop::percent(11.76, 40, 87, 255),
    ColorStop::percent(17.65, 61, 135, 255),
    ColorStop::percent(23.53, 86, 176, 255),
    ColorStop::percent(29.41, 117, 211, 255),
    ColorStop::percent(35.29, 153, 234, 255),
    ColorStop::percent(41.18, 188, 249, 255),
    ColorStop::percent(47.06, 234, 255, 255),
    ColorStop::percent(52.94, 255, 255, 234),
    ColorStop::percent(58.82, 255, 241, 188),
    ColorStop::percent(64.71, 255, 214, 153),
    ColorStop::percent(70.59, 255, 172, 117),
    ColorStop::percent(76.47, 255, 120, 86),
    ColorStop::percent(82.35, 255, 61, 61),
    ColorStop::percent(88.24, 247, 39, 53),
    ColorStop::percent(94.12, 216, 21, 47),
    ColorStop::percent(100.0, 165, 0, 33),
];

impl Palette {
    pub const ALL: [Palette; 4] = [Palette::Grayscale, Palette::Pseudocolor, Palette::Fire, Palette::BlueRed];

    /// Keyword naming the palette.
    pub fn name(&self) -> &'static str {
        match self {
            Palette::Grayscale => "grayscale",
            Palette::Pseudocolor => "pseudocolor",
            Palette::Fire => "fire",
            Palette::BlueRed => "bluered",
        }
    }

    /// Look a palette up by keyword; `greyscale` is accepted too.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        if name == "greyscale" {
            return Some(Palette::Grayscale);
        }
        Palette::ALL.into_iter().find(|p| p.name() == name)
    }

    /// Percentage stops of the palette.
    pub fn stops(&self) -> &'static [ColorStop] {
        match self {
            Palette::Grayscale => GRAYSCALE_STOPS,
            Palette::Pseudocolor => PSEUDOCOLOR_STOPS,
            Palette::Fire => FIRE_STOPS,
            Palette::BlueRed => BLUERED_STOPS,
        }
    }

    /// Whether the palette produces a single grey band.
    pub fn is_single_band(&self) -> bool {
        matches!(self, Palette::Grayscale)
    }
}

impl fmt::Display for Palette {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Palette {
    type Err = AnalyticsError;

    fn from_str(s: &str) -> Result<Self> {
        Palette::from_name(s).ok_or_else(|| AnalyticsError::InvalidParameter(format!("unknown palette '{s}'")))
    }
}

/// How values are turned into colours.
#[derive(Debug, Clone, PartialEq)]
pub enum ColorRamp {
    /// A fixed palette.
    Discrete(Palette),
    /// A gradient shared read-only between requests.
    Continuous(Arc<ColorStops>),
}

impl ColorRamp {
    /// Output pixel layout for a grid, which depends on whether it has nodata.
    pub fn pixel_format(&self, has_nodata: bool) -> PixelFormat {
        match self {
            ColorRamp::Discrete(p) if p.is_single_band() => {
                if has_nodata {
                    PixelFormat::GrayAlpha
                } else {
                    PixelFormat::Gray
                }
            }
            _ => PixelFormat::Rgba,
        }
    }

    fn stops(&self) -> &[ColorStop] {
        match self {
            ColorRamp::Discrete(p) => p.stops(),
            ColorRamp::Continuous(s) => s.stops(),
        }
    }
}

impl From<Palette> for ColorRamp {
    fn from(palette: Palette) -> Self {
        ColorRamp::Discrete(palette)
    }
}

impl From<ColorStops> for ColorRamp {
    fn from(stops: ColorStops) -> Self {
        ColorRamp::Continuous(Arc::new(stops))
    }
}

/// Channel layout of a [`PixelGrid`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// One grey byte per pixel.
    Gray,
    /// Grey and alpha bytes per pixel.
    GrayAlpha,
    /// Red, green, blue and alpha bytes per pixel.
    Rgba,
}

impl PixelFormat {
    /// Bytes per pixel.
    pub fn channels(&self) -> usize {
        match self {
            PixelFormat::Gray => 1,
            PixelFormat::GrayAlpha => 2,
            PixelFormat::Rgba => 4,
        }
    }
}

/// Colourised raster, row-major, ready for encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelGrid {
    /// Columns.
    pub width: u32,
    /// Rows.
    pub height: u32,
    /// Channel layout of each pixel.
    pub format: PixelFormat,
    /// Row-major channel bytes, `width * height * format.channels()` long.
    pub pixels: Vec<u8>,
}

impl PixelGrid {
    /// Channel bytes of one pixel.
    pub fn pixel(&self, col: u32, row: u32) -> &[u8] {
        let n = self.format.channels();
        let start = (row as usize * self.width as usize + col as usize) * n;
        &self.pixels[start..start + n]
    }
}

/// Colourise a grid.
///
/// Nodata pixels become fully transparent. When every valid sample has the
/// same value, percentage ramps collapse and every pixel takes the colour of
/// the first stop.
pub fn apply_colormap(grid: &Grid, ramp: &ColorRamp) -> Result<PixelGrid> {
    let width = u32::try_from(grid.width())
        .map_err(|_| AnalyticsError::InvalidParameter(format!("grid width {} too large", grid.width())))?;
    let height = u32::try_from(grid.height())
        .map_err(|_| AnalyticsError::InvalidParameter(format!("grid height {} too large", grid.height())))?;

    let stops = ColorStops {
        stops: ramp.stops().to_vec(),
    };
    let (min, max) = if stops.uses_percent() {
        value_range(grid)
    } else {
        (0.0, 0.0)
    };
    let resolved = stops.resolve(min, max);

    let format = ramp.pixel_format(grid.has_nodata());
    let mut pixels = Vec::with_capacity(grid.data().len() * format.channels());
    for &v in grid.data() {
        let color = if grid.is_nodata(v) {
            TRANSPARENT
        } else {
            interpolate(&resolved, v)
        };
        match format {
            PixelFormat::Gray => pixels.push(color[0]),
            PixelFormat::GrayAlpha => pixels.extend_from_slice(&[color[0], color[3]]),
            PixelFormat::Rgba => pixels.extend_from_slice(&color),
        }
    }

    Ok(PixelGrid {
        width,
        height,
        format,
        pixels,
    })
}

fn value_range(grid: &Grid) -> (f64, f64) {
    grid.valid_values()
        .fold(None, |acc: Option<(f64, f64)>, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
        .unwrap_or((0.0, 0.0))
}
