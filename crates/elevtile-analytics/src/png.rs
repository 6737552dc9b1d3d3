//! Lossless PNG encoding of colourised grids.

use crate::colormap::{apply_colormap, ColorRamp, PixelFormat, PixelGrid};
use elevtile_raster::Grid;
use crate::{AnalyticsError, Result};
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ExtendedColorType, ImageEncoder};
use tracing::trace;

/// Stand-in returned for addresses with no tile: a 1x1 transparent GIF.
///
/// Base64 `R0lGODlhAQABAAD/ACwAAAAAAQABAAACADs=`.
pub const EMPTY_TILE: &[u8] = &[
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x00, 0xff, 0x00, 0x2c, 0x00, 0x00, 0x00, 0x00,
    0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x00, 0x3b,
];

/// PNG file signature.
pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];

fn color_type(format: PixelFormat) -> ExtendedColorType {
    match format {
        PixelFormat::Gray => ExtendedColorType::L8,
        PixelFormat::GrayAlpha => ExtendedColorType::La8,
        PixelFormat::Rgba => ExtendedColorType::Rgba8,
    }
}

/// Encode a pixel grid as PNG.
///
/// Compression and filtering are fixed, so the same pixels always produce
/// the same bytes.
pub fn encode(grid: &PixelGrid) -> Result<Vec<u8>> {
    if grid.width == 0 || grid.height == 0 {
        return Err(AnalyticsError::InvalidParameter(format!(
            "cannot encode an empty {}x{} image",
            grid.width, grid.height
        )));
    }
    let expected = (grid.width as usize)
        .checked_mul(grid.height as usize)
        .and_then(|px| px.checked_mul(grid.format.channels()))
        .ok_or_else(|| AnalyticsError::InvalidParameter("image dimensions overflow".into()))?;
    if grid.pixels.len() != expected {
        return Err(AnalyticsError::InvalidParameter(format!(
            "pixel buffer holds {} bytes, expected {}",
            grid.pixels.len(),
            expected
        )));
    }

    let mut out = Vec::new();
    let encoder = PngEncoder::new_with_quality(&mut out, CompressionType::Default, FilterType::Adaptive);
    encoder.write_image(&grid.pixels, grid.width, grid.height, color_type(grid.format))?;
    trace!("encoded {}x{} {:?} PNG: {} bytes", grid.width, grid.height, grid.format, out.len());
    Ok(out)
}

/// Colourise a grid with `ramp` and encode the result.
pub fn render(grid: &Grid, ramp: &ColorRamp) -> Result<Vec<u8>> {
    encode(&apply_colormap(grid, ramp)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_formats() {
        for (format, n) in [(PixelFormat::Gray, 1), (PixelFormat::GrayAlpha, 2), (PixelFormat::Rgba, 4)] {
            let grid = PixelGrid {
                width: 3,
                height: 2,
                format,
                pixels: (0..6 * n as u8).collect(),
            };
            let bytes = encode(&grid).unwrap();
            assert_eq!(bytes[..8], PNG_SIGNATURE);
            assert_eq!(encode(&grid).unwrap(), bytes);
        }
    }

    #[test]
    fn test_encode_rejects_bad_buffers() {
        let short = PixelGrid {
            width: 2,
            height: 2,
            format: PixelFormat::Rgba,
            pixels: vec![0; 15],
        };
        assert!(encode(&short).is_err());

        let empty = PixelGrid {
            width: 0,
            height: 4,
            format: PixelFormat::Gray,
            pixels: Vec::new(),
        };
        assert!(encode(&empty).is_err());
    }

    #[test]
    fn test_empty_tile_is_a_gif() {
        assert_eq!(EMPTY_TILE.len(), 26);
        assert_eq!(&EMPTY_TILE[..6], b"GIF89a");
    }
}
