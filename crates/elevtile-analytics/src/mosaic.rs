//! Envelope resolution: candidate-tile enumeration from the store's index
//! followed by a clip-and-merge of the fetched tiles into one destination
//! grid.
//!
//! Tile fetches for one request are independent, so they run concurrently
//! on the rayon pool. A tile that is absent or fails to load is left out of
//! the mosaic; the request only fails when every candidate failed.

use crate::{AnalyticsError, Result};
use elevtile_raster::{tiles_covering, Bounds, Envelope, Grid, TileAddress, TileStore};
use rayon::prelude::*;
use tracing::{debug, trace, warn};

/// Largest mosaic, as a multiple of the pixels its source tiles hold.
pub const MAX_MOSAIC_FILL: u64 = 4;

/// Outcome counts of the fetches issued for one request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchSummary {
    /// Tiles that were loaded.
    pub loaded: usize,
    /// Tiles the store has no data for.
    pub absent: usize,
    /// Tiles whose fetch failed.
    pub failed: usize,
}

/// A tile together with the halo of neighbouring samples around it.
#[derive(Debug, Clone)]
pub struct Neighborhood {
    /// Merged samples of the tile and whichever neighbours exist.
    pub grid: Grid,
    /// Column of the tile's top-left pixel within `grid`.
    pub col: usize,
    /// Row of the tile's top-left pixel within `grid`.
    pub row: usize,
    /// Tile width in pixels.
    pub width: usize,
    /// Tile height in pixels.
    pub height: usize,
}

impl Neighborhood {
    /// Cut the tile footprint back out of a grid aligned with this neighbourhood.
    pub fn crop_to_tile(&self, grid: &Grid) -> Result<Grid> {
        Ok(grid.crop(self.col, self.row, self.width, self.height)?)
    }
}

/// Resolves envelopes and tile neighbourhoods against a [`TileStore`].
#[derive(Debug, Clone)]
pub struct EnvelopeResolver<S> {
    store: S,
}

impl<S: TileStore> EnvelopeResolver<S> {
    /// Create a resolver over a tile store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// The underlying tile store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Fetch a single tile.
    pub fn fetch(&self, address: &TileAddress) -> Result<Option<Grid>> {
        Ok(self.store.fetch(address)?)
    }

    /// Addresses at `zoom` whose extent intersects `bounds` and that the
    /// store's index lists as present.
    pub fn candidates(&self, zoom: u8, bounds: &Bounds) -> Result<Vec<TileAddress>> {
        match tiles_covering(zoom, bounds) {
            Some(range) => Ok(self.store.addresses_in(&range)?),
            None => Ok(Vec::new()),
        }
    }

    /// Fetch tiles concurrently, dropping absent and failed ones.
    ///
    /// Returns the loaded tiles in address order. When at least one fetch
    /// was attempted and every one of them failed, the first failure is
    /// returned instead.
    pub fn fetch_all(&self, addresses: &[TileAddress]) -> Result<(Vec<(TileAddress, Grid)>, FetchSummary)> {
        let results: Vec<_> = addresses
            .par_iter()
            .map(|address| (*address, self.store.fetch(address)))
            .collect();

        let mut summary = FetchSummary::default();
        let mut first_error = None;
        let mut tiles = Vec::with_capacity(results.len());
        for (address, result) in results {
            match result {
                Ok(Some(grid)) => {
                    summary.loaded += 1;
                    tiles.push((address, grid));
                }
                Ok(None) => {
                    summary.absent += 1;
                    debug!("tile {} absent", address);
                }
                Err(err) => {
                    summary.failed += 1;
                    warn!("excluding tile {} from mosaic: {}", address, err);
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) if summary.loaded == 0 && summary.absent == 0 => Err(err.into()),
            _ => Ok((tiles, summary)),
        }
    }

    /// Merge every tile intersecting `envelope` at `zoom` into one grid
    /// covering the envelope's pixel footprint.
    ///
    /// Returns `None` when no tile with data intersects the envelope, and
    /// [`AnalyticsError::MosaicTooSparse`] when the tiles found are too far
    /// apart to merge.
    pub fn resolve(&self, zoom: u8, envelope: &Envelope) -> Result<Option<Grid>> {
        self.resolve_bounds(zoom, &envelope.to_mercator())
    }

    /// [`resolve`](Self::resolve) for a rectangle already in Mercator metres.
    pub fn resolve_bounds(&self, zoom: u8, bounds: &Bounds) -> Result<Option<Grid>> {
        let candidates = self.candidates(zoom, bounds)?;
        trace!("{} candidate tiles at zoom {} for {:?}", candidates.len(), zoom, bounds);
        let (tiles, summary) = self.fetch_all(&candidates)?;
        debug!(
            "envelope fetch: {} loaded, {} absent, {} failed",
            summary.loaded, summary.absent, summary.failed
        );
        mosaic(tiles.iter().map(|(_, grid)| grid), bounds)
    }

    /// Build the neighbourhood of `address` extended by `buffer` pixels on
    /// every side.
    ///
    /// The halo is filled from neighbouring tiles where they exist and then
    /// trimmed to the rectangle spanned by the tiles actually present, so
    /// the derivative kernels replicate edges at the true data boundary.
    /// Returns `None` when the centre tile itself is absent.
    pub fn neighborhood(&self, address: &TileAddress, buffer: usize) -> Result<Option<Neighborhood>> {
        let Some(center) = self.fetch(address)? else {
            return Ok(None);
        };
        let (width, height) = (center.width(), center.height());
        if buffer == 0 || center.is_empty() {
            return Ok(Some(Neighborhood {
                grid: center,
                col: 0,
                row: 0,
                width,
                height,
            }));
        }

        let radius = buffer.div_ceil(width.min(height)) as u32;
        let (neighbors, summary) = match self.fetch_all(&address.neighbors(radius)) {
            Ok(fetched) => fetched,
            Err(err) => {
                // The centre tile is enough to render without a halo
                warn!("no neighbours of {} could be loaded: {}", address, err);
                (Vec::new(), FetchSummary::default())
            }
        };
        trace!("neighbourhood of {}: {:?}", address, summary);

        let full_w = width + 2 * buffer;
        let full_h = height + 2 * buffer;
        let offset = buffer as i64;
        let mut grid = Grid::filled(
            full_w,
            full_h,
            center.nodata(),
            center.nodata(),
            center.transform().offset(-offset, -offset),
        );

        let mut extent = PixelRect::new(buffer, buffer, width, height);
        grid.paste(&center)?;
        for (neighbor, tile) in &neighbors {
            let (col, row) = match grid.pixel_offset_of(tile.transform()) {
                Ok(origin) => origin,
                Err(err) => {
                    warn!("skipping neighbour {} of {}: {}", neighbor, address, err);
                    continue;
                }
            };
            let Some(rect) = PixelRect::clipped(col, row, tile.width(), tile.height(), full_w, full_h) else {
                continue;
            };
            grid.paste(tile)?;
            extent = extent.union(&rect);
        }

        let grid = grid.crop(extent.col, extent.row, extent.width, extent.height)?;
        Ok(Some(Neighborhood {
            grid,
            col: buffer - extent.col,
            row: buffer - extent.row,
            width,
            height,
        }))
    }
}

/// Clip and merge `tiles` into one grid covering the pixels of `bounds`.
///
/// The destination lattice is the first tile's pixel lattice; a pixel is
/// part of the result when its centre lies inside both `bounds` and the
/// combined extent of the tiles. Tiles at a different resolution are
/// skipped.
///
/// The result is refused with [`AnalyticsError::MosaicTooSparse`] when it
/// would hold more than [`MAX_MOSAIC_FILL`] times the pixels of the tiles,
/// as happens for a few tiles scattered across a large envelope. Reduce
/// such tiles with
/// [`compute_statistics_over_envelope`](crate::compute_statistics_over_envelope)
/// instead.
pub fn mosaic<'a, I>(tiles: I, bounds: &Bounds) -> Result<Option<Grid>>
where
    I: IntoIterator<Item = &'a Grid>,
{
    let tiles: Vec<&Grid> = tiles.into_iter().filter(|g| !g.is_empty()).collect();
    let Some(first) = tiles.first() else {
        return Ok(None);
    };
    let t = *first.transform();

    let Some(extent) = tiles.iter().map(|g| g.bounds()).reduce(|a, b| a.union(&b)) else {
        return Ok(None);
    };
    let clip = Bounds::new(
        bounds.min_x.max(extent.min_x),
        bounds.min_y.max(extent.min_y),
        bounds.max_x.min(extent.max_x),
        bounds.max_y.min(extent.max_y),
    );
    if bounds.min_x > extent.max_x
        || bounds.max_x < extent.min_x
        || bounds.min_y > extent.max_y
        || bounds.max_y < extent.min_y
    {
        return Ok(None);
    }

    let (Some((col0, col1)), Some((row0, row1))) = (
        lattice_span(clip.min_x, clip.max_x, t.origin_x, t.pixel_size_x),
        lattice_span(clip.min_y, clip.max_y, t.origin_y, t.pixel_size_y),
    ) else {
        return Ok(None);
    };
    let cells = ((col1 - col0 + 1) as u64).saturating_mul((row1 - row0 + 1) as u64);
    let pixels: u64 = tiles.iter().map(|g| (g.width() * g.height()) as u64).sum();
    if cells > pixels.saturating_mul(MAX_MOSAIC_FILL) {
        return Err(AnalyticsError::MosaicTooSparse { cells, pixels });
    }
    let width = (col1 - col0 + 1) as usize;
    let height = (row1 - row0 + 1) as usize;

    let mut out = Grid::filled(width, height, first.nodata(), first.nodata(), t.offset(col0, row0));
    for tile in &tiles {
        if let Err(err) = out.paste(tile) {
            warn!("skipping tile in mosaic: {}", err);
        }
    }
    trace!("mosaic of {} tiles: {}x{}", tiles.len(), width, height);
    Ok(Some(out))
}

/// Inclusive range of lattice indices whose pixel centres fall in `[lo, hi]`.
fn lattice_span(lo: f64, hi: f64, origin: f64, pixel_size: f64) -> Option<(i64, i64)> {
    let a = (lo - origin) / pixel_size - 0.5;
    let b = (hi - origin) / pixel_size - 0.5;
    let start = a.min(b).ceil() as i64;
    let end = a.max(b).floor() as i64;
    (end >= start).then_some((start, end))
}

/// Rectangle of pixels inside a destination grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PixelRect {
    col: usize,
    row: usize,
    width: usize,
    height: usize,
}

impl PixelRect {
    fn new(col: usize, row: usize, width: usize, height: usize) -> Self {
        Self { col, row, width, height }
    }

    /// Part of a `width` x `height` block at `(col, row)` that falls inside
    /// a `bound_w` x `bound_h` grid.
    fn clipped(col: i64, row: i64, width: usize, height: usize, bound_w: usize, bound_h: usize) -> Option<Self> {
        let c0 = col.max(0);
        let r0 = row.max(0);
        let c1 = (col + width as i64).min(bound_w as i64);
        let r1 = (row + height as i64).min(bound_h as i64);
        (c1 > c0 && r1 > r0).then(|| Self::new(c0 as usize, r0 as usize, (c1 - c0) as usize, (r1 - r0) as usize))
    }

    fn union(&self, other: &PixelRect) -> Self {
        let c0 = self.col.min(other.col);
        let r0 = self.row.min(other.row);
        let c1 = (self.col + self.width).max(other.col + other.width);
        let r1 = (self.row + self.height).max(other.row + other.height);
        Self::new(c0, r0, c1 - c0, r1 - r0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute_statistics_over_envelope;
    use elevtile_raster::{MemoryTileStore, RasterError, ORIGIN_SHIFT_M};

    const TILE: usize = 4;

    fn tile(address: TileAddress, value: f64) -> Grid {
        Grid::for_tile(&address, TILE, TILE, vec![value; TILE * TILE], -9999.0).unwrap()
    }

    fn store_with(tiles: &[(TileAddress, f64)]) -> MemoryTileStore {
        let store = MemoryTileStore::new();
        for (address, value) in tiles {
            store.insert(*address, tile(*address, *value)).unwrap();
        }
        store
    }

    fn addr(z: u8, x: u32, y: u32) -> TileAddress {
        TileAddress::new(z, x, y).unwrap()
    }

    #[test]
    fn test_resolve_merges_adjacent_tiles() {
        let a = addr(3, 4, 2);
        let b = addr(3, 5, 2);
        let resolver = EnvelopeResolver::new(store_with(&[(a, 1.0), (b, 2.0)]));

        let bounds = a.bounds().union(&b.bounds());
        let grid = resolver.resolve_bounds(3, &bounds).unwrap().unwrap();
        assert_eq!((grid.width(), grid.height()), (2 * TILE, TILE));
        assert_eq!(grid.valid_values().filter(|v| *v == 1.0).count(), TILE * TILE);
        assert_eq!(grid.valid_values().filter(|v| *v == 2.0).count(), TILE * TILE);
    }

    #[test]
    fn test_resolve_clips_by_pixel_centre() {
        let a = addr(3, 4, 2);
        let resolver = EnvelopeResolver::new(store_with(&[(a, 1.0)]));
        let b = a.bounds();
        let px = b.width() / TILE as f64;

        // Covers the centres of the first two columns and rows only
        let window = Bounds::new(b.min_x, b.max_y - 1.6 * px, b.min_x + 1.6 * px, b.max_y);
        let grid = resolver.resolve_bounds(3, &window).unwrap().unwrap();
        assert_eq!((grid.width(), grid.height()), (2, 2));
        assert_eq!(grid.valid_values().count(), 4);
    }

    #[test]
    fn test_resolve_outside_all_tiles() {
        let resolver = EnvelopeResolver::new(store_with(&[(addr(3, 4, 2), 1.0)]));
        let far = addr(3, 0, 7).bounds();
        assert!(resolver.resolve_bounds(3, &far).unwrap().is_none());
    }

    #[test]
    fn test_scattered_tiles_are_not_merged_densely() {
        // Opposite corners of the world at zoom 8
        let nw = addr(8, 0, 0);
        let se = addr(8, 255, 255);
        let resolver = EnvelopeResolver::new(store_with(&[(nw, 1.0), (se, 3.0)]));
        let world = Bounds::new(-ORIGIN_SHIFT_M, -ORIGIN_SHIFT_M, ORIGIN_SHIFT_M, ORIGIN_SHIFT_M);

        let err = resolver.resolve_bounds(8, &world).unwrap_err();
        assert!(matches!(err, AnalyticsError::MosaicTooSparse { pixels: 32, .. }));

        let candidates = resolver.candidates(8, &world).unwrap();
        assert_eq!(candidates, vec![nw, se]);
        let (tiles, _) = resolver.fetch_all(&candidates).unwrap();
        let stats = compute_statistics_over_envelope(tiles.iter().map(|(_, g)| g), &world);
        assert_eq!(stats.count, 2 * (TILE * TILE) as u64);
        assert_eq!(stats.mean, 2.0);
    }

    #[test]
    fn test_candidates_at_max_zoom_come_from_the_index() {
        let a = addr(15, 100, 200);
        let resolver = EnvelopeResolver::new(store_with(&[(a, 1.0)]));
        let world = Bounds::new(-ORIGIN_SHIFT_M, -ORIGIN_SHIFT_M, ORIGIN_SHIFT_M, ORIGIN_SHIFT_M);
        assert_eq!(resolver.candidates(15, &world).unwrap(), vec![a]);
    }

    /// Store that cannot be reached for the addresses in `broken`.
    struct FailingStore {
        tiles: MemoryTileStore,
        broken: Vec<TileAddress>,
    }

    impl FailingStore {
        fn offline() -> Self {
            Self {
                tiles: MemoryTileStore::new(),
                broken: Vec::new(),
            }
        }
    }

    impl TileStore for FailingStore {
        fn fetch(&self, address: &TileAddress) -> elevtile_raster::Result<Option<Grid>> {
            if self.broken.is_empty() || self.broken.contains(address) {
                return Err(RasterError::StoreUnavailable {
                    z: address.zoom,
                    x: address.x,
                    y: address.y,
                    reason: "offline".into(),
                });
            }
            self.tiles.fetch(address)
        }

        fn contains(&self, address: &TileAddress) -> bool {
            self.broken.is_empty() || self.broken.contains(address) || self.tiles.contains(address)
        }
    }

    #[test]
    fn test_all_failed_fetches_surface_error() {
        let resolver = EnvelopeResolver::new(FailingStore::offline());
        let err = resolver.resolve_bounds(3, &addr(3, 4, 2).bounds()).unwrap_err();
        assert!(matches!(err, AnalyticsError::Raster(RasterError::StoreUnavailable { .. })));
    }

    #[test]
    fn test_failed_tile_is_excluded_from_envelope() {
        let (a, b, c, broken) = (addr(3, 4, 2), addr(3, 5, 2), addr(3, 4, 3), addr(3, 5, 3));
        let resolver = EnvelopeResolver::new(FailingStore {
            tiles: store_with(&[(a, 1.0), (b, 2.0), (c, 3.0)]),
            broken: vec![broken],
        });
        let bounds = a.bounds().union(&broken.bounds());

        let candidates = resolver.candidates(3, &bounds).unwrap();
        assert_eq!(candidates.len(), 4);
        let (tiles, summary) = resolver.fetch_all(&candidates).unwrap();
        assert_eq!(
            summary,
            FetchSummary {
                loaded: 3,
                absent: 0,
                failed: 1
            }
        );
        assert!(tiles.iter().all(|(address, _)| *address != broken));

        let stats = compute_statistics_over_envelope(tiles.iter().map(|(_, g)| g), &bounds);
        assert_eq!(stats.count, 3 * (TILE * TILE) as u64);
        assert_eq!(stats.max, 3.0);

        // The surviving tiles still merge; the broken quadrant stays nodata
        let grid = resolver.resolve_bounds(3, &bounds).unwrap().unwrap();
        assert_eq!((grid.width(), grid.height()), (2 * TILE, 2 * TILE));
        assert_eq!(grid.valid_values().count(), 3 * TILE * TILE);
    }

    #[test]
    fn test_neighborhood_trims_to_present_tiles() {
        let center = addr(4, 8, 8);
        let east = addr(4, 9, 8);
        let resolver = EnvelopeResolver::new(store_with(&[(center, 1.0), (east, 2.0)]));

        let hood = resolver.neighborhood(&center, 2).unwrap().unwrap();
        assert_eq!((hood.grid.width(), hood.grid.height()), (TILE + 2, TILE));
        assert_eq!((hood.col, hood.row), (0, 0));
        assert_eq!(hood.grid.get(TILE, 0), Some(2.0));

        let back = hood.crop_to_tile(&hood.grid).unwrap();
        assert_eq!(back.data(), resolver.fetch(&center).unwrap().unwrap().data());
    }

    #[test]
    fn test_neighborhood_of_missing_tile() {
        let resolver = EnvelopeResolver::new(MemoryTileStore::new());
        assert!(resolver.neighborhood(&addr(4, 8, 8), 10).unwrap().is_none());
    }
}
