//! GeoTIFF-backed tile store.
//!
//! Tiles live on disk as single-band GeoTIFFs laid out like a slippy-map
//! cache: `{root}/{z}/{x}/{y}.tif`. The georeferencing comes from the
//! ModelTiepoint / ModelPixelScale tags when present, and otherwise from the
//! tile's own Web Mercator extent. Decoded tiles are kept in a bounded LRU
//! cache so neighbouring requests do not decode the same file repeatedly.

use crate::address::{TileAddress, TileRange};
use crate::grid::{GeoTransform, Grid};
use crate::store::TileStore;
use crate::{RasterError, Result};
use std::collections::{HashMap, VecDeque};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::tags::Tag;
use tracing::{debug, trace};

/// Default maximum number of decoded tiles kept in memory.
/// A 512x512 tile of f64 samples is 2 MiB.
const DEFAULT_TILE_CACHE_SIZE: usize = 256;

/// GeoTIFF ModelTiepointTag.
const TAG_MODEL_TIEPOINT: u16 = 33922;

/// GeoTIFF ModelPixelScaleTag.
const TAG_MODEL_PIXEL_SCALE: u16 = 33550;

/// GDAL_NODATA tag, stored as an ASCII string.
const TAG_GDAL_NODATA: u16 = 42113;

/// Extension of tile files.
const TILE_EXTENSION: &str = "tif";

/// Bounded least-recently-used map of decoded tiles.
#[derive(Debug)]
struct TileCache {
    tiles: HashMap<TileAddress, Grid>,
    /// Front is the eviction candidate.
    recency: VecDeque<TileAddress>,
    capacity: usize,
}

impl TileCache {
    fn new(capacity: usize) -> Self {
        Self {
            tiles: HashMap::with_capacity(capacity),
            recency: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn get(&mut self, address: &TileAddress) -> Option<Grid> {
        let grid = self.tiles.get(address)?.clone();
        self.promote(address);
        Some(grid)
    }

    fn promote(&mut self, address: &TileAddress) {
        if let Some(pos) = self.recency.iter().position(|a| a == address) {
            self.recency.remove(pos);
        }
        self.recency.push_back(*address);
    }

    fn insert(&mut self, address: TileAddress, grid: Grid) {
        if self.capacity == 0 {
            return;
        }
        if self.tiles.insert(address, grid).is_none() {
            while self.tiles.len() > self.capacity {
                let Some(evicted) = self.recency.pop_front() else {
                    break;
                };
                self.tiles.remove(&evicted);
            }
        }
        self.promote(&address);
    }

    fn len(&self) -> usize {
        self.tiles.len()
    }

    fn clear(&mut self) {
        self.tiles.clear();
        self.recency.clear();
    }
}

/// Tile store reading GeoTIFF tiles from a directory tree.
///
/// This type is thread-safe and can be shared across threads.
///
/// # Example
///
/// ```no_run
/// use elevtile_raster::{GeoTiffTileStore, TileAddress, TileStore};
///
/// let store = GeoTiffTileStore::new("tiles");
/// let address = TileAddress::new(12, 655, 1407)?;
/// if let Some(grid) = store.fetch(&address)? {
///     println!("{}x{} samples", grid.width(), grid.height());
/// }
/// # Ok::<(), elevtile_raster::RasterError>(())
/// ```
#[derive(Debug)]
pub struct GeoTiffTileStore {
    /// Root of the `{z}/{x}/{y}.tif` tree.
    root: PathBuf,
    /// Cache of decoded tiles (thread-safe for concurrent access).
    cache: RwLock<TileCache>,
}

impl GeoTiffTileStore {
    /// Create a store over `root` with the default cache size.
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self::with_cache_size(root, DEFAULT_TILE_CACHE_SIZE)
    }

    /// Create a store over `root` keeping at most `max_cache_size` decoded tiles.
    pub fn with_cache_size<P: AsRef<Path>>(root: P, max_cache_size: usize) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            cache: RwLock::new(TileCache::new(max_cache_size)),
        }
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the file backing `address`.
    pub fn tile_path(&self, address: &TileAddress) -> PathBuf {
        self.root
            .join(address.zoom.to_string())
            .join(address.x.to_string())
            .join(format!("{}.{TILE_EXTENSION}", address.y))
    }

    /// Number of decoded tiles currently cached.
    pub fn cached_tile_count(&self) -> usize {
        self.cache.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Drop every decoded tile from memory.
    ///
    /// This also resets a cache left poisoned by a panicking thread.
    pub fn clear_cache(&self) {
        self.cache.write().unwrap_or_else(PoisonError::into_inner).clear();
        self.cache.clear_poison();
    }

    /// Numeric entry names of `dir` that fall in `span`.
    ///
    /// With `extension` set only files with that extension count and the
    /// number is the file stem; otherwise only subdirectories count. A
    /// missing directory has no entries.
    fn indexed_entries(dir: &Path, span: RangeInclusive<u32>, extension: Option<&str>) -> Result<Vec<u32>> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut indices = Vec::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            let name = match extension {
                Some(ext) if path.extension().and_then(|e| e.to_str()) == Some(ext) => path.file_stem(),
                Some(_) => continue,
                None if entry.file_type()?.is_dir() => path.file_name(),
                None => continue,
            };
            if let Some(index) = name.and_then(|n| n.to_str()).and_then(|n| n.parse::<u32>().ok()) {
                if span.contains(&index) {
                    indices.push(index);
                }
            }
        }
        Ok(indices)
    }

    /// Decode one GeoTIFF file into a grid.
    ///
    /// `address` supplies the georeferencing when the file carries no
    /// GeoTIFF transform tags.
    pub fn load_file<P: AsRef<Path>>(path: P, address: &TileAddress) -> Result<Grid> {
        let file = std::fs::File::open(path.as_ref())?;
        let mut decoder = Decoder::new(std::io::BufReader::new(file))?;

        let mut limits = Limits::default();
        limits.decoding_buffer_size = 256 * 1024 * 1024;
        limits.intermediate_buffer_size = 256 * 1024 * 1024;
        decoder = decoder.with_limits(limits);

        let (width, height) = decoder.dimensions()?;
        let (width, height) = (width as usize, height as usize);

        let transform = Self::read_transform(&mut decoder)?
            .unwrap_or_else(|| GeoTransform::for_tile(address, width, height));
        let nodata = Self::read_nodata_value(&mut decoder);
        let data = Self::decode_samples(&mut decoder)?;

        if data.len() != width * height {
            return Err(RasterError::InvalidGeoTiff(format!(
                "expected a single band of {}x{} samples, decoded {}",
                width,
                height,
                data.len()
            )));
        }

        Grid::new(width, height, data, nodata, transform)
    }

    /// Read the transform from ModelTiepoint and ModelPixelScale tags.
    fn read_transform<R: std::io::Read + std::io::Seek>(
        decoder: &mut Decoder<R>,
    ) -> Result<Option<GeoTransform>> {
        let tiepoint = decoder.get_tag_f64_vec(Tag::from_u16_exhaustive(TAG_MODEL_TIEPOINT));
        let pixel_scale = decoder.get_tag_f64_vec(Tag::from_u16_exhaustive(TAG_MODEL_PIXEL_SCALE));

        let (Ok(tiepoint), Ok(scale)) = (tiepoint, pixel_scale) else {
            return Ok(None);
        };
        if tiepoint.len() < 6 || scale.len() < 2 {
            return Err(RasterError::InvalidGeoTiff(format!(
                "tiepoint has {} values and pixel scale {}, need 6 and 2",
                tiepoint.len(),
                scale.len()
            )));
        }
        if scale[0] <= 0.0 || scale[1] <= 0.0 {
            return Err(RasterError::InvalidGeoTiff(format!(
                "non-positive pixel scale ({}, {})",
                scale[0], scale[1]
            )));
        }

        // Tiepoint format: [i, j, k, x, y, z] ties raster (i, j) to model (x, y)
        let (i, j) = (tiepoint[0], tiepoint[1]);
        let (x, y) = (tiepoint[3], tiepoint[4]);
        Ok(Some(GeoTransform::new(
            x - i * scale[0],
            y + j * scale[1],
            scale[0],
            -scale[1],
        )))
    }

    /// Decode the first band as f64 samples.
    fn decode_samples<R: std::io::Read + std::io::Seek>(decoder: &mut Decoder<R>) -> Result<Vec<f64>> {
        let result = decoder.read_image()?;

        Ok(match result {
            DecodingResult::F64(data) => data,
            DecodingResult::F32(data) => data.into_iter().map(f64::from).collect(),
            DecodingResult::I16(data) => data.into_iter().map(f64::from).collect(),
            DecodingResult::I32(data) => data.into_iter().map(f64::from).collect(),
            DecodingResult::U16(data) => data.into_iter().map(f64::from).collect(),
            DecodingResult::U32(data) => data.into_iter().map(f64::from).collect(),
            DecodingResult::U8(data) => data.into_iter().map(f64::from).collect(),
            DecodingResult::I8(data) => data.into_iter().map(f64::from).collect(),
            DecodingResult::U64(data) => data.into_iter().map(|v| v as f64).collect(),
            DecodingResult::I64(data) => data.into_iter().map(|v| v as f64).collect(),
        })
    }

    /// Read the nodata sentinel from the GDAL_NODATA tag.
    ///
    /// Without the tag only NaN samples count as missing.
    fn read_nodata_value<R: std::io::Read + std::io::Seek>(decoder: &mut Decoder<R>) -> f64 {
        decoder
            .get_tag_ascii_string(Tag::from_u16_exhaustive(TAG_GDAL_NODATA))
            .ok()
            .and_then(|s| s.trim_matches(char::from(0)).trim().parse().ok())
            .unwrap_or(f64::NAN)
    }
}

impl TileStore for GeoTiffTileStore {
    fn fetch(&self, address: &TileAddress) -> Result<Option<Grid>> {
        {
            let mut cache = self.cache.write().map_err(|_| RasterError::CacheLockPoisoned)?;
            if let Some(grid) = cache.get(address) {
                trace!(%address, "tile cache hit");
                return Ok(Some(grid));
            }
        }

        let path = self.tile_path(address);
        if !path.exists() {
            debug!(%address, path = %path.display(), "no tile file");
            return Ok(None);
        }

        let grid = Self::load_file(&path, address)?;
        debug!(%address, width = grid.width(), height = grid.height(), "decoded tile");

        let mut cache = self.cache.write().map_err(|_| RasterError::CacheLockPoisoned)?;
        cache.insert(*address, grid.clone());
        Ok(Some(grid))
    }

    fn contains(&self, address: &TileAddress) -> bool {
        self.tile_path(address).exists()
    }

    /// Lists `{z}/` and then each matching `{z}/{x}/`, so the cost follows
    /// the tiles on disk rather than the size of the range.
    fn addresses_in(&self, range: &TileRange) -> Result<Vec<TileAddress>> {
        let zoom_dir = self.root.join(range.zoom.to_string());
        let mut found = Vec::new();
        for x in Self::indexed_entries(&zoom_dir, range.min_x..=range.max_x, None)? {
            let column = zoom_dir.join(x.to_string());
            for y in Self::indexed_entries(&column, range.min_y..=range.max_y, Some(TILE_EXTENSION))? {
                found.push(TileAddress { zoom: range.zoom, x, y });
            }
        }
        found.sort();
        trace!(zoom = range.zoom, tiles = found.len(), "listed tile index");
        Ok(found)
    }
}
