//! Tile store interface and an in-memory implementation.

use crate::address::{TileAddress, TileRange};
use crate::grid::Grid;
use crate::{RasterError, Result};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Most addresses the default [`TileStore::addresses_in`] will check one by one.
pub const MAX_SCANNED_TILES: u64 = 1 << 16;

/// Resolves tile addresses to elevation grids.
///
/// `Ok(None)` means the pyramid simply has no tile at that address, which is
/// a normal outcome. `Err` is reserved for failing to reach the backing
/// storage. Implementations own their own caching and retry policy and must
/// be safe to call from several threads at once.
pub trait TileStore: Send + Sync {
    /// Fetch the grid stored at `address`.
    fn fetch(&self, address: &TileAddress) -> Result<Option<Grid>>;

    /// Cheap index-level check for whether a tile exists at `address`.
    ///
    /// The default implementation fetches the tile; stores with an index
    /// should override it.
    fn contains(&self, address: &TileAddress) -> bool {
        matches!(self.fetch(address), Ok(Some(_)))
    }

    /// Addresses inside `range` that the store holds a tile for, sorted.
    ///
    /// The default implementation checks every address with
    /// [`contains`](Self::contains) and refuses blocks larger than
    /// [`MAX_SCANNED_TILES`]; stores with an index should answer from it.
    fn addresses_in(&self, range: &TileRange) -> Result<Vec<TileAddress>> {
        let count = range.tile_count();
        if count > MAX_SCANNED_TILES {
            return Err(RasterError::InvalidParameter(format!(
                "{count} tiles at zoom {} is more than the {MAX_SCANNED_TILES} this store can scan",
                range.zoom
            )));
        }
        let mut found: Vec<TileAddress> = range.iter().filter(|address| self.contains(address)).collect();
        found.sort();
        Ok(found)
    }
}

impl<S: TileStore + ?Sized> TileStore for std::sync::Arc<S> {
    fn fetch(&self, address: &TileAddress) -> Result<Option<Grid>> {
        (**self).fetch(address)
    }

    fn contains(&self, address: &TileAddress) -> bool {
        (**self).contains(address)
    }

    fn addresses_in(&self, range: &TileRange) -> Result<Vec<TileAddress>> {
        (**self).addresses_in(range)
    }
}

impl<S: TileStore + ?Sized> TileStore for &S {
    fn fetch(&self, address: &TileAddress) -> Result<Option<Grid>> {
        (**self).fetch(address)
    }

    fn contains(&self, address: &TileAddress) -> bool {
        (**self).contains(address)
    }

    fn addresses_in(&self, range: &TileRange) -> Result<Vec<TileAddress>> {
        (**self).addresses_in(range)
    }
}

/// Tile store holding grids in memory.
///
/// This type is thread-safe and can be shared across threads.
#[derive(Debug, Default)]
pub struct MemoryTileStore {
    tiles: RwLock<HashMap<TileAddress, Grid>>,
}

impl MemoryTileStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the tile at `address`.
    pub fn insert(&self, address: TileAddress, grid: Grid) -> Result<()> {
        let mut tiles = self.tiles.write().map_err(|_| RasterError::CacheLockPoisoned)?;
        tiles.insert(address, grid);
        Ok(())
    }

    /// Remove the tile at `address`, returning it if present.
    pub fn remove(&self, address: &TileAddress) -> Result<Option<Grid>> {
        let mut tiles = self.tiles.write().map_err(|_| RasterError::CacheLockPoisoned)?;
        Ok(tiles.remove(address))
    }

    /// Number of stored tiles.
    pub fn len(&self) -> usize {
        self.tiles.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether the store holds no tiles.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TileStore for MemoryTileStore {
    fn fetch(&self, address: &TileAddress) -> Result<Option<Grid>> {
        let tiles = self.tiles.read().map_err(|_| RasterError::CacheLockPoisoned)?;
        Ok(tiles.get(address).cloned())
    }

    fn contains(&self, address: &TileAddress) -> bool {
        self.tiles.read().unwrap_or_else(PoisonError::into_inner).contains_key(address)
    }

    fn addresses_in(&self, range: &TileRange) -> Result<Vec<TileAddress>> {
        let tiles = self.tiles.read().map_err(|_| RasterError::CacheLockPoisoned)?;
        let mut found: Vec<TileAddress> = tiles.keys().filter(|address| range.contains(address)).copied().collect();
        found.sort();
        Ok(found)
    }
}
