use std::collections::HashMap;

use glam::DVec3;
use terrastream_common::{CoordinateMapper, TileCoord};

use crate::tile::{Tile, TileState};

/// Errors from cache mutation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("tile {0} is already resident")]
    Occupied(TileCoord),
}

/// Resident tile storage with memory accounting.
///
/// The cache is the only owner of resident tiles. Eviction order is farthest
/// from the observer first; among equally distant tiles the one touched
/// least recently goes first.
#[derive(Debug, Default)]
pub struct TileCache {
    tiles: HashMap<TileCoord, Tile>,
    memory_used: usize,
    touch_seq: u64,
}

impl TileCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a built tile. Never overwrites an existing resident tile.
    pub fn insert(&mut self, mut tile: Tile) -> Result<(), CacheError> {
        let coord = tile.coord();
        if self.tiles.contains_key(&coord) {
            return Err(CacheError::Occupied(coord));
        }
        self.touch_seq += 1;
        tile.set_last_touched(self.touch_seq);
        tile.set_state(TileState::Resident);
        self.memory_used += tile.memory_bytes();
        self.tiles.insert(coord, tile);
        Ok(())
    }

    /// Mark a resident tile as recently used. Returns false if not resident.
    pub fn touch(&mut self, coord: TileCoord) -> bool {
        match self.tiles.get_mut(&coord) {
            Some(tile) => {
                self.touch_seq += 1;
                tile.set_last_touched(self.touch_seq);
                true
            }
            None => false,
        }
    }

    /// Remove a tile, releasing its meshes and collision data.
    pub fn remove(&mut self, coord: TileCoord) -> Option<Tile> {
        let mut tile = self.tiles.remove(&coord)?;
        self.memory_used = self.memory_used.saturating_sub(tile.memory_bytes());
        tile.release();
        tracing::debug!(%coord, bytes = tile.memory_bytes(), "evicted tile");
        Some(tile)
    }

    /// Evict until total memory is at most `max_bytes`.
    ///
    /// Stops with one tile left even if that tile alone exceeds the ceiling.
    /// Returns the evicted coordinates in eviction order.
    pub fn evict_to_budget(
        &mut self,
        max_bytes: usize,
        observer: DVec3,
        mapper: &CoordinateMapper,
    ) -> Vec<TileCoord> {
        let mut evicted = Vec::new();
        if self.memory_used <= max_bytes {
            return evicted;
        }
        for coord in self.eviction_order(observer, mapper) {
            if self.memory_used <= max_bytes || self.tiles.len() <= 1 {
                break;
            }
            if self.remove(coord).is_some() {
                evicted.push(coord);
            }
        }
        if self.memory_used > max_bytes {
            if let Some(tile) = self.tiles.values().next() {
                tracing::warn!(
                    coord = %tile.coord(),
                    bytes = tile.memory_bytes(),
                    max_bytes,
                    "single resident tile exceeds memory ceiling"
                );
            }
        }
        evicted
    }

    /// Evict the farthest `fraction` of resident tiles, rounded up.
    pub fn evict_farthest_fraction(
        &mut self,
        fraction: f64,
        observer: DVec3,
        mapper: &CoordinateMapper,
    ) -> Vec<TileCoord> {
        let count = (self.tiles.len() as f64 * fraction.clamp(0.0, 1.0)).ceil() as usize;
        let victims: Vec<TileCoord> = self
            .eviction_order(observer, mapper)
            .into_iter()
            .take(count)
            .collect();
        for coord in &victims {
            self.remove(*coord);
        }
        victims
    }

    /// Drop every resident tile. Returns how many were removed.
    pub fn clear(&mut self) -> usize {
        let count = self.tiles.len();
        for (_, mut tile) in self.tiles.drain() {
            tile.release();
        }
        self.memory_used = 0;
        count
    }

    /// Resident coordinates, farthest first, ties by least recently touched.
    pub fn eviction_order(&self, observer: DVec3, mapper: &CoordinateMapper) -> Vec<TileCoord> {
        let mut order: Vec<(TileCoord, f64, u64)> = self
            .tiles
            .values()
            .map(|t| (t.coord(), mapper.distance(observer, t.coord()), t.last_touched()))
            .collect();
        order.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.2.cmp(&b.2)));
        order.into_iter().map(|(c, _, _)| c).collect()
    }

    pub fn get(&self, coord: TileCoord) -> Option<&Tile> {
        self.tiles.get(&coord)
    }

    pub fn contains(&self, coord: TileCoord) -> bool {
        self.tiles.contains_key(&coord)
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Sum of resident tile cost estimates.
    pub fn memory_used(&self) -> usize {
        self.memory_used
    }

    pub fn coords(&self) -> impl Iterator<Item = TileCoord> + '_ {
        self.tiles.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tile> {
        self.tiles.values()
    }

    /// Mutate every resident tile in place. Memory estimates are fixed at
    /// build time, so callers must not change what they account for.
    pub(crate) fn for_each_mut(&mut self, mut f: impl FnMut(&mut Tile)) {
        for tile in self.tiles.values_mut() {
            f(tile);
        }
    }
}
