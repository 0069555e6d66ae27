use std::sync::Arc;

use glam::DVec3;
use serde::{Deserialize, Serialize};
use terrastream_common::TileCoord;
use terrastream_elevation::ElevationGrid;

use crate::biome::{BiomeClassifier, BiomeGrid};

/// Lifecycle of a tile coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TileState {
    Absent,
    Queued,
    Building,
    Resident,
    Evicting,
}

/// Distance-based LOD selection.
///
/// Level `k` is active while `distance < base_distance * multiplier^k`;
/// anything farther gets the coarsest level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LodPolicy {
    pub levels: usize,
    pub base_distance: f64,
    pub multiplier: f64,
}

impl LodPolicy {
    pub fn coarsest(&self) -> usize {
        self.levels.saturating_sub(1)
    }

    /// LOD index for a distance, shifted `bias` levels coarser.
    pub fn select(&self, distance: f64, bias: usize) -> usize {
        let coarsest = self.coarsest();
        let mut threshold = self.base_distance;
        let mut level = coarsest;
        for k in 0..coarsest {
            if distance < threshold {
                level = k;
                break;
            }
            threshold *= self.multiplier;
        }
        (level + bias).min(coarsest)
    }
}

/// Decimated triangle grid for one LOD level, in tile-local coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct LodMesh {
    pub level: usize,
    /// Grid stride in source samples (`2^level`).
    pub stride: usize,
    /// Vertices per edge.
    pub side: usize,
    pub positions: Vec<[f32; 3]>,
    pub indices: Vec<u32>,
}

impl LodMesh {
    /// Build level `level` from `resolution²` heights spaced `spacing` apart.
    pub fn build(level: usize, heights: &[f32], resolution: usize, spacing: f64) -> Self {
        let stride = 1usize << level;
        let side = (resolution - 1) / stride + 1;
        let mut positions = Vec::with_capacity(side * side);
        for j in 0..side {
            let iz = j * stride;
            for i in 0..side {
                let ix = i * stride;
                positions.push([
                    (ix as f64 * spacing) as f32,
                    heights[iz * resolution + ix],
                    (iz as f64 * spacing) as f32,
                ]);
            }
        }
        let quads = side.saturating_sub(1);
        let mut indices = Vec::with_capacity(quads * quads * 6);
        for j in 0..quads {
            for i in 0..quads {
                let a = (j * side + i) as u32;
                let b = a + 1;
                let c = a + side as u32;
                let d = c + 1;
                indices.extend_from_slice(&[a, c, b, b, c, d]);
            }
        }
        Self {
            level,
            stride,
            side,
            positions,
            indices,
        }
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn memory_bytes(&self) -> usize {
        self.positions.len() * std::mem::size_of::<[f32; 3]>()
            + self.indices.len() * std::mem::size_of::<u32>()
    }
}

/// Height grid used for point and collision queries.
#[derive(Debug, Clone, PartialEq)]
pub struct CollisionGrid {
    resolution: usize,
    spacing: f64,
    origin: DVec3,
    heights: Arc<[f32]>,
}

impl CollisionGrid {
    pub fn new(resolution: usize, spacing: f64, origin: DVec3, heights: Arc<[f32]>) -> Self {
        Self {
            resolution,
            spacing,
            origin,
            heights,
        }
    }

    pub fn heights(&self) -> &Arc<[f32]> {
        &self.heights
    }

    pub fn spacing(&self) -> f64 {
        self.spacing
    }

    /// Bilinear height at a world point. Points outside the grid are clamped.
    pub fn height_at(&self, x: f64, z: f64) -> f64 {
        let max = (self.resolution - 1) as f64;
        let lx = ((x - self.origin.x) / self.spacing).clamp(0.0, max);
        let lz = ((z - self.origin.z) / self.spacing).clamp(0.0, max);
        let x0 = (lx.floor() as usize).min(self.resolution - 1);
        let z0 = (lz.floor() as usize).min(self.resolution - 1);
        let x1 = (x0 + 1).min(self.resolution - 1);
        let z1 = (z0 + 1).min(self.resolution - 1);
        let tx = lx - x0 as f64;
        let tz = lz - z0 as f64;
        let at = |ix: usize, iz: usize| self.heights[iz * self.resolution + ix] as f64;
        let top = at(x0, z0) + (at(x1, z0) - at(x0, z0)) * tx;
        let bottom = at(x0, z1) + (at(x1, z1) - at(x0, z1)) * tx;
        top + (bottom - top) * tz
    }
}

/// A fully built terrain tile.
///
/// Owned by the tile cache while resident. The surface heights are the
/// coarse elevation plus the optional detail overlay; when no overlay exists
/// the surface shares the elevation array.
#[derive(Debug, Clone)]
pub struct Tile {
    coord: TileCoord,
    state: TileState,
    elevation: ElevationGrid,
    detail: Option<Arc<[f32]>>,
    surface: Arc<[f32]>,
    spacing: f64,
    biomes: BiomeGrid,
    lods: Vec<LodMesh>,
    active_lod: usize,
    collision: Option<CollisionGrid>,
    memory_bytes: usize,
    last_touched: u64,
}

impl Tile {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn assemble(
        coord: TileCoord,
        elevation: ElevationGrid,
        detail: Option<Arc<[f32]>>,
        surface: Arc<[f32]>,
        spacing: f64,
        biomes: BiomeGrid,
        lods: Vec<LodMesh>,
        collision: CollisionGrid,
    ) -> Self {
        let mut tile = Self {
            coord,
            state: TileState::Building,
            elevation,
            detail,
            surface,
            spacing,
            biomes,
            lods,
            active_lod: 0,
            collision: Some(collision),
            memory_bytes: 0,
            last_touched: 0,
        };
        tile.memory_bytes = tile.estimate_memory();
        tile
    }

    fn estimate_memory(&self) -> usize {
        let surface = if Arc::ptr_eq(&self.surface, self.elevation.heights()) {
            0
        } else {
            self.surface.len() * std::mem::size_of::<f32>()
        };
        std::mem::size_of::<Self>()
            + self.elevation.memory_bytes()
            + self.detail.as_ref().map_or(0, |d| d.len() * std::mem::size_of::<f32>())
            + surface
            + self.biomes.memory_bytes()
            + self.lods.iter().map(LodMesh::memory_bytes).sum::<usize>()
    }

    pub fn coord(&self) -> TileCoord {
        self.coord
    }

    pub fn state(&self) -> TileState {
        self.state
    }

    pub fn elevation(&self) -> &ElevationGrid {
        &self.elevation
    }

    pub fn detail(&self) -> Option<&Arc<[f32]>> {
        self.detail.as_ref()
    }

    pub fn surface(&self) -> &Arc<[f32]> {
        &self.surface
    }

    pub fn biomes(&self) -> &BiomeGrid {
        &self.biomes
    }

    pub fn lods(&self) -> &[LodMesh] {
        &self.lods
    }

    pub fn active_lod(&self) -> usize {
        self.active_lod
    }

    /// Mesh for the currently selected LOD, if resources are still held.
    pub fn active_mesh(&self) -> Option<&LodMesh> {
        self.lods.get(self.active_lod)
    }

    pub fn collision(&self) -> Option<&CollisionGrid> {
        self.collision.as_ref()
    }

    /// Whether elevation came from a fallback instead of source data.
    pub fn is_degraded(&self) -> bool {
        self.elevation.is_degraded()
    }

    /// Estimated resident cost in bytes, fixed at build time.
    pub fn memory_bytes(&self) -> usize {
        self.memory_bytes
    }

    pub fn last_touched(&self) -> u64 {
        self.last_touched
    }

    pub(crate) fn set_state(&mut self, state: TileState) {
        self.state = state;
    }

    pub(crate) fn set_last_touched(&mut self, seq: u64) {
        self.last_touched = seq;
    }

    /// Select a LOD in place. Returns whether it changed.
    pub(crate) fn set_active_lod(&mut self, level: usize) -> bool {
        let level = level.min(self.lods.len().saturating_sub(1));
        let changed = level != self.active_lod;
        self.active_lod = level;
        changed
    }

    /// Recompute biomes for a new sea level without touching elevation.
    pub fn reclassify(&mut self, classifier: &BiomeClassifier, sea_level_m: f64) {
        self.biomes = classifier.classify(
            &self.surface,
            self.elevation.resolution(),
            self.spacing,
            sea_level_m,
        );
    }

    /// Drop meshes and collision data ahead of removal.
    pub(crate) fn release(&mut self) {
        self.state = TileState::Evicting;
        self.lods.clear();
        self.collision = None;
    }

    #[cfg(test)]
    pub(crate) fn stub(coord: TileCoord, memory_bytes: usize) -> Self {
        let elevation = ElevationGrid::new(2, vec![0.0f32; 4]);
        let surface = elevation.heights().clone();
        let biomes = BiomeClassifier::default().classify(&surface, 2, 1.0, -1.0);
        let collision = CollisionGrid::new(2, 1.0, DVec3::ZERO, surface.clone());
        let mut tile = Self::assemble(
            coord,
            elevation,
            None,
            surface,
            1.0,
            biomes,
            Vec::new(),
            collision,
        );
        tile.memory_bytes = memory_bytes;
        tile
    }

    /// Resident-ready tile over explicit heights, placed at its world origin.
    #[cfg(test)]
    pub(crate) fn from_heights(
        coord: TileCoord,
        mapper: &terrastream_common::CoordinateMapper,
        resolution: usize,
        heights: Vec<f32>,
    ) -> Self {
        let spacing = mapper.tile_size() / (resolution - 1) as f64;
        let elevation = ElevationGrid::new(resolution, heights);
        let surface = elevation.heights().clone();
        let biomes = BiomeClassifier::default().classify(&surface, resolution, spacing, 0.0);
        let lods = vec![LodMesh::build(0, &surface, resolution, spacing)];
        let collision =
            CollisionGrid::new(resolution, spacing, mapper.tile_origin(coord), surface.clone());
        Self::assemble(coord, elevation, None, surface, spacing, biomes, lods, collision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> LodPolicy {
        LodPolicy {
            levels: 4,
            base_distance: 500.0,
            multiplier: 2.0,
        }
    }

    #[test]
    fn lod_thresholds() {
        let p = policy();
        assert_eq!(p.select(0.0, 0), 0);
        assert_eq!(p.select(499.9, 0), 0);
        assert_eq!(p.select(500.0, 0), 1);
        assert_eq!(p.select(1999.0, 0), 2);
        assert_eq!(p.select(2000.0, 0), 3);
        assert_eq!(p.select(1.0e9, 0), 3);
    }

    #[test]
    fn lod_monotonic_without_gaps() {
        let p = policy();
        let mut prev = 0;
        let mut d = 0.0;
        while d < 10_000.0 {
            let lod = p.select(d, 0);
            assert!(lod >= prev, "lod decreased at {d}");
            assert!(lod - prev <= 1, "lod skipped a level at {d}");
            prev = lod;
            d += 7.5;
        }
        assert_eq!(prev, p.coarsest());
    }

    #[test]
    fn bias_is_clamped_to_coarsest() {
        let p = policy();
        assert_eq!(p.select(0.0, 1), 1);
        assert_eq!(p.select(2500.0, 1), 3);
        assert_eq!(p.select(0.0, 10), 3);
    }

    #[test]
    fn single_level_policy() {
        let p = LodPolicy {
            levels: 1,
            base_distance: 10.0,
            multiplier: 2.0,
        };
        assert_eq!(p.select(1.0e6, 2), 0);
    }

    #[test]
    fn lod_mesh_decimates_by_power_of_two() {
        let heights: Vec<f32> = (0..81).map(|i| i as f32).collect();
        let l0 = LodMesh::build(0, &heights, 9, 2.0);
        let l2 = LodMesh::build(2, &heights, 9, 2.0);
        assert_eq!(l0.side, 9);
        assert_eq!(l0.triangle_count(), 8 * 8 * 2);
        assert_eq!(l2.side, 3);
        assert_eq!(l2.stride, 4);
        assert_eq!(l2.triangle_count(), 2 * 2 * 2);
        // Corner vertices keep their positions across levels.
        assert_eq!(l0.positions[80], l2.positions[8]);
        assert_eq!(l2.positions[1], [8.0, 4.0, 0.0]);
        assert!(l2.memory_bytes() < l0.memory_bytes());
    }

    #[test]
    fn collision_grid_bilinear() {
        let heights: Arc<[f32]> = vec![0.0, 10.0, 0.0, 10.0].into();
        let grid = CollisionGrid::new(2, 100.0, DVec3::new(200.0, 0.0, 200.0), heights);
        assert!((grid.height_at(250.0, 250.0) - 5.0).abs() < 1e-9);
        assert!((grid.height_at(300.0, 210.0) - 10.0).abs() < 1e-9);
        assert_eq!(grid.height_at(-1.0e6, 0.0), 0.0);
    }

    #[test]
    fn release_drops_resources() {
        let mut tile = Tile::stub(TileCoord::new(1, 2), 64);
        assert!(tile.collision().is_some());
        tile.release();
        assert_eq!(tile.state(), TileState::Evicting);
        assert!(tile.collision().is_none());
        assert!(tile.active_mesh().is_none());
    }
}
