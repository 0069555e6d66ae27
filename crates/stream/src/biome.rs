use serde::{Deserialize, Serialize};

/// Surface category of one grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Biome {
    DeepWater,
    ShallowWater,
    Beach,
    Land,
    Highland,
}

impl Biome {
    pub fn is_water(self) -> bool {
        matches!(self, Biome::DeepWater | Biome::ShallowWater)
    }
}

/// Thresholds relative to the current sea level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BiomeConfig {
    /// Depth below sea level where shallow water becomes deep water, meters.
    pub deep_threshold_m: f64,
    /// Height of the beach band above sea level, meters.
    pub beach_band_m: f64,
    /// Gradient magnitude (rise over run) at which land becomes highland.
    pub highland_slope: f64,
}

impl Default for BiomeConfig {
    fn default() -> Self {
        Self {
            deep_threshold_m: 200.0,
            beach_band_m: 8.0,
            highland_slope: 0.5,
        }
    }
}

/// Per-cell biome categories for one tile, row-major along Z.
#[derive(Debug, Clone, PartialEq)]
pub struct BiomeGrid {
    resolution: usize,
    cells: Vec<Biome>,
}

impl BiomeGrid {
    pub fn resolution(&self) -> usize {
        self.resolution
    }

    pub fn cells(&self) -> &[Biome] {
        &self.cells
    }

    pub fn get(&self, ix: usize, iz: usize) -> Biome {
        self.cells[iz * self.resolution + ix]
    }

    /// Number of cells of the given category.
    pub fn count(&self, biome: Biome) -> usize {
        self.cells.iter().filter(|b| **b == biome).count()
    }

    pub fn memory_bytes(&self) -> usize {
        self.cells.len() * std::mem::size_of::<Biome>()
    }
}

/// Classifies elevation samples into biomes against a sea level.
///
/// Stateless apart from its thresholds: the same heights can be reclassified
/// with a different sea level at any time.
#[derive(Debug, Clone, Default)]
pub struct BiomeClassifier {
    config: BiomeConfig,
}

impl BiomeClassifier {
    pub fn new(config: BiomeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BiomeConfig {
        &self.config
    }

    /// Classify `resolution²` heights spaced `spacing` world units apart.
    pub fn classify(
        &self,
        heights: &[f32],
        resolution: usize,
        spacing: f64,
        sea_level_m: f64,
    ) -> BiomeGrid {
        let deep = sea_level_m - self.config.deep_threshold_m;
        let beach_top = sea_level_m + self.config.beach_band_m;
        let mut cells = Vec::with_capacity(heights.len());
        for iz in 0..resolution {
            for ix in 0..resolution {
                let h = heights[iz * resolution + ix] as f64;
                let biome = if h < deep {
                    Biome::DeepWater
                } else if h < sea_level_m {
                    Biome::ShallowWater
                } else if h < beach_top {
                    Biome::Beach
                } else if slope(heights, resolution, spacing, ix, iz) >= self.config.highland_slope {
                    Biome::Highland
                } else {
                    Biome::Land
                };
                cells.push(biome);
            }
        }
        BiomeGrid { resolution, cells }
    }
}

/// Gradient magnitude by central differences, one-sided at the edges.
fn slope(heights: &[f32], resolution: usize, spacing: f64, ix: usize, iz: usize) -> f64 {
    if resolution < 2 || spacing <= 0.0 {
        return 0.0;
    }
    let at = |x: usize, z: usize| heights[z * resolution + x] as f64;
    let (x0, x1) = (ix.saturating_sub(1), (ix + 1).min(resolution - 1));
    let (z0, z1) = (iz.saturating_sub(1), (iz + 1).min(resolution - 1));
    let dx = (at(x1, iz) - at(x0, iz)) / ((x1 - x0) as f64 * spacing);
    let dz = (at(ix, z1) - at(ix, z0)) / ((z1 - z0) as f64 * spacing);
    (dx * dx + dz * dz).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> BiomeClassifier {
        BiomeClassifier::new(BiomeConfig {
            deep_threshold_m: 100.0,
            beach_band_m: 5.0,
            highland_slope: 0.5,
        })
    }

    #[test]
    fn bands_relative_to_sea_level() {
        let c = classifier();
        let heights = [-500.0, -50.0, 2.0, 40.0];
        // 2x2 with huge spacing so slope never matters.
        let grid = c.classify(&heights, 2, 1.0e9, 0.0);
        assert_eq!(grid.get(0, 0), Biome::DeepWater);
        assert_eq!(grid.get(1, 0), Biome::ShallowWater);
        assert_eq!(grid.get(0, 1), Biome::Beach);
        assert_eq!(grid.get(1, 1), Biome::Land);
    }

    #[test]
    fn steep_land_is_highland() {
        let c = classifier();
        // Rises 10 m per 1 m step along X.
        let heights: Vec<f32> = (0..9).map(|i| 100.0 + (i % 3) as f32 * 10.0).collect();
        let grid = c.classify(&heights, 3, 1.0, 0.0);
        assert_eq!(grid.count(Biome::Highland), 9);

        let flat = vec![100.0f32; 9];
        let grid = c.classify(&flat, 3, 1.0, 0.0);
        assert_eq!(grid.count(Biome::Land), 9);
    }

    #[test]
    fn reclassify_with_new_sea_level() {
        let c = classifier();
        let heights = vec![50.0f32; 4];
        let dry = c.classify(&heights, 2, 10.0, 0.0);
        let wet = c.classify(&heights, 2, 10.0, 60.0);
        let drowned = c.classify(&heights, 2, 10.0, 500.0);
        assert_eq!(dry.count(Biome::Land), 4);
        assert_eq!(wet.count(Biome::ShallowWater), 4);
        assert_eq!(drowned.count(Biome::DeepWater), 4);
        assert!(drowned.get(0, 0).is_water());
    }
}
