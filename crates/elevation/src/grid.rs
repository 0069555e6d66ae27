use std::sync::Arc;

/// Square grid of heights in meters covering one tile, row-major along Z.
///
/// The sample array is shared: cloning a grid, or deriving biome and
/// collision data from it, never copies the heights.
#[derive(Debug, Clone, PartialEq)]
pub struct ElevationGrid {
    resolution: usize,
    heights: Arc<[f32]>,
    degraded: bool,
}

impl ElevationGrid {
    /// Wrap heights sampled at `resolution × resolution` vertices.
    pub fn new(resolution: usize, heights: impl Into<Arc<[f32]>>) -> Self {
        let heights = heights.into();
        debug_assert_eq!(heights.len(), resolution * resolution);
        Self {
            resolution,
            heights,
            degraded: false,
        }
    }

    /// Constant grid at `height`, flagged as degraded quality.
    pub fn flat(resolution: usize, height: f64) -> Self {
        Self {
            resolution,
            heights: vec![height as f32; resolution * resolution].into(),
            degraded: true,
        }
    }

    pub fn resolution(&self) -> usize {
        self.resolution
    }

    /// Shared height samples.
    pub fn heights(&self) -> &Arc<[f32]> {
        &self.heights
    }

    /// Whether this grid is a fallback rather than real source data.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn get(&self, ix: usize, iz: usize) -> f32 {
        self.heights[iz * self.resolution + ix]
    }

    /// Index of the first non-finite sample, if any.
    pub fn first_non_finite(&self) -> Option<usize> {
        self.heights.iter().position(|h| !h.is_finite())
    }

    pub fn memory_bytes(&self) -> usize {
        self.heights.len() * std::mem::size_of::<f32>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_grid_is_degraded() {
        let g = ElevationGrid::flat(5, 12.0);
        assert!(g.is_degraded());
        assert_eq!(g.get(4, 4), 12.0);
        assert_eq!(g.memory_bytes(), 25 * 4);
    }

    #[test]
    fn clone_shares_heights() {
        let g = ElevationGrid::new(2, vec![1.0, 2.0, 3.0, 4.0]);
        let h = g.clone();
        assert!(Arc::ptr_eq(g.heights(), h.heights()));
        assert_eq!(g.get(1, 1), 4.0);
        assert!(!g.is_degraded());
    }

    #[test]
    fn finds_non_finite_sample() {
        let g = ElevationGrid::new(2, vec![1.0, f32::NAN, 3.0, 4.0]);
        assert_eq!(g.first_non_finite(), Some(1));
    }
}
