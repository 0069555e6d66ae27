use noise::{Fbm, MultiFractal, NoiseFn, Perlin};
use serde::{Deserialize, Serialize};

use crate::error::ElevationError;

/// Deepest point of the ocean floor, in meters.
pub const MARIANA_DEPTH_M: f64 = -10994.0;
/// Highest summit, in meters.
pub const EVEREST_HEIGHT_M: f64 = 8849.0;

/// Maps normalized heightfield values onto real-world meters.
///
/// `0.0` maps to `min_m` and `1.0` to `max_m`. Sea level is expressed on the
/// same normalized axis by callers that receive it as a datum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VerticalScale {
    pub min_m: f64,
    pub max_m: f64,
}

impl Default for VerticalScale {
    fn default() -> Self {
        Self {
            min_m: MARIANA_DEPTH_M,
            max_m: EVEREST_HEIGHT_M,
        }
    }
}

impl VerticalScale {
    pub fn new(min_m: f64, max_m: f64) -> Self {
        Self { min_m, max_m }
    }

    pub fn range(&self) -> f64 {
        self.max_m - self.min_m
    }

    /// Convert a normalized value to meters.
    pub fn to_meters(&self, normalized: f64) -> f64 {
        self.min_m + normalized * self.range()
    }

    /// Convert meters back to the normalized axis.
    pub fn to_normalized(&self, meters: f64) -> f64 {
        let range = self.range();
        if range.abs() < f64::EPSILON {
            return 0.0;
        }
        (meters - self.min_m) / range
    }

    /// Normalized value of the zero-meter datum (≈0.554 for the default scale).
    pub fn zero_datum(&self) -> f64 {
        self.to_normalized(0.0)
    }
}

/// Coarse global heightfield stored as normalized samples, row-major.
///
/// Rows run along world Z and columns along world X.
#[derive(Debug, Clone, PartialEq)]
pub struct Heightfield {
    width: usize,
    height: usize,
    samples: Vec<f32>,
}

impl Heightfield {
    /// Wrap normalized samples. Fails when the sample count does not match.
    pub fn from_samples(
        width: usize,
        height: usize,
        samples: Vec<f32>,
    ) -> Result<Self, ElevationError> {
        if width < 2 || height < 2 {
            return Err(ElevationError::TooSmall { width, height });
        }
        if samples.len() != width * height {
            return Err(ElevationError::DimensionMismatch {
                width,
                height,
                actual: samples.len(),
            });
        }
        Ok(Self {
            width,
            height,
            samples,
        })
    }

    /// Build from 16-bit samples spanning the full normalized range.
    pub fn from_u16(width: usize, height: usize, raw: &[u16]) -> Result<Self, ElevationError> {
        let samples = raw.iter().map(|&v| v as f32 / u16::MAX as f32).collect();
        Self::from_samples(width, height, samples)
    }

    /// Constant field.
    pub fn flat(width: usize, height: usize, value: f32) -> Result<Self, ElevationError> {
        Self::from_samples(width, height, vec![value; width * height])
    }

    /// Build by evaluating `f(x, y)` for every sample.
    pub fn from_fn(
        width: usize,
        height: usize,
        mut f: impl FnMut(usize, usize) -> f32,
    ) -> Result<Self, ElevationError> {
        let mut samples = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                samples.push(f(x, y));
            }
        }
        Self::from_samples(width, height, samples)
    }

    /// Seeded fractal continent field, normalized to `[0, 1]`.
    ///
    /// Stand-in for a real elevation map when baking demo tilesets.
    pub fn synthetic(width: usize, height: usize, seed: u32) -> Result<Self, ElevationError> {
        let fbm = Fbm::<Perlin>::new(seed)
            .set_octaves(6)
            .set_persistence(0.5)
            .set_lacunarity(2.0);
        let scale = 4.0 / width.max(height) as f64;
        let mut field = Self::from_fn(width, height, |x, y| {
            fbm.get([x as f64 * scale, y as f64 * scale]) as f32
        })?;
        field.normalize();
        Ok(field)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Sample at integer pixel coordinates, clamped to the field.
    pub fn get(&self, x: usize, y: usize) -> f32 {
        let x = x.min(self.width - 1);
        let y = y.min(self.height - 1);
        self.samples[y * self.width + x]
    }

    /// Bilinear sample at fractional pixel coordinates, clamped to the field.
    pub fn sample_bilinear(&self, px: f64, py: f64) -> f32 {
        let px = px.clamp(0.0, (self.width - 1) as f64);
        let py = py.clamp(0.0, (self.height - 1) as f64);
        let x0 = px.floor() as usize;
        let y0 = py.floor() as usize;
        let tx = (px - x0 as f64) as f32;
        let ty = (py - y0 as f64) as f32;
        let a = self.get(x0, y0);
        let b = self.get(x0 + 1, y0);
        let c = self.get(x0, y0 + 1);
        let d = self.get(x0 + 1, y0 + 1);
        let top = a + (b - a) * tx;
        let bottom = c + (d - c) * tx;
        top + (bottom - top) * ty
    }

    /// Smallest and largest finite sample.
    pub fn min_max(&self) -> (f32, f32) {
        self.samples
            .iter()
            .filter(|v| v.is_finite())
            .fold((f32::MAX, f32::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)))
    }

    /// Stretch samples to span `[0, 1]`.
    pub fn normalize(&mut self) {
        let (lo, hi) = self.min_max();
        let range = if hi > lo { hi - lo } else { 1.0 };
        for v in &mut self.samples {
            *v = (*v - lo) / range;
        }
    }

    /// Copy a row-major block into the field at `(x0, y0)`.
    pub(crate) fn blit(&mut self, x0: usize, y0: usize, w: usize, block: &[f32]) {
        for (row, chunk) in block.chunks(w).enumerate() {
            let start = (y0 + row) * self.width + x0;
            self.samples[start..start + chunk.len()].copy_from_slice(chunk);
        }
    }
}
