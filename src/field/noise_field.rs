//! Fractal noise density, a cloud-like test scene

use noise::{Fbm, MultiFractal, NoiseFn, Perlin};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::core::{Result, Vec3};
use crate::grid::DensitySampler;
use crate::grid::maintenance::check_batch;

/// Parameters of a [`NoiseField`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseParams {
    pub seed: u32,
    /// Spatial frequency of the base octave
    pub frequency: f32,
    pub octaves: u32,
    /// Noise value below which the field is empty
    pub threshold: f32,
    /// Density per unit of noise above the threshold
    pub gain: f32,
    /// Radius of the sphere the field is confined to
    pub radius: f32,
}

impl Default for NoiseParams {
    fn default() -> Self {
        Self {
            seed: 12345,
            frequency: 2.0,
            octaves: 4,
            threshold: 0.1,
            gain: 40.0,
            radius: 0.8,
        }
    }
}

/// fBm Perlin noise, thresholded and confined to a sphere at the origin
pub struct NoiseField {
    params: NoiseParams,
    noise: Fbm<Perlin>,
}

impl NoiseField {
    pub fn new(params: NoiseParams) -> Self {
        let noise = Fbm::<Perlin>::new(params.seed)
            .set_octaves(params.octaves as usize)
            .set_persistence(0.5)
            .set_lacunarity(2.0);
        Self { params, noise }
    }

    pub fn params(&self) -> &NoiseParams {
        &self.params
    }

    /// Density at `p`, never negative
    pub fn density_at(&self, p: Vec3) -> f32 {
        if p.length() > self.params.radius {
            return 0.0;
        }
        let q = p * self.params.frequency;
        let value = self.noise.get([q.x as f64, q.y as f64, q.z as f64]) as f32;
        ((value - self.params.threshold) * self.params.gain).max(0.0)
    }
}

impl DensitySampler for NoiseField {
    fn sample_density(&self, positions: &[Vec3], densities: &mut [f32]) -> Result<()> {
        check_batch(positions, densities)?;
        positions
            .par_iter()
            .zip(densities.par_iter_mut())
            .for_each(|(&p, d)| *d = self.density_at(p));
        Ok(())
    }
}
