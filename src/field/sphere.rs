//! Analytic sphere density

use rayon::prelude::*;

use crate::core::{Result, Vec3};
use crate::grid::DensitySampler;
use crate::grid::maintenance::check_batch;

/// Constant density inside a sphere, zero outside
#[derive(Clone, Copy, Debug)]
pub struct SphereField {
    pub center: Vec3,
    pub radius: f32,
    pub density: f32,
}

impl SphereField {
    pub fn new(center: Vec3, radius: f32, density: f32) -> Self {
        Self { center, radius, density }
    }

    pub fn density_at(&self, p: Vec3) -> f32 {
        if p.distance_squared(self.center) <= self.radius * self.radius {
            self.density
        } else {
            0.0
        }
    }
}

impl DensitySampler for SphereField {
    fn sample_density(&self, positions: &[Vec3], densities: &mut [f32]) -> Result<()> {
        check_batch(positions, densities)?;
        positions
            .par_iter()
            .zip(densities.par_iter_mut())
            .for_each(|(&p, d)| *d = self.density_at(p));
        Ok(())
    }
}
