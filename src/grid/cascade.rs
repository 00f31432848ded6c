//! Occupancy grid data structure and queries

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::core::{Error, Result, UVec3, Vec3};
use crate::math::hash;
use crate::math::morton::{decode_morton_3d, encode_morton_3d, MAX_MORTON_AXIS};
use crate::math::Aabb;
use super::bits::{LevelMask, MAX_CASCADES};

/// Hash stream used for the explore/exploit selection coin
const SELECTION_STREAM: u32 = 0;
/// First of three hash streams used for per-axis sample jitter
const JITTER_STREAM: u32 = 1;

/// Geometry of a cascaded occupancy grid
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Number of cascade levels (1..=8)
    pub levels: u32,
    /// Voxels per axis at every level. Power of two, 2..=1024.
    pub resolution: u32,
    /// Half-width of the level 0 cube
    pub base_half_width: f32,
    /// Scene center shared by all cascades
    pub center: [f32; 3],
    /// Seed for selection and jitter hashes
    pub seed: u32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            levels: 4,
            resolution: 128,
            base_half_width: 0.5,
            center: [0.0; 3],
            seed: 1337,
        }
    }
}

impl GridConfig {
    /// Check the configuration describes a grid that can be built
    pub fn validate(&self) -> Result<()> {
        if self.levels == 0 || self.levels > MAX_CASCADES {
            return Err(Error::Launch(format!(
                "grid needs 1..={} cascade levels, got {}",
                MAX_CASCADES, self.levels
            )));
        }
        if !self.resolution.is_power_of_two() || self.resolution < 2 || self.resolution > MAX_MORTON_AXIS {
            return Err(Error::Launch(format!(
                "grid resolution must be a power of two in 2..={}, got {}",
                MAX_MORTON_AXIS, self.resolution
            )));
        }
        if !(self.base_half_width.is_finite() && self.base_half_width > 0.0) {
            return Err(Error::Launch(format!(
                "base half-width must be positive and finite, got {}",
                self.base_half_width
            )));
        }
        Ok(())
    }

    /// Voxels in a single cascade level
    pub fn voxels_per_level(&self) -> usize {
        (self.resolution as usize).pow(3)
    }
}

/// A density observation for one voxel of one level
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct VoxelSample {
    /// Morton index of the voxel
    pub index: u32,
    pub density: f32,
}

/// Occupancy summary of one cascade level
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LevelStats {
    pub occupied: usize,
    pub mean_density: f32,
    pub max_density: f32,
}

/// Occupancy summary of a whole grid
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GridStats {
    pub levels: Vec<LevelStats>,
}

impl GridStats {
    /// Fraction of all (level, voxel) cells marked occupied
    pub fn occupied_fraction(&self, voxels_per_level: usize) -> f32 {
        let occupied: usize = self.levels.iter().map(|l| l.occupied).sum();
        let total = voxels_per_level * self.levels.len();
        if total == 0 { 0.0 } else { occupied as f32 / total as f32 }
    }
}

/// Multi-resolution occupancy grid over a fixed scene volume
#[derive(Clone, Debug)]
pub struct OccupancyGrid {
    config: GridConfig,
    center: Vec3,
    voxels_per_level: usize,
    /// `levels * R^3` densities, level-major then Morton order
    density: Vec<f32>,
    /// `R^3` masks in Morton order
    bits: Vec<LevelMask>,
}

impl OccupancyGrid {
    /// Allocate a grid with zero density and no occupied voxels
    pub fn new(config: GridConfig) -> Result<Self> {
        Self::with_initial_density(config, 0.0)
    }

    /// Allocate a grid with every voxel at `density`. Occupancy bits start
    /// cleared; call [`rebuild_bits`](Self::rebuild_bits) to derive them.
    pub fn with_initial_density(config: GridConfig, density: f32) -> Result<Self> {
        config.validate()?;
        let voxels_per_level = config.voxels_per_level();
        let density_len = voxels_per_level * config.levels as usize;

        let mut density_buf = Vec::new();
        density_buf.try_reserve_exact(density_len).map_err(|_| Error::Allocation {
            what: "occupancy density grid",
            requested: density_len * std::mem::size_of::<f32>(),
        })?;
        density_buf.resize(density_len, density.max(0.0));

        let mut bits = Vec::new();
        bits.try_reserve_exact(voxels_per_level).map_err(|_| Error::Allocation {
            what: "occupancy bits",
            requested: voxels_per_level,
        })?;
        bits.resize(voxels_per_level, LevelMask::EMPTY);

        log::info!(
            "Created occupancy grid: {} levels x {}^3 voxels, base half-width {}",
            config.levels, config.resolution, config.base_half_width
        );

        Ok(Self {
            center: Vec3::from_array(config.center),
            config,
            voxels_per_level,
            density: density_buf,
            bits,
        })
    }

    /// Rebuild a grid from raw arrays in storage layout
    pub(crate) fn from_parts(config: GridConfig, density: Vec<f32>, bits: Vec<LevelMask>) -> Result<Self> {
        config.validate()?;
        let voxels_per_level = config.voxels_per_level();
        if density.len() != voxels_per_level * config.levels as usize || bits.len() != voxels_per_level {
            return Err(Error::Snapshot(format!(
                "array sizes {}/{} do not match {} levels of {}^3 voxels",
                density.len(), bits.len(), config.levels, config.resolution
            )));
        }
        Ok(Self {
            center: Vec3::from_array(config.center),
            config,
            voxels_per_level,
            density,
            bits,
        })
    }

    // --- Geometry ---

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    pub fn levels(&self) -> u32 {
        self.config.levels
    }

    /// Voxels per axis
    pub fn resolution(&self) -> u32 {
        self.config.resolution
    }

    /// Voxels per level
    pub fn voxel_count(&self) -> usize {
        self.voxels_per_level
    }

    pub fn center(&self) -> Vec3 {
        self.center
    }

    /// Half-width of the cube covered by `level`: `base_half_width * 2^level`
    pub fn level_half_width(&self, level: u32) -> f32 {
        self.config.base_half_width * (1u32 << level) as f32
    }

    /// Edge length of one voxel at `level`
    pub fn voxel_size(&self, level: u32) -> f32 {
        2.0 * self.level_half_width(level) / self.config.resolution as f32
    }

    /// Cube covered by `level`
    pub fn level_bounds(&self, level: u32) -> Aabb {
        Aabb::cube(self.center, self.level_half_width(level))
    }

    /// Cube covered by the outermost level
    pub fn scene_bounds(&self) -> Aabb {
        self.level_bounds(self.config.levels - 1)
    }

    /// Morton index of voxel coordinates in `[0, R)^3`
    pub fn voxel_index_from_coordinates(&self, coords: UVec3) -> u32 {
        debug_assert!(coords.max_element() < self.config.resolution);
        encode_morton_3d(coords.x, coords.y, coords.z)
    }

    /// Voxel coordinates of a Morton index
    pub fn coordinates_from_voxel_index(&self, index: u32) -> UVec3 {
        let (x, y, z) = decode_morton_3d(index);
        UVec3::new(x, y, z)
    }

    /// Finest level whose cube contains `p`, or `None` outside the grid
    pub fn level_for_position(&self, p: Vec3) -> Option<u32> {
        let extent = (p - self.center).abs().max_element();
        (0..self.config.levels).find(|&level| extent <= self.level_half_width(level))
    }

    /// Morton index of the voxel of `level` containing `p`. Points outside
    /// the level cube are clamped onto its boundary voxels.
    pub fn voxel_at(&self, level: u32, p: Vec3) -> u32 {
        let half_width = self.level_half_width(level);
        let r = self.config.resolution as f32;
        let local = (p - self.center + Vec3::splat(half_width)) / (2.0 * half_width) * r;
        let coords = local.floor().clamp(Vec3::ZERO, Vec3::splat(r - 1.0)).as_uvec3();
        self.voxel_index_from_coordinates(coords)
    }

    /// Bounds of one voxel
    pub fn voxel_bounds(&self, level: u32, index: u32) -> Aabb {
        let size = self.voxel_size(level);
        let min = self.level_bounds(level).min + self.coordinates_from_voxel_index(index).as_vec3() * size;
        Aabb::new(min, min + Vec3::splat(size))
    }

    pub fn voxel_center(&self, level: u32, index: u32) -> Vec3 {
        self.voxel_bounds(level, index).center()
    }

    /// Uniformly jittered position inside a voxel, reproducible per cycle
    pub fn jittered_position(&self, level: u32, index: u32, cycle: u32) -> Vec3 {
        let seed = self.config.seed;
        let jitter = Vec3::new(
            hash::uniform(seed, level, index, cycle, JITTER_STREAM),
            hash::uniform(seed, level, index, cycle, JITTER_STREAM + 1),
            hash::uniform(seed, level, index, cycle, JITTER_STREAM + 2),
        );
        let size = self.voxel_size(level);
        self.level_bounds(level).min + (self.coordinates_from_voxel_index(index).as_vec3() + jitter) * size
    }

    // --- Occupancy queries ---

    /// Whether voxel `index` is occupied at `level`.
    ///
    /// # Panics
    /// If `index` is outside the grid or `level >= 8`.
    #[inline]
    pub fn is_occupied_at(&self, level: u32, index: u32) -> bool {
        self.bits[index as usize].get(level)
    }

    /// Force an occupancy bit. Other levels of the voxel are untouched.
    pub fn set_occupied(&mut self, level: u32, index: u32, occupied: bool) -> Result<()> {
        self.check(level, index)?;
        self.bits[index as usize].set(level, occupied);
        Ok(())
    }

    pub fn density_at(&self, level: u32, index: u32) -> f32 {
        self.density[self.offset(level) + index as usize]
    }

    /// Densities of one level in Morton order
    pub fn level_densities(&self, level: u32) -> &[f32] {
        let start = self.offset(level);
        &self.density[start..start + self.voxels_per_level]
    }

    /// All densities, level-major
    pub fn densities(&self) -> &[f32] {
        &self.density
    }

    /// All occupancy masks in Morton order
    pub fn bits(&self) -> &[LevelMask] {
        &self.bits
    }

    // --- Maintenance ---

    /// Scale every density of every level by `factor`
    pub fn decay(&mut self, factor: f32) -> Result<()> {
        if !(factor.is_finite() && factor >= 0.0) {
            return Err(Error::Launch(format!("decay factor must be finite and >= 0, got {}", factor)));
        }
        if factor > 1.0 {
            log::warn!("Decay factor {} grows densities", factor);
        }
        self.density.par_iter_mut().for_each(|d| *d *= factor);
        Ok(())
    }

    /// Explore/exploit rule deciding whether a sample of voxel `index` at
    /// `level` may update the grid during `cycle`.
    ///
    /// A sample is taken with probability `selection_threshold` regardless
    /// of occupancy, and always when the voxel is already occupied.
    pub fn is_selected(&self, level: u32, index: u32, selection_threshold: f32, cycle: u32) -> bool {
        self.is_occupied_at(level, index)
            || hash::uniform(self.config.seed, level, index, cycle, SELECTION_STREAM) < selection_threshold
    }

    /// Max-update voxel densities of `level` from `samples` that pass the
    /// selection rule. Returns the number of samples applied.
    pub fn sample_and_update(
        &mut self,
        level: u32,
        selection_threshold: f32,
        cycle: u32,
        samples: &[VoxelSample],
    ) -> Result<usize> {
        self.check_level(level)?;
        if let Some(bad) = samples.iter().find(|s| s.index as usize >= self.voxels_per_level) {
            return Err(Error::Launch(format!(
                "sample voxel {} outside {}^3 grid",
                bad.index, self.config.resolution
            )));
        }

        let selected: Vec<VoxelSample> = samples
            .par_iter()
            .filter(|s| self.is_selected(level, s.index, selection_threshold, cycle))
            .copied()
            .collect();

        // max is order independent, so duplicates may arrive in any order
        let start = self.offset(level);
        let densities = &mut self.density[start..start + self.voxels_per_level];
        for sample in &selected {
            let cell = &mut densities[sample.index as usize];
            *cell = cell.max(sample.density);
        }

        log::debug!(
            "Level {}: applied {} of {} samples",
            level, selected.len(), samples.len()
        );
        Ok(selected.len())
    }

    /// Set bit `l` of every voxel to `density > threshold` for every level
    /// of the grid. Bits above the last level are left alone.
    pub fn rebuild_bits(&mut self, threshold: f32) {
        let levels = self.config.levels;
        let voxels = self.voxels_per_level;
        let density = &self.density;
        self.bits.par_iter_mut().enumerate().for_each(|(index, mask)| {
            for level in 0..levels {
                mask.set(level, density[level as usize * voxels + index] > threshold);
            }
        });
    }

    /// [`rebuild_bits`](Self::rebuild_bits) restricted to one level
    pub fn rebuild_level_bits(&mut self, level: u32, threshold: f32) -> Result<()> {
        self.check_level(level)?;
        let start = self.offset(level);
        let density = &self.density[start..start + self.voxels_per_level];
        self.bits
            .par_iter_mut()
            .zip(density.par_iter())
            .for_each(|(mask, &d)| mask.set(level, d > threshold));
        Ok(())
    }

    /// Per-level occupancy and density summary
    pub fn stats(&self) -> GridStats {
        let levels = (0..self.config.levels)
            .map(|level| {
                let densities = self.level_densities(level);
                let occupied = self.bits.par_iter().filter(|m| m.get(level)).count();
                let sum: f64 = densities.par_iter().map(|&d| d as f64).sum();
                let max_density = densities.par_iter().copied().reduce(|| 0.0, f32::max);
                LevelStats {
                    occupied,
                    mean_density: (sum / self.voxels_per_level as f64) as f32,
                    max_density,
                }
            })
            .collect();
        GridStats { levels }
    }

    fn offset(&self, level: u32) -> usize {
        level as usize * self.voxels_per_level
    }

    fn check_level(&self, level: u32) -> Result<()> {
        if level >= self.config.levels {
            return Err(Error::Launch(format!(
                "cascade level {} outside grid of {} levels",
                level, self.config.levels
            )));
        }
        Ok(())
    }

    fn check(&self, level: u32, index: u32) -> Result<()> {
        self.check_level(level)?;
        if index as usize >= self.voxels_per_level {
            return Err(Error::Launch(format!("voxel {} outside {}^3 grid", index, self.config.resolution)));
        }
        Ok(())
    }
}
