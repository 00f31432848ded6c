//! Periodic occupancy grid refresh
//!
//! One maintenance cycle is: decay, jittered candidate positions per voxel,
//! explore/exploit selection (compacted so only selected positions reach
//! the density sampler), density evaluation, max-update, bit rebuild.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::compact::StreamCompactor;
use crate::core::{Arena, Error, Result, Vec3};
use super::cascade::{OccupancyGrid, VoxelSample};

/// Source of density values for arbitrary scene positions.
///
/// This is the boundary to the density network: the grid only ever sees
/// positions going in and one density per position coming out. Errors are
/// propagated to the caller unchanged.
pub trait DensitySampler: Sync {
    /// Write one density per position into `densities` (same length).
    fn sample_density(&self, positions: &[Vec3], densities: &mut [f32]) -> Result<()>;
}

/// Reject a sampler batch whose output does not match its positions
pub(crate) fn check_batch(positions: &[Vec3], densities: &[f32]) -> Result<()> {
    if positions.len() != densities.len() {
        return Err(Error::Sampler(format!(
            "{} positions but room for {} densities",
            positions.len(),
            densities.len()
        )));
    }
    Ok(())
}

impl<F> DensitySampler for F
where
    F: Fn(Vec3) -> f32 + Sync,
{
    fn sample_density(&self, positions: &[Vec3], densities: &mut [f32]) -> Result<()> {
        check_batch(positions, densities)?;
        positions
            .par_iter()
            .zip(densities.par_iter_mut())
            .for_each(|(&p, d)| *d = self(p));
        Ok(())
    }
}

/// Parameters of the maintenance cycle
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Density multiplier applied at the start of every cycle
    pub decay_factor: f32,
    /// Density above which a voxel counts as occupied
    pub occupancy_threshold: f32,
    /// Probability that an unoccupied voxel is sampled anyway
    pub selection_threshold: f32,
    /// Cycles during which every voxel is sampled
    pub warmup_cycles: u32,
    /// Levels refreshed per cycle, round-robin. `None` refreshes all.
    pub levels_per_cycle: Option<u32>,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            decay_factor: 0.95,
            occupancy_threshold: 0.01,
            selection_threshold: 0.125,
            warmup_cycles: 16,
            levels_per_cycle: None,
        }
    }
}

/// Outcome of one maintenance cycle
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CycleReport {
    pub cycle: u32,
    pub levels_updated: Vec<u32>,
    /// Candidate positions generated (one per voxel per level)
    pub candidates: usize,
    /// Positions sent to the density sampler
    pub evaluated: usize,
    /// Samples that updated the grid
    pub applied: usize,
}

/// A jittered sample position tagged with its voxel
#[derive(Clone, Copy, Debug, Default)]
struct Candidate {
    index: u32,
    position: Vec3,
}

/// Drives maintenance cycles against an [`OccupancyGrid`]
pub struct GridMaintainer {
    config: MaintenanceConfig,
    cycle: u32,
    compactor: StreamCompactor,
    candidates: Arena<Candidate>,
    selected: Arena<Candidate>,
    positions: Arena<Vec3>,
    densities: Arena<f32>,
    samples: Arena<VoxelSample>,
}

impl GridMaintainer {
    pub fn new(config: MaintenanceConfig) -> Self {
        Self {
            config,
            cycle: 0,
            compactor: StreamCompactor::default(),
            candidates: Arena::new("maintenance candidates"),
            selected: Arena::new("maintenance selected candidates"),
            positions: Arena::new("maintenance sample positions"),
            densities: Arena::new("maintenance sample densities"),
            samples: Arena::new("maintenance voxel samples"),
        }
    }

    pub fn config(&self) -> &MaintenanceConfig {
        &self.config
    }

    /// Number of completed cycles
    pub fn cycle(&self) -> u32 {
        self.cycle
    }

    /// Exploration probability in effect for the current cycle
    pub fn exploration(&self) -> f32 {
        if self.cycle < self.config.warmup_cycles {
            1.0
        } else {
            self.config.selection_threshold
        }
    }

    /// Levels refreshed by the current cycle
    pub fn levels_for_cycle(&self, levels: u32) -> Vec<u32> {
        match self.config.levels_per_cycle {
            Some(k) if k > 0 && k < levels => {
                (0..k).map(|i| (self.cycle.wrapping_mul(k) + i) % levels).collect()
            }
            _ => (0..levels).collect(),
        }
    }

    /// Run one maintenance cycle.
    ///
    /// All density evaluations happen before the grid is touched, so a
    /// sampler failure leaves the grid exactly as it was.
    pub fn run_cycle(&mut self, grid: &mut OccupancyGrid, sampler: &dyn DensitySampler) -> Result<CycleReport> {
        let cycle = self.cycle;
        let exploration = self.exploration();
        let levels = self.levels_for_cycle(grid.levels());
        let voxels = grid.voxel_count();

        let mut report = CycleReport {
            cycle,
            levels_updated: levels.clone(),
            ..Default::default()
        };

        // (level, start, count) ranges into the sample buffer
        let mut batches = Vec::with_capacity(levels.len());
        let mut total = 0usize;

        for &level in &levels {
            let candidates = self.candidates.ensure_capacity(voxels)?;
            candidates.par_iter_mut().enumerate().for_each(|(index, candidate)| {
                let index = index as u32;
                *candidate = Candidate {
                    index,
                    position: grid.jittered_position(level, index, cycle),
                };
            });

            let selected = self.selected.ensure_capacity(voxels)?;
            let count = self.compactor.compact(candidates, selected, |c| {
                grid.is_selected(level, c.index, exploration, cycle)
            })?;
            let selected = &selected[..count];

            let positions = self.positions.ensure_capacity(count)?;
            positions
                .par_iter_mut()
                .zip(selected.par_iter())
                .for_each(|(p, c)| *p = c.position);

            let densities = self.densities.ensure_capacity(count)?;
            sampler.sample_density(positions, densities)?;

            let samples = &mut self.samples.ensure_capacity(total + count)?[total..];
            samples
                .par_iter_mut()
                .zip(selected.par_iter().zip(densities.par_iter()))
                .for_each(|(s, (c, &density))| *s = VoxelSample { index: c.index, density });

            batches.push((level, total, count));
            total += count;
            report.candidates += voxels;
            report.evaluated += count;
        }

        grid.decay(self.config.decay_factor)?;
        let samples = self.samples.slice(total);
        for (level, start, count) in batches {
            report.applied += grid.sample_and_update(level, exploration, cycle, &samples[start..start + count])?;
        }
        grid.rebuild_bits(self.config.occupancy_threshold);
        self.cycle += 1;

        log::info!(
            "Maintenance cycle {}: levels {:?}, evaluated {}/{} candidates, applied {}",
            cycle, report.levels_updated, report.evaluated, report.candidates, report.applied
        );
        Ok(report)
    }
}

impl Default for GridMaintainer {
    fn default() -> Self {
        Self::new(MaintenanceConfig::default())
    }
}
