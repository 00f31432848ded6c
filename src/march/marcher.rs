//! Per-iteration ray march step with empty-space skipping and compaction

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::compact::StreamCompactor;
use crate::core::{Arena, Error, Result, Vec3};
use crate::grid::{DensitySampler, OccupancyGrid};
use crate::math::Ray;
use super::slots::RaySlots;

/// Ray marching parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarchConfig {
    /// Step length at cascade level 0; doubles with each level
    pub step_size: f32,
    /// Samples after which a ray is retired
    pub max_steps: u32,
    /// Transmittance below which a ray counts as fully absorbed
    pub min_transmittance: f32,
    /// Empty voxels a ray may skip within one iteration
    pub max_skips_per_step: u32,
    /// Largest march parameter before a ray is retired
    pub t_max: f32,
    /// Upper bound on march iterations per batch
    pub max_iterations: u32,
}

impl Default for MarchConfig {
    fn default() -> Self {
        Self {
            step_size: 1.0 / 256.0,
            max_steps: 1024,
            min_transmittance: 1e-4,
            max_skips_per_step: 64,
            t_max: 1e4,
            max_iterations: 4096,
        }
    }
}

/// Per-pixel results of a render batch
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MarchOutput {
    /// `1 - transmittance` at termination
    pub opacity: Vec<f32>,
    /// March parameter at termination
    pub depth: Vec<f32>,
    /// Density samples taken
    pub steps: Vec<u32>,
}

impl MarchOutput {
    pub fn new(pixels: usize) -> Self {
        Self {
            opacity: vec![0.0; pixels],
            depth: vec![f32::INFINITY; pixels],
            steps: vec![0; pixels],
        }
    }

    fn record(&mut self, pixel: u32, transmittance: f32, t: f32, steps: u32) {
        let pixel = pixel as usize;
        self.opacity[pixel] = 1.0 - transmittance;
        self.depth[pixel] = t;
        self.steps[pixel] = steps;
    }

    /// Mean opacity over all pixels
    pub fn coverage(&self) -> f32 {
        if self.opacity.is_empty() {
            return 0.0;
        }
        self.opacity.iter().sum::<f32>() / self.opacity.len() as f32
    }
}

/// Statistics of one [`RayMarcher::march`] call
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MarchStats {
    pub iterations: u32,
    /// Alive rays after each iteration's compaction
    pub alive_per_step: Vec<usize>,
    /// Density samples evaluated in total
    pub samples: usize,
}

/// Where a ray ended up after skipping empty space
#[derive(Clone, Copy, Debug, PartialEq)]
enum Advance {
    /// Left the grid or passed `t_max`
    Exited(f32),
    /// Landed in an occupied voxel of `level`
    Sample { t: f32, level: u32 },
    /// Ran out of skips inside empty space
    Pending(f32),
}

/// Walk `ray` from `t` through unoccupied voxels of the finest containing
/// cascade until it reaches an occupied voxel or leaves the grid.
fn skip_empty_space(ray: &Ray, mut t: f32, grid: &OccupancyGrid, config: &MarchConfig) -> Advance {
    for _ in 0..=config.max_skips_per_step {
        // also catches NaN and the infinite start of rays that missed
        if !(t <= config.t_max) {
            return Advance::Exited(t);
        }
        let p = ray.at(t);
        let Some(level) = grid.level_for_position(p) else {
            return Advance::Exited(t);
        };
        let index = grid.voxel_at(level, p);
        if grid.is_occupied_at(level, index) {
            return Advance::Sample { t, level };
        }
        let voxel = grid.voxel_bounds(level, index);
        let exit = ray.exit_distance(&voxel).max(t);
        t = exit + grid.voxel_size(level) * 1e-3;
    }
    Advance::Pending(t)
}

/// Runs march iterations over a [`RaySlots`] batch
pub struct RayMarcher {
    config: MarchConfig,
    compactor: StreamCompactor,
    /// Step length of each ray's pending sample
    dt: Arena<f32>,
    ray_ids: Arena<u32>,
    active_ids: Arena<u32>,
    positions: Arena<Vec3>,
    densities: Arena<f32>,
    /// Density per ray, scattered back from the sampled batch
    sigma: Arena<f32>,
    last_step_samples: usize,
}

impl RayMarcher {
    pub fn new(config: MarchConfig) -> Self {
        Self {
            config,
            compactor: StreamCompactor::default(),
            dt: Arena::new("march step lengths"),
            ray_ids: Arena::new("march ray ids"),
            active_ids: Arena::new("march active ray ids"),
            positions: Arena::new("march sample positions"),
            densities: Arena::new("march sample densities"),
            sigma: Arena::new("march per-ray density"),
            last_step_samples: 0,
        }
    }

    pub fn config(&self) -> &MarchConfig {
        &self.config
    }

    /// Density samples evaluated by the most recent step
    pub fn last_step_samples(&self) -> usize {
        self.last_step_samples
    }

    /// One march iteration. Returns the number of rays still alive, which is
    /// the launch width of the next iteration.
    pub fn step(
        &mut self,
        slots: &mut RaySlots,
        grid: &OccupancyGrid,
        sampler: &dyn DensitySampler,
        output: &mut MarchOutput,
    ) -> Result<usize> {
        self.last_step_samples = 0;
        let n = slots.len();
        if n == 0 {
            return Ok(0);
        }
        let pixels = output.opacity.len();
        if let Some(&pixel) = slots.current().pixels(n).par_iter().find_any(|&&p| p as usize >= pixels) {
            return Err(Error::Launch(format!(
                "ray targets pixel {} but the output holds {} pixels",
                pixel, pixels
            )));
        }
        let config = &self.config;
        let dt = self.dt.ensure_capacity(n)?;
        let batch = slots.current_mut();

        // 1. Skip empty space and mark rays that need a density sample
        {
            let origin = batch.origin.slice(n);
            let direction = batch.direction.slice(n);
            let inv_direction = batch.inv_direction.slice(n);
            (
                batch.t.slice_mut(n),
                batch.alive.slice_mut(n),
                batch.active.slice_mut(n),
                &mut *dt,
            )
                .into_par_iter()
                .enumerate()
                .for_each(|(i, (t, alive, active, dt))| {
                    let ray = Ray::with_inverse(origin[i], direction[i], inv_direction[i]);
                    *active = false;
                    match skip_empty_space(&ray, *t, grid, config) {
                        Advance::Exited(exit) => {
                            *t = exit;
                            *alive = false;
                        }
                        Advance::Sample { t: sample_t, level } => {
                            *t = sample_t;
                            *active = true;
                            *dt = config.step_size * (1u32 << level) as f32;
                        }
                        Advance::Pending(pending) => *t = pending,
                    }
                });
        }

        // 2. Evaluate densities for active rays only
        let ids = self.ray_ids.ensure_capacity(n)?;
        ids.par_iter_mut().enumerate().for_each(|(i, id)| *id = i as u32);
        let active_ids = self.active_ids.ensure_capacity(n)?;
        let active = batch.active.slice(n);
        let m = self.compactor.compact_indexed(ids, active_ids, |i, _| active[i])?;
        let active_ids = &active_ids[..m];

        let positions = self.positions.ensure_capacity(m)?;
        {
            let origin = batch.origin.slice(n);
            let direction = batch.direction.slice(n);
            let t = batch.t.slice(n);
            positions
                .par_iter_mut()
                .zip(active_ids.par_iter())
                .for_each(|(p, &id)| {
                    let i = id as usize;
                    *p = origin[i] + direction[i] * t[i];
                });
        }
        let densities = self.densities.ensure_capacity(m)?;
        sampler.sample_density(positions, densities)?;
        self.last_step_samples = m;

        let sigma = self.sigma.ensure_capacity(n)?;
        for (&id, &density) in active_ids.iter().zip(densities.iter()) {
            sigma[id as usize] = density;
        }

        // 3. Composite, advance and apply early termination
        (
            batch.t.slice_mut(n),
            batch.transmittance.slice_mut(n),
            batch.steps.slice_mut(n),
            batch.alive.slice_mut(n),
            batch.active.slice(n),
            &*dt,
            &*sigma,
        )
            .into_par_iter()
            .for_each(|(t, transmittance, steps, alive, &active, &dt, &sigma)| {
                if !active {
                    return;
                }
                *transmittance *= (-sigma.max(0.0) * dt).exp();
                *t += dt;
                *steps += 1;
                if *transmittance < config.min_transmittance || *steps >= config.max_steps {
                    *alive = false;
                }
            });

        // 4. Record finished rays, then compact the survivors
        let alive = batch.alive.slice(n);
        let pixel = batch.pixel.slice(n);
        let transmittance = batch.transmittance.slice(n);
        let t = batch.t.slice(n);
        let steps = batch.steps.slice(n);
        for i in (0..n).filter(|&i| !alive[i]) {
            output.record(pixel[i], transmittance[i], t[i], steps[i]);
        }

        let survivors = slots.compact_alive(&mut self.compactor)?;
        log::debug!("March step: {} rays, {} sampled, {} alive", n, m, survivors);
        Ok(survivors)
    }

    /// Step until every ray has finished or the iteration limit is reached.
    /// Rays still alive at the limit are recorded as they stand.
    pub fn march(
        &mut self,
        slots: &mut RaySlots,
        grid: &OccupancyGrid,
        sampler: &dyn DensitySampler,
        output: &mut MarchOutput,
    ) -> Result<MarchStats> {
        let mut stats = MarchStats::default();
        let initial = slots.len();

        while !slots.is_empty() && stats.iterations < self.config.max_iterations {
            let alive = self.step(slots, grid, sampler, output)?;
            stats.samples += self.last_step_samples;
            stats.iterations += 1;
            stats.alive_per_step.push(alive);
        }

        if !slots.is_empty() {
            log::warn!(
                "March stopped after {} iterations with {} rays alive",
                stats.iterations,
                slots.len()
            );
            let n = slots.len();
            let batch = slots.current();
            for i in 0..n {
                output.record(batch.pixels(n)[i], batch.transmittance(n)[i], batch.t(n)[i], batch.steps(n)[i]);
            }
        }

        log::info!(
            "Marched {} rays in {} iterations ({} density samples)",
            initial, stats.iterations, stats.samples
        );
        Ok(stats)
    }
}

impl Default for RayMarcher {
    fn default() -> Self {
        Self::new(MarchConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{GridConfig, GridMaintainer};

    fn grid(levels: u32, resolution: u32) -> OccupancyGrid {
        OccupancyGrid::new(GridConfig {
            levels,
            resolution,
            base_half_width: 1.0,
            center: [0.0; 3],
            seed: 11,
        })
        .unwrap()
    }

    fn full_grid() -> OccupancyGrid {
        let mut grid = OccupancyGrid::with_initial_density(
            GridConfig { levels: 1, resolution: 4, base_half_width: 1.0, center: [0.0; 3], seed: 0 },
            1.0,
        )
        .unwrap();
        grid.rebuild_bits(0.5);
        grid
    }

    /// Rays along +z from z = -5; odd rays are offset far enough to miss
    fn four_rays() -> (Vec<Ray>, Vec<u32>) {
        let rays = (0..4)
            .map(|i| {
                let x = if i % 2 == 1 { 5.0 } else { i as f32 * 0.2 - 0.2 };
                Ray::new(Vec3::new(x, 0.1, -5.0), Vec3::Z)
            })
            .collect();
        (rays, vec![0, 1, 2, 3])
    }

    #[test]
    fn test_step_drops_dead_rays_in_order() {
        let grid = full_grid();
        let (rays, pixels) = four_rays();
        let mut slots = RaySlots::new();
        slots.reset(&rays, &pixels, &grid.scene_bounds()).unwrap();

        let mut marcher = RayMarcher::default();
        let mut output = MarchOutput::new(4);
        let alive = marcher.step(&mut slots, &grid, &|_: Vec3| 0.1_f32, &mut output).unwrap();

        assert_eq!(alive, 2);
        assert_eq!(slots.current().pixels(2), &[0, 2]);
        assert_eq!(marcher.last_step_samples(), 2);
        assert_eq!(output.opacity[1], 0.0);
        assert_eq!(output.depth[3], f32::INFINITY);
    }

    #[test]
    fn test_pixel_outside_output_is_rejected() {
        let grid = full_grid();
        let rays = vec![Ray::new(Vec3::new(0.0, 0.1, -5.0), Vec3::Z)];
        let mut slots = RaySlots::new();
        slots.reset(&rays, &[7], &grid.scene_bounds()).unwrap();
        let t_before = slots.current().t(1)[0];

        let mut marcher = RayMarcher::default();
        let mut output = MarchOutput::new(1);
        let result = marcher.step(&mut slots, &grid, &|_: Vec3| 1.0_f32, &mut output);

        assert!(matches!(result, Err(Error::Launch(_))));
        assert_eq!(slots.len(), 1);
        assert_eq!(slots.current().t(1)[0], t_before);
        assert_eq!(output, MarchOutput::new(1));
    }

    #[test]
    fn test_empty_grid_skips_everything() {
        let grid = grid(2, 4);
        let (rays, pixels) = four_rays();
        let mut slots = RaySlots::new();
        slots.reset(&rays, &pixels, &grid.scene_bounds()).unwrap();

        let mut marcher = RayMarcher::default();
        let mut output = MarchOutput::new(4);
        let sampler = |_: Vec3| -> f32 { panic!("empty space must not be sampled") };
        let alive = marcher.step(&mut slots, &grid, &sampler, &mut output).unwrap();

        assert_eq!(alive, 0);
        assert!(output.opacity.iter().all(|&o| o == 0.0));
        // rays that entered leave through the far face at z = 2
        assert!((output.depth[0] - 7.0).abs() < 0.01);
    }

    #[test]
    fn test_skip_lands_on_occupied_voxel() {
        let mut grid = grid(1, 8);
        let target = grid.voxel_at(0, Vec3::new(0.1, 0.1, 0.6));
        grid.set_occupied(0, target, true).unwrap();

        let ray = Ray::new(Vec3::new(0.1, 0.1, -5.0), Vec3::Z);
        let config = MarchConfig::default();
        match skip_empty_space(&ray, 4.0 + 1e-4, &grid, &config) {
            Advance::Sample { t, level } => {
                assert_eq!(level, 0);
                assert_eq!(grid.voxel_at(0, ray.at(t)), target);
                // voxel spans z in [0.5, 0.75]
                assert!(t >= 5.5 && t < 5.51);
            }
            other => panic!("expected a sample, got {:?}", other),
        }
    }

    #[test]
    fn test_skip_budget_leaves_ray_pending() {
        let grid = grid(1, 64);
        let ray = Ray::new(Vec3::new(0.01, 0.01, -5.0), Vec3::Z);
        let config = MarchConfig { max_skips_per_step: 3, ..Default::default() };
        assert!(matches!(
            skip_empty_space(&ray, 4.0 + 1e-4, &grid, &config),
            Advance::Pending(_)
        ));
    }

    #[test]
    fn test_opaque_medium_terminates_early() {
        let grid = full_grid();
        let (rays, pixels) = four_rays();
        let mut slots = RaySlots::new();
        slots.reset(&rays, &pixels, &grid.scene_bounds()).unwrap();

        let config = MarchConfig { step_size: 0.05, ..Default::default() };
        let mut marcher = RayMarcher::new(config);
        let mut output = MarchOutput::new(4);
        let stats = marcher.march(&mut slots, &grid, &|_: Vec3| 100.0_f32, &mut output).unwrap();

        assert!(slots.is_empty());
        assert!(output.opacity[0] > 0.999);
        assert!(output.opacity[2] > 0.999);
        // exp(-5) per step, so two steps cross the 1e-4 threshold
        assert_eq!(output.steps[0], 2);
        assert!(stats.alive_per_step.windows(2).all(|w| w[1] <= w[0]));
        assert_eq!(stats.samples, 4);
    }

    #[test]
    fn test_max_steps_retires_rays() {
        let grid = full_grid();
        let (rays, pixels) = four_rays();
        let mut slots = RaySlots::new();
        slots.reset(&rays, &pixels, &grid.scene_bounds()).unwrap();

        let config = MarchConfig { step_size: 0.01, max_steps: 5, ..Default::default() };
        let mut marcher = RayMarcher::new(config);
        let mut output = MarchOutput::new(4);
        marcher.march(&mut slots, &grid, &|_: Vec3| 0.0_f32, &mut output).unwrap();
        assert_eq!(output.steps[0], 5);
        assert_eq!(output.opacity[0], 0.0);
    }

    #[test]
    fn test_iteration_limit_flushes_alive_rays() {
        let grid = full_grid();
        let (rays, pixels) = four_rays();
        let mut slots = RaySlots::new();
        slots.reset(&rays, &pixels, &grid.scene_bounds()).unwrap();

        let config = MarchConfig { step_size: 0.01, max_iterations: 3, ..Default::default() };
        let mut marcher = RayMarcher::new(config);
        let mut output = MarchOutput::new(4);
        let stats = marcher.march(&mut slots, &grid, &|_: Vec3| 1.0_f32, &mut output).unwrap();
        assert_eq!(stats.iterations, 3);
        assert_eq!(output.steps[0], 3);
        assert!(output.opacity[0] > 0.0);
    }

    #[test]
    fn test_sampler_error_propagates() {
        struct Broken;
        impl DensitySampler for Broken {
            fn sample_density(&self, _: &[Vec3], _: &mut [f32]) -> Result<()> {
                Err(Error::Sampler("out of memory".into()))
            }
        }

        let grid = full_grid();
        let (rays, pixels) = four_rays();
        let mut slots = RaySlots::new();
        slots.reset(&rays, &pixels, &grid.scene_bounds()).unwrap();
        let mut marcher = RayMarcher::default();
        let mut output = MarchOutput::new(4);
        assert!(matches!(
            marcher.step(&mut slots, &grid, &Broken, &mut output),
            Err(Error::Sampler(_))
        ));
    }

    #[test]
    fn test_maintained_grid_renders_sphere() {
        let sphere = |p: Vec3| if p.length() < 0.4 { 50.0_f32 } else { 0.0 };
        let mut grid = grid(2, 16);
        let mut maintainer = GridMaintainer::default();
        for _ in 0..2 {
            maintainer.run_cycle(&mut grid, &sphere).unwrap();
        }

        let rays = vec![
            Ray::new(Vec3::new(0.0, 0.0, -5.0), Vec3::Z),
            Ray::new(Vec3::new(1.5, 1.5, -5.0), Vec3::Z),
        ];
        let mut slots = RaySlots::new();
        slots.reset(&rays, &[0, 1], &grid.scene_bounds()).unwrap();

        let mut marcher = RayMarcher::new(MarchConfig { step_size: 0.01, ..Default::default() });
        let mut output = MarchOutput::new(2);
        marcher.march(&mut slots, &grid, &sphere, &mut output).unwrap();

        assert!(output.opacity[0] > 0.99);
        // terminates a couple of tenths past the surface at z = -0.4
        assert!(output.depth[0] > 4.55 && output.depth[0] < 5.0, "depth {}", output.depth[0]);
        assert_eq!(output.opacity[1], 0.0);
        assert_eq!(output.steps[1], 0);
    }

    #[test]
    fn test_negative_density_does_not_brighten() {
        let grid = full_grid();
        let (rays, pixels) = four_rays();
        let mut slots = RaySlots::new();
        slots.reset(&rays, &pixels, &grid.scene_bounds()).unwrap();
        let mut marcher = RayMarcher::default();
        let mut output = MarchOutput::new(4);
        marcher.step(&mut slots, &grid, &|_: Vec3| -3.0_f32, &mut output).unwrap();
        assert!(slots.current().transmittance(slots.len()).iter().all(|&t| t == 1.0));
    }
}
