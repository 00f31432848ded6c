//! marchgrid demo - maintains an occupancy grid over a procedural density
//! field and renders it with compacted ray marching.
//!
//! Usage: cargo run --release -- [OPTIONS]
//!
//! Options:
//!   --config <PATH>      JSON render config (default: built-in defaults)
//!   --levels <N>         Cascade levels (overrides config)
//!   --resolution <R>     Voxels per axis (overrides config)
//!   --cycles <N>         Maintenance cycles before rendering (default: 32)
//!   --width <W>          Image width in pixels (default: 64)
//!   --height <H>         Image height in pixels (default: 32)
//!   --load <PATH>        Start from a saved grid snapshot instead of an empty grid
//!   --snapshot <PATH>    Save the maintained grid to PATH

use std::path::PathBuf;
use std::time::Instant;

use marchgrid::config::RenderConfig;
use marchgrid::core::{logging, Result, Vec3};
use marchgrid::field::NoiseField;
use marchgrid::grid::{snapshot, GridMaintainer, OccupancyGrid};
use marchgrid::march::{MarchOutput, RayMarcher, RaySlots};
use marchgrid::math::Ray;

fn main() {
    logging::init();

    if let Err(e) = run() {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    let mut config = match parse_str_arg(&args, "--config") {
        Some(path) => RenderConfig::load(&PathBuf::from(path))?,
        None => RenderConfig::default(),
    };
    if let Some(levels) = parse_u32_arg(&args, "--levels") {
        config.grid.levels = levels;
    }
    if let Some(resolution) = parse_u32_arg(&args, "--resolution") {
        config.grid.resolution = resolution;
    }
    let cycles = parse_u32_arg(&args, "--cycles").unwrap_or(32);
    let width = parse_u32_arg(&args, "--width").unwrap_or(64);
    let height = parse_u32_arg(&args, "--height").unwrap_or(32);

    let mut grid = match parse_str_arg(&args, "--load") {
        Some(path) => {
            if has_layout_overrides(&args) {
                log::warn!("--levels/--resolution ignored: grid layout comes from snapshot {}", path);
            }
            snapshot::load_grid(&PathBuf::from(path))?
        }
        None => OccupancyGrid::new(config.grid.clone())?,
    };
    let layout = grid.config();

    println!("=== marchgrid ===");
    println!("Grid:   {} levels x {}^3, base half-width {}", layout.levels, layout.resolution, layout.base_half_width);
    println!("Cycles: {}", cycles);
    println!("Image:  {}x{}", width, height);
    println!();

    let field = NoiseField::new(config.scene.clone());

    let start = Instant::now();
    let mut maintainer = GridMaintainer::new(config.maintenance.clone());
    for _ in 0..cycles {
        maintainer.run_cycle(&mut grid, &field)?;
    }
    let maintenance_time = start.elapsed();

    let stats = grid.stats();
    for (level, level_stats) in stats.levels.iter().enumerate() {
        println!(
            "Level {}: half-width {:>6.2}, {:>8} occupied voxels, mean density {:.4}",
            level,
            grid.level_half_width(level as u32),
            level_stats.occupied,
            level_stats.mean_density
        );
    }
    println!(
        "Occupied: {:.2}% of cells after {:.2?}",
        stats.occupied_fraction(grid.voxel_count()) * 100.0,
        maintenance_time
    );

    let (rays, pixels) = camera_rays(width, height, Vec3::new(0.0, 0.0, -2.5));
    let mut slots = RaySlots::new();
    slots.reset(&rays, &pixels, &grid.scene_bounds())?;

    let start = Instant::now();
    let mut marcher = RayMarcher::new(config.march.clone());
    let mut output = MarchOutput::new(rays.len());
    let march_stats = marcher.march(&mut slots, &grid, &field, &mut output)?;
    let march_time = start.elapsed();

    println!(
        "Rendered {} rays in {} iterations ({} samples, {:.2?}), coverage {:.1}%",
        rays.len(),
        march_stats.iterations,
        march_stats.samples,
        march_time,
        output.coverage() * 100.0
    );
    let widths: Vec<String> = march_stats
        .alive_per_step
        .iter()
        .take(12)
        .map(|n| n.to_string())
        .collect();
    println!("Alive rays per step: {} ...", widths.join(", "));

    if width <= 160 {
        println!();
        print_preview(&output, width, height);
    }

    if let Some(path) = parse_str_arg(&args, "--snapshot") {
        snapshot::save_grid(&grid, &PathBuf::from(path))?;
    }

    Ok(())
}

/// Pinhole camera at `eye` looking at the origin, one ray per pixel center
fn camera_rays(width: u32, height: u32, eye: Vec3) -> (Vec<Ray>, Vec<u32>) {
    let forward = (-eye).normalize();
    let right = Vec3::Y.cross(forward).normalize();
    let up = forward.cross(right);
    let fov_scale = (45.0_f32.to_radians() * 0.5).tan();
    let aspect = width as f32 / height as f32;

    let mut rays = Vec::with_capacity((width * height) as usize);
    for y in 0..height {
        for x in 0..width {
            let u = ((x as f32 + 0.5) / width as f32 * 2.0 - 1.0) * fov_scale * aspect;
            let v = (1.0 - (y as f32 + 0.5) / height as f32 * 2.0) * fov_scale;
            rays.push(Ray::new(eye, (forward + right * u + up * v).normalize()));
        }
    }
    let pixels = (0..width * height).collect();
    (rays, pixels)
}

fn print_preview(output: &MarchOutput, width: u32, height: u32) {
    const RAMP: &[u8] = b" .:-=+*#%@";
    for y in 0..height {
        let row: String = (0..width)
            .map(|x| {
                let opacity = output.opacity[(y * width + x) as usize].clamp(0.0, 1.0);
                RAMP[(opacity * (RAMP.len() - 1) as f32).round() as usize] as char
            })
            .collect();
        println!("{}", row);
    }
}

/// Whether the arguments try to change the grid layout
fn has_layout_overrides(args: &[String]) -> bool {
    args.iter().any(|a| a == "--levels" || a == "--resolution")
}

fn parse_str_arg(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn parse_u32_arg(args: &[String], flag: &str) -> Option<u32> {
    parse_str_arg(args, flag).and_then(|s| s.parse().ok())
}
