//! Grid snapshot serialization and disk I/O
//!
//! Snapshots keep the in-memory layout: densities level-major then Morton
//! order, followed by one occupancy byte per voxel (bit `l` = level `l`).
//! The archive is written with rkyv and compressed with LZ4.

use std::path::Path;

use rkyv::{Archive, Deserialize, Serialize};

use crate::core::{Error, Result};
use super::bits::LevelMask;
use super::cascade::{GridConfig, OccupancyGrid};

/// Bumped whenever the archived layout changes
pub const SNAPSHOT_VERSION: u32 = 1;

/// Serializable grid contents
#[derive(Archive, Deserialize, Serialize)]
struct GridSnapshot {
    version: u32,
    levels: u32,
    resolution: u32,
    base_half_width: f32,
    center: [f32; 3],
    seed: u32,
    density: Vec<f32>,
    bits: Vec<u8>,
}

/// Serialize a grid to bytes (uncompressed)
pub fn serialize_grid(grid: &OccupancyGrid) -> Result<Vec<u8>> {
    let config = grid.config();
    let snapshot = GridSnapshot {
        version: SNAPSHOT_VERSION,
        levels: config.levels,
        resolution: config.resolution,
        base_half_width: config.base_half_width,
        center: config.center,
        seed: config.seed,
        density: grid.densities().to_vec(),
        bits: bytemuck::cast_slice::<LevelMask, u8>(grid.bits()).to_vec(),
    };

    let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(&snapshot)
        .map_err(|e| Error::Snapshot(e.to_string()))?;
    Ok(bytes.to_vec())
}

/// Deserialize a grid from bytes (uncompressed)
pub fn deserialize_grid(data: &[u8]) -> Result<OccupancyGrid> {
    // rkyv validates alignment, which an arbitrary byte slice doesn't promise
    let mut aligned = rkyv::util::AlignedVec::<16>::with_capacity(data.len());
    aligned.extend_from_slice(data);

    let snapshot = rkyv::from_bytes::<GridSnapshot, rkyv::rancor::Error>(&aligned)
        .map_err(|e| Error::Snapshot(e.to_string()))?;

    if snapshot.version != SNAPSHOT_VERSION {
        return Err(Error::Snapshot(format!(
            "unsupported snapshot version {} (expected {})",
            snapshot.version, SNAPSHOT_VERSION
        )));
    }

    let config = GridConfig {
        levels: snapshot.levels,
        resolution: snapshot.resolution,
        base_half_width: snapshot.base_half_width,
        center: snapshot.center,
        seed: snapshot.seed,
    };
    let bits = snapshot.bits.into_iter().map(LevelMask::from_bits).collect();
    OccupancyGrid::from_parts(config, snapshot.density, bits)
}

/// Serialize and LZ4-compress a grid
pub fn encode_grid(grid: &OccupancyGrid) -> Result<Vec<u8>> {
    let serialized = serialize_grid(grid)?;
    Ok(lz4_flex::compress_prepend_size(&serialized))
}

/// Decompress and deserialize a grid
pub fn decode_grid(data: &[u8]) -> Result<OccupancyGrid> {
    let decompressed = lz4_flex::decompress_size_prepended(data)
        .map_err(|e| Error::Snapshot(format!("LZ4 decompression failed: {}", e)))?;
    deserialize_grid(&decompressed)
}

/// Write a compressed snapshot to `path`, creating parent directories
pub fn save_grid(grid: &OccupancyGrid, path: &Path) -> Result<()> {
    let data = encode_grid(grid)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, &data)?;
    log::info!("Saved occupancy grid snapshot to {} ({} bytes)", path.display(), data.len());
    Ok(())
}

/// Load a compressed snapshot from `path`
pub fn load_grid(path: &Path) -> Result<OccupancyGrid> {
    let data = std::fs::read(path)?;
    let grid = decode_grid(&data)?;
    log::info!(
        "Loaded occupancy grid snapshot from {}: {} levels x {}^3",
        path.display(), grid.levels(), grid.resolution()
    );
    Ok(grid)
}
