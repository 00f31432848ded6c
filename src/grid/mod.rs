//! Cascaded occupancy grid
//!
//! Each cascade level covers a cube twice the half-width of the level below
//! it at the same voxel resolution. Densities are stored level-major, then by
//! Morton index; occupancy bits are one byte per voxel shared by all levels.

pub mod bits;
pub mod cascade;
pub mod maintenance;
pub mod snapshot;

pub use bits::{LevelMask, MAX_CASCADES};
pub use cascade::{GridConfig, GridStats, LevelStats, OccupancyGrid, VoxelSample};
pub use maintenance::{CycleReport, DensitySampler, GridMaintainer, MaintenanceConfig};
