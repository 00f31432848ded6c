//! marchgrid - cascaded occupancy grids and stream compaction for
//! accelerated volumetric ray marching

pub mod core;
pub mod math;
pub mod compact;
pub mod grid;
pub mod march;
pub mod field;
pub mod config;
