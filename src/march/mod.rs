//! Ray marching through the occupancy grid
//!
//! Ray state lives in two slots of structure-of-arrays buffers. Every step
//! reads the current slot, and compaction writes the surviving rays into the
//! other slot before the slots swap roles.

pub mod state;
pub mod slots;
pub mod marcher;

pub use state::RayBatch;
pub use slots::RaySlots;
pub use marcher::{MarchConfig, MarchOutput, MarchStats, RayMarcher};
