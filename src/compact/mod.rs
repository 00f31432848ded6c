//! Order-preserving parallel stream compaction
//!
//! Compaction runs as three dispatches in submission order:
//! 1. [`count_blocks`]: each block counts its predicate-true elements by
//!    summing per-warp ballot population counts
//! 2. [`exclusive_scan`]: block counts become block output offsets
//! 3. scatter: each block recomputes its warp ballots, scans the warp
//!    totals, and writes every true element to
//!    `lane_prefix + warp_offset + block_offset`
//!
//! The scan must finish before scatter starts. Here that ordering is plain
//! program order between the two rayon dispatches.

pub mod warp;
pub mod scan;
pub mod compactor;

pub use compactor::{count_blocks, LaunchConfig, StreamCompactor, DEFAULT_BLOCK_SIZE, MAX_BLOCK_SIZE};
pub use scan::exclusive_scan;
pub use warp::WARP_SIZE;
