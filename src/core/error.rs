//! Error types for marchgrid
//!
//! Every variant is fatal to the operation that produced it. Nothing in the
//! crate retries or returns partial results; the caller decides whether the
//! whole pipeline aborts.

use thiserror::Error;

/// Main error type for the crate
#[derive(Debug, Error)]
pub enum Error {
    /// A buffer could not be grown to the requested size.
    #[error("Allocation failed for {what}: {requested} bytes requested")]
    Allocation { what: &'static str, requested: usize },

    /// Invalid launch configuration or mismatched buffer sizes.
    #[error("Launch error: {0}")]
    Launch(String),

    /// The density sampler failed to evaluate a batch.
    #[error("Density sampler error: {0}")]
    Sampler(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
