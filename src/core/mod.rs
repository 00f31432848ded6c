//! Core types and utilities shared by the grid, compactor and marcher

pub mod types;
pub mod error;
pub mod logging;
pub mod arena;

pub use types::*;
pub use error::Error;
pub use arena::Arena;
