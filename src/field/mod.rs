//! Procedural density fields
//!
//! Stand-ins for a trained density network: anything implementing
//! [`DensitySampler`](crate::grid::DensitySampler) can drive grid
//! maintenance and ray marching.

pub mod sphere;
pub mod noise_field;

pub use sphere::SphereField;
pub use noise_field::{NoiseField, NoiseParams};
