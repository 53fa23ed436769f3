//! Marrow Core - Foundational types for the Marrow animation runtime
//!
//! This crate provides the types that all other Marrow crates depend on:
//! - `Vec3`, `Quat`, `Mat4`, `Transform` - Spatial types and blend algebra
//! - `BoneMask` - 256-bit bone set for partial-body blending
//! - Error types and Result alias

mod error;
mod mask;
mod types;

pub use error::{MarrowError, Result};
pub use mask::{BoneMask, MAX_BONES};
pub use types::{approx_eq, Mat4, Quat, Transform, Vec3, EPSILON};
