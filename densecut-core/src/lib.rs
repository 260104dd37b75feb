//! Core data structures and traits for densecut
//!
//! This crate provides the fundamental types shared by the meshing pipeline:
//! points, calibrated cameras, candidate tracks, scene partition cells,
//! triangle meshes with per-vertex visibility, and the error type.

pub mod camera;
pub mod error;
pub mod hexahedron;
pub mod mesh;
pub mod point;
pub mod traits;
pub mod track;

pub use camera::*;
pub use error::*;
pub use hexahedron::*;
pub use mesh::*;
pub use point::*;
pub use traits::*;
pub use track::*;

/// Re-export commonly used types from nalgebra
pub use nalgebra::{Matrix3, Point2, Point3, Vector3};
