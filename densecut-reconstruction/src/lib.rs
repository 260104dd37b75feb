//! # densecut reconstruction
//!
//! Large-scale surface reconstruction from calibrated cameras and candidate
//! point tracks.
//!
//! The scene cube is partitioned into voxel blocks, a fusion resolution is
//! searched so the point count fits a budget, and each unit is meshed by a
//! Delaunay tetrahedralization labelled through a visibility-weighted graph
//! cut. Per-unit meshes are merged and post-processed into one result.

pub mod delaunay;
pub mod delaunay_gc;
pub mod graph_cut;
pub mod merge;
pub mod parallel;
pub mod partition;
pub mod pipeline;
pub mod plan;
pub mod post_processing;
pub mod visibility;

// Re-export commonly used items
pub use delaunay::Tetrahedralization;
pub use delaunay_gc::*;
pub use graph_cut::FlowNetwork;
pub use merge::*;
pub use partition::*;
pub use pipeline::*;
pub use plan::*;
pub use post_processing::*;
pub use visibility::{RayCaster, VisibilityRay, VoteTable};
