//! Error types for densecut

use crate::hexahedron::VoxelId;
use thiserror::Error;

/// Main error type for densecut operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Algorithm error: {0}")]
    Algorithm(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Degenerate scene: {0}")]
    DegenerateScene(String),

    #[error("Empty mesh: {0}")]
    EmptyMesh(String),

    #[error(
        "Point budget {budget} unreachable after {iterations} iterations \
         (last count {last_count} at resolution {resolution})"
    )]
    BudgetUnreachable {
        budget: usize,
        iterations: usize,
        last_count: usize,
        resolution: u32,
    },

    #[error(
        "Merged surface is not closed: {boundary_edges} boundary edges, \
         {non_manifold_edges} non-manifold edges"
    )]
    OpenSeams {
        boundary_edges: usize,
        non_manifold_edges: usize,
    },

    #[error("Reconstruction of voxel {id} failed: {source}")]
    VoxelFailed {
        id: VoxelId,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Wrap an error raised while reconstructing one voxel
    pub fn voxel(id: VoxelId, source: Error) -> Self {
        Error::VoxelFailed {
            id,
            source: Box::new(source),
        }
    }

    /// Whether the error is an empty cut surface, possibly wrapped in a voxel failure
    pub fn is_empty_mesh(&self) -> bool {
        match self {
            Error::EmptyMesh(_) => true,
            Error::VoxelFailed { source, .. } => source.is_empty_mesh(),
            _ => false,
        }
    }
}

/// Result type alias for densecut operations
pub type Result<T> = std::result::Result<T, Error>;
