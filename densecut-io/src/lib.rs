//! I/O operations for densecut
//!
//! This crate reads the inputs of the meshing pipeline (configuration file,
//! cameras, filtered depth maps) and writes its outputs and cache files
//! (OBJ meshes, tagged binary meshes, point lists and camera lists).

pub mod binary;
pub mod config;
pub mod depth_map;
pub mod error;
pub mod obj;

pub use binary::*;
pub use config::*;
pub use depth_map::*;
pub use error::*;

use densecut_core::{Result, TriangleMesh};
use std::path::Path;

/// Trait for reading meshes from files
pub trait MeshReader {
    fn read_mesh<P: AsRef<Path>>(path: P) -> Result<TriangleMesh>;
}

/// Trait for writing meshes to files
pub trait MeshWriter {
    fn write_mesh<P: AsRef<Path>>(mesh: &TriangleMesh, path: P) -> Result<()>;
}

/// Auto-detect format and read mesh
pub fn read_mesh<P: AsRef<Path>>(path: P) -> Result<TriangleMesh> {
    let path = path.as_ref();
    match path.extension().and_then(|s| s.to_str()) {
        Some("obj") => obj::ObjReader::read_mesh(path),
        Some("bin") => binary::load_mesh(path),
        _ => Err(densecut_core::Error::UnsupportedFormat(format!(
            "Unsupported mesh format: {:?}",
            path.extension()
        ))),
    }
}

/// Auto-detect format and write mesh
pub fn write_mesh<P: AsRef<Path>>(mesh: &TriangleMesh, path: P) -> Result<()> {
    let path = path.as_ref();
    match path.extension().and_then(|s| s.to_str()) {
        Some("obj") => obj::ObjWriter::write_mesh(mesh, path),
        Some("bin") => binary::save_mesh(path, mesh),
        _ => Err(densecut_core::Error::UnsupportedFormat(format!(
            "Unsupported mesh format: {:?}",
            path.extension()
        ))),
    }
}

#[cfg(test)]
mod tests;
