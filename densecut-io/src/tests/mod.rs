//! Test modules for densecut-io
//!
//! File format tests for meshes, tagged cache files, the configuration file
//! and the depth map scene.

mod cache_file_tests;

use std::path::PathBuf;

/// Fresh scratch folder for one test
pub(crate) fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("densecut-io-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}
