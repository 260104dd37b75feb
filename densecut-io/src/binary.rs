//! Tagged binary files for cached intermediate results
//!
//! Every file starts with a four byte tag followed by the bincode encoding of
//! its payload. Files are written under a temporary name and renamed into
//! place, so an interrupted run never leaves a truncated cache behind.

use crate::error::IoError;
use densecut_core::{CameraId, Result, TriangleMesh};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Tag of per-vertex camera lists
pub const ARRAYS_TAG: [u8; 4] = *b"DCAA";
/// Tag of binary meshes
pub const MESH_TAG: [u8; 4] = *b"DCMS";

fn temporary_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

/// Write `value` to `path` behind `tag`
pub fn save_tagged<T, P>(path: P, tag: [u8; 4], value: &T) -> Result<()>
where
    T: Serialize + ?Sized,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let partial = temporary_path(path);
    {
        let mut writer = BufWriter::new(File::create(&partial)?);
        writer.write_all(&tag)?;
        bincode::serialize_into(&mut writer, value).map_err(IoError::from)?;
        writer.flush()?;
    }
    fs::rename(&partial, path)?;
    Ok(())
}

/// Read a value written by [`save_tagged`], checking its tag
pub fn load_tagged<T, P>(path: P, tag: [u8; 4]) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    if !path.exists() {
        return Err(IoError::FileNotFound {
            path: path.display().to_string(),
        }
        .into());
    }

    let mut reader = BufReader::new(File::open(path)?);
    let mut found = [0u8; 4];
    reader.read_exact(&mut found)?;
    if found != tag {
        return Err(IoError::InvalidFormat {
            format: format!(
                "{}: expected tag {:?}, found {:?}",
                path.display(),
                String::from_utf8_lossy(&tag),
                String::from_utf8_lossy(&found)
            ),
        }
        .into());
    }

    let value = bincode::deserialize_from(reader).map_err(IoError::from)?;
    Ok(value)
}

/// Save per-vertex camera lists
pub fn save_array_of_arrays<P: AsRef<Path>>(path: P, arrays: &[Vec<CameraId>]) -> Result<()> {
    save_tagged(path, ARRAYS_TAG, arrays)
}

pub fn load_array_of_arrays<P: AsRef<Path>>(path: P) -> Result<Vec<Vec<CameraId>>> {
    load_tagged(path, ARRAYS_TAG)
}

pub fn save_mesh<P: AsRef<Path>>(path: P, mesh: &TriangleMesh) -> Result<()> {
    save_tagged(path, MESH_TAG, mesh)
}

pub fn load_mesh<P: AsRef<Path>>(path: P) -> Result<TriangleMesh> {
    load_tagged(path, MESH_TAG)
}
