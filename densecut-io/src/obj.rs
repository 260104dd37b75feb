//! OBJ format support

use crate::error::IoError;
use crate::{MeshReader, MeshWriter};
use densecut_core::{Point3d, Result, TriangleMesh};
use obj::ObjData;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

pub struct ObjReader;
pub struct ObjWriter;

impl MeshReader for ObjReader {
    /// Read positions and faces. Polygons with more than three corners are
    /// fan-triangulated from their first corner.
    fn read_mesh<P: AsRef<Path>>(path: P) -> Result<TriangleMesh> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);
        let data = ObjData::load_buf(reader).map_err(|e| IoError::ParseError {
            message: format!("{}: {}", path.display(), e),
        })?;

        let vertices: Vec<Point3d> = data
            .position
            .iter()
            .map(|p| Point3d::new(p[0] as f64, p[1] as f64, p[2] as f64))
            .collect();

        let mut faces = Vec::new();
        for poly in data
            .objects
            .iter()
            .flat_map(|object| &object.groups)
            .flat_map(|group| &group.polys)
        {
            let corners: Vec<usize> = poly.0.iter().map(|tuple| tuple.0).collect();
            if corners.len() < 3 {
                return Err(IoError::ParseError {
                    message: format!(
                        "{}: face with {} corners",
                        path.display(),
                        corners.len()
                    ),
                }
                .into());
            }
            if let Some(&bad) = corners.iter().find(|&&c| c >= vertices.len()) {
                return Err(IoError::ParseError {
                    message: format!(
                        "{}: face references vertex {} of {}",
                        path.display(),
                        bad + 1,
                        vertices.len()
                    ),
                }
                .into());
            }
            for k in 1..corners.len() - 1 {
                faces.push([corners[0], corners[k], corners[k + 1]]);
            }
        }

        Ok(TriangleMesh::from_vertices_and_faces(vertices, faces))
    }
}

impl MeshWriter for ObjWriter {
    fn write_mesh<P: AsRef<Path>>(mesh: &TriangleMesh, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut writer = BufWriter::new(File::create(path)?);
        writeln!(writer, "# densecut mesh")?;
        writeln!(
            writer,
            "# {} vertices, {} faces",
            mesh.vertex_count(),
            mesh.face_count()
        )?;

        match &mesh.colors {
            Some(colors) => {
                for (v, color) in mesh.vertices.iter().zip(colors) {
                    writeln!(
                        writer,
                        "v {} {} {} {:.4} {:.4} {:.4}",
                        v.x,
                        v.y,
                        v.z,
                        color[0] as f64 / 255.0,
                        color[1] as f64 / 255.0,
                        color[2] as f64 / 255.0
                    )?;
                }
            }
            None => {
                for v in &mesh.vertices {
                    writeln!(writer, "v {} {} {}", v.x, v.y, v.z)?;
                }
            }
        }

        for face in &mesh.faces {
            writeln!(writer, "f {} {} {}", face[0] + 1, face[1] + 1, face[2] + 1)?;
        }
        writer.flush()?;
        Ok(())
    }
}
