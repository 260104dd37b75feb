//! Mesh data structures and functionality

use crate::camera::CameraId;
use crate::error::{Error, Result};
use crate::point::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A triangle mesh with vertices and faces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriangleMesh {
    pub vertices: Vec<Point3d>,
    pub faces: Vec<[usize; 3]>,
    pub colors: Option<Vec<[u8; 3]>>,
}

impl TriangleMesh {
    /// Create a new empty mesh
    pub fn new() -> Self {
        Self {
            vertices: Vec::new(),
            faces: Vec::new(),
            colors: None,
        }
    }

    /// Create a mesh from vertices and faces
    pub fn from_vertices_and_faces(vertices: Vec<Point3d>, faces: Vec<[usize; 3]>) -> Self {
        Self {
            vertices,
            faces,
            colors: None,
        }
    }

    /// Get the number of vertices
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Get the number of faces
    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// Check if the mesh is empty
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() || self.faces.is_empty()
    }

    /// Add a vertex to the mesh
    pub fn add_vertex(&mut self, vertex: Point3d) -> usize {
        let index = self.vertices.len();
        self.vertices.push(vertex);
        index
    }

    /// Add a face to the mesh
    pub fn add_face(&mut self, face: [usize; 3]) {
        self.faces.push(face);
    }

    /// Set vertex colors
    pub fn set_colors(&mut self, colors: Vec<[u8; 3]>) {
        if colors.len() == self.vertices.len() {
            self.colors = Some(colors);
        }
    }

    pub fn face_centroid(&self, face: usize) -> Point3d {
        let [a, b, c] = self.faces[face];
        triangle_centroid(&self.vertices[a], &self.vertices[b], &self.vertices[c])
    }

    /// Check that every face references three distinct, existing vertices
    pub fn validate(&self) -> Result<()> {
        if let Some(colors) = &self.colors {
            if colors.len() != self.vertices.len() {
                return Err(Error::InvalidData(format!(
                    "Mesh has {} colors for {} vertices",
                    colors.len(),
                    self.vertices.len()
                )));
            }
        }
        for (index, face) in self.faces.iter().enumerate() {
            if face.iter().any(|&v| v >= self.vertices.len()) {
                return Err(Error::InvalidData(format!(
                    "Face {} references a vertex out of range ({:?}, {} vertices)",
                    index,
                    face,
                    self.vertices.len()
                )));
            }
            if face[0] == face[1] || face[1] == face[2] || face[0] == face[2] {
                return Err(Error::InvalidData(format!(
                    "Face {} repeats a vertex: {:?}",
                    index, face
                )));
            }
        }
        Ok(())
    }

    /// Number of faces sharing each undirected edge
    pub fn edge_face_counts(&self) -> HashMap<(usize, usize), usize> {
        let mut counts = HashMap::new();
        for face in &self.faces {
            for k in 0..3 {
                let (a, b) = (face[k], face[(k + 1) % 3]);
                *counts.entry((a.min(b), a.max(b))).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Whether every edge is shared by exactly two faces with opposite
    /// directions (closed, consistently oriented, edge-manifold surface)
    pub fn is_watertight(&self) -> bool {
        if self.faces.is_empty() {
            return false;
        }
        let mut directed: HashMap<(usize, usize), usize> = HashMap::new();
        for face in &self.faces {
            for k in 0..3 {
                *directed.entry((face[k], face[(k + 1) % 3])).or_insert(0) += 1;
            }
        }
        directed
            .iter()
            .all(|(&(a, b), &count)| count == 1 && directed.get(&(b, a)) == Some(&1))
    }

    /// Drop vertices no face references.
    ///
    /// Returns, for every old vertex, its new index if it survived.
    pub fn remove_unreferenced_vertices(&mut self) -> Vec<Option<usize>> {
        let mut remap = vec![None; self.vertices.len()];
        let mut next = 0;
        for face in &self.faces {
            for &v in face {
                if remap[v].is_none() {
                    remap[v] = Some(next);
                    next += 1;
                }
            }
        }

        let mut vertices = vec![Point3d::origin(); next];
        let mut colors = self.colors.as_ref().map(|_| vec![[0u8; 3]; next]);
        for (old, new) in remap.iter().enumerate() {
            if let Some(new) = *new {
                vertices[new] = self.vertices[old];
                if let (Some(dst), Some(src)) = (colors.as_mut(), self.colors.as_ref()) {
                    dst[new] = src[old];
                }
            }
        }
        for face in &mut self.faces {
            for v in face.iter_mut() {
                if let Some(new) = remap[*v] {
                    *v = new;
                }
            }
        }
        self.vertices = vertices;
        self.colors = colors;
        remap
    }

    /// Clear the mesh
    pub fn clear(&mut self) {
        self.vertices.clear();
        self.faces.clear();
        self.colors = None;
    }
}

impl Default for TriangleMesh {
    fn default() -> Self {
        Self::new()
    }
}

/// A mesh together with the cameras that support each of its vertices.
///
/// `point_cameras[i]` lists, in ascending order, the cameras seeing vertex `i`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconstructedMesh {
    pub mesh: TriangleMesh,
    pub point_cameras: Vec<Vec<CameraId>>,
}

impl ReconstructedMesh {
    pub fn new(mesh: TriangleMesh, point_cameras: Vec<Vec<CameraId>>) -> Result<Self> {
        let result = Self {
            mesh,
            point_cameras,
        };
        result.check_alignment()?;
        Ok(result)
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.mesh.is_empty()
    }

    fn check_alignment(&self) -> Result<()> {
        if self.point_cameras.len() != self.mesh.vertex_count() {
            return Err(Error::InvalidData(format!(
                "Camera visibility has {} entries for {} vertices",
                self.point_cameras.len(),
                self.mesh.vertex_count()
            )));
        }
        Ok(())
    }

    /// Check the invariants expected by post-processing: a non-empty, valid
    /// mesh with one camera list per vertex
    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(Error::EmptyMesh("mesh has no faces".to_string()));
        }
        self.mesh.validate()?;
        self.check_alignment()
    }

    /// Sorted, deduplicated union of all per-vertex camera lists
    pub fn used_cameras(&self) -> Vec<CameraId> {
        let mut cameras: Vec<CameraId> = self.point_cameras.iter().flatten().copied().collect();
        cameras.sort_unstable();
        cameras.dedup();
        cameras
    }

    /// Keep the faces accepted by `keep` and compact vertices and camera
    /// lists in lockstep
    pub fn retain_faces<F>(&mut self, mut keep: F)
    where
        F: FnMut(&TriangleMesh, usize) -> bool,
    {
        let kept: Vec<[usize; 3]> = (0..self.mesh.face_count())
            .filter(|&f| keep(&self.mesh, f))
            .map(|f| self.mesh.faces[f])
            .collect();
        self.mesh.faces = kept;
        self.compact();
    }

    /// Remove vertices no face references, keeping camera lists aligned
    pub fn compact(&mut self) {
        let remap = self.mesh.remove_unreferenced_vertices();
        let mut point_cameras = vec![Vec::new(); self.mesh.vertex_count()];
        for (old, new) in remap.into_iter().enumerate() {
            if let (Some(new), Some(cameras)) = (new, self.point_cameras.get_mut(old)) {
                point_cameras[new] = std::mem::take(cameras);
            }
        }
        self.point_cameras = point_cameras;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Closed tetrahedron with outward faces
    fn tetrahedron() -> TriangleMesh {
        TriangleMesh::from_vertices_and_faces(
            vec![
                Point3d::new(0.0, 0.0, 0.0),
                Point3d::new(1.0, 0.0, 0.0),
                Point3d::new(0.0, 1.0, 0.0),
                Point3d::new(0.0, 0.0, 1.0),
            ],
            vec![[0, 2, 1], [0, 1, 3], [1, 2, 3], [0, 3, 2]],
        )
    }

    #[test]
    fn test_closed_tetrahedron_is_watertight() {
        let mesh = tetrahedron();
        assert!(mesh.validate().is_ok());
        assert!(mesh.is_watertight());
        assert!(mesh.edge_face_counts().values().all(|&c| c == 2));
    }

    #[test]
    fn test_open_or_flipped_surface_is_not_watertight() {
        let mut open = tetrahedron();
        open.faces.pop();
        assert!(!open.is_watertight());

        let mut flipped = tetrahedron();
        flipped.faces[0] = [0, 1, 2];
        assert!(!flipped.is_watertight());
    }

    #[test]
    fn test_validate_rejects_bad_faces() {
        let mut mesh = tetrahedron();
        mesh.add_face([0, 0, 1]);
        assert!(mesh.validate().is_err());

        let mut mesh = tetrahedron();
        mesh.add_face([0, 1, 7]);
        assert!(mesh.validate().is_err());
    }

    #[test]
    fn test_retain_faces_keeps_cameras_aligned() {
        let cameras = vec![vec![0], vec![1], vec![2], vec![3]];
        let mut result = ReconstructedMesh::new(tetrahedron(), cameras).unwrap();

        // Only the bottom face [0, 2, 1] survives
        result.retain_faces(|_, face| face == 0);

        assert_eq!(result.mesh.face_count(), 1);
        assert_eq!(result.mesh.vertex_count(), 3);
        assert_eq!(result.point_cameras, vec![vec![0], vec![2], vec![1]]);
        assert_eq!(result.used_cameras(), vec![0, 1, 2]);
        for (v, cams) in result.point_cameras.iter().enumerate() {
            let original = result.mesh.vertices[v];
            let expected = match (original.x > 0.5, original.y > 0.5) {
                (true, _) => 1,
                (_, true) => 2,
                _ => 0,
            };
            assert_eq!(cams, &vec![expected]);
        }
    }

    #[test]
    fn test_misaligned_cameras_are_rejected() {
        assert!(ReconstructedMesh::new(tetrahedron(), vec![vec![0]]).is_err());
        assert!(ReconstructedMesh::empty().validate().is_err());
    }
}
