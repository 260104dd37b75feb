//! Merge of per-unit meshes into one mesh
//!
//! Vertices closer than a tolerance collapse onto the first one inserted,
//! found through an R*-tree. Camera lists of collapsed vertices are unioned.
//! Faces that become degenerate, or repeat a vertex triple already present,
//! are dropped.

use densecut_core::{CameraId, Point3d, ReconstructedMesh, TriangleMesh};
use rstar::RTree;
use std::collections::{BTreeSet, HashSet};
use tracing::debug;

/// Default distance under which vertices of different parts are merged
pub const DEFAULT_MERGE_TOLERANCE: f64 = 1e-6;

/// A merged vertex position with its index in the output mesh
#[derive(Debug, Clone, Copy, PartialEq)]
struct IndexedVertex {
    point: Point3d,
    index: usize,
}

impl rstar::Point for IndexedVertex {
    type Scalar = f64;
    const DIMENSIONS: usize = 3;

    fn generate(mut generator: impl FnMut(usize) -> Self::Scalar) -> Self {
        Self {
            point: Point3d::new(generator(0), generator(1), generator(2)),
            index: 0,
        }
    }

    fn nth(&self, index: usize) -> Self::Scalar {
        self.point[index]
    }

    fn nth_mut(&mut self, index: usize) -> &mut Self::Scalar {
        &mut self.point[index]
    }
}

/// Incremental mesh merger
pub struct MeshMerger {
    tolerance: f64,
    tree: RTree<IndexedVertex>,
    mesh: TriangleMesh,
    point_cameras: Vec<BTreeSet<CameraId>>,
    faces: HashSet<[usize; 3]>,
    dropped_faces: usize,
}

impl MeshMerger {
    pub fn new(tolerance: f64) -> Self {
        Self {
            tolerance: tolerance.max(0.0),
            tree: RTree::new(),
            mesh: TriangleMesh::new(),
            point_cameras: Vec::new(),
            faces: HashSet::new(),
            dropped_faces: 0,
        }
    }

    /// Index of the merged vertex at `point`, inserting it when no vertex lies
    /// within the tolerance
    fn vertex_index(&mut self, point: Point3d) -> usize {
        let query = IndexedVertex { point, index: 0 };
        let existing = self
            .tree
            .locate_within_distance(query, self.tolerance * self.tolerance)
            .map(|v| v.index)
            .min();
        match existing {
            Some(index) => index,
            None => {
                let index = self.mesh.add_vertex(point);
                self.point_cameras.push(BTreeSet::new());
                self.tree.insert(IndexedVertex { point, index });
                index
            }
        }
    }

    /// Append one part
    pub fn add(&mut self, part: &ReconstructedMesh) {
        let remap: Vec<usize> = part
            .mesh
            .vertices
            .iter()
            .map(|&p| self.vertex_index(p))
            .collect();

        for (old, &new) in remap.iter().enumerate() {
            if let Some(cameras) = part.point_cameras.get(old) {
                self.point_cameras[new].extend(cameras.iter().copied());
            }
        }

        for face in &part.mesh.faces {
            let merged = face.map(|v| remap[v]);
            if merged[0] == merged[1] || merged[1] == merged[2] || merged[0] == merged[2] {
                self.dropped_faces += 1;
                continue;
            }
            let mut key = merged;
            key.sort_unstable();
            if self.faces.insert(key) {
                self.mesh.add_face(merged);
            } else {
                self.dropped_faces += 1;
            }
        }
    }

    pub fn finish(self) -> ReconstructedMesh {
        debug!(
            "Merged mesh: {} vertices, {} faces, {} faces dropped",
            self.mesh.vertex_count(),
            self.mesh.face_count(),
            self.dropped_faces
        );
        ReconstructedMesh {
            mesh: self.mesh,
            point_cameras: self
                .point_cameras
                .into_iter()
                .map(|cams| cams.into_iter().collect())
                .collect(),
        }
    }
}

/// Merge `parts` in order
pub fn join_meshes(parts: &[ReconstructedMesh], tolerance: f64) -> ReconstructedMesh {
    let mut merger = MeshMerger::new(tolerance);
    for part in parts {
        merger.add(part);
    }
    merger.finish()
}

/// Edge defects of a merged surface, the places where neighboring units
/// failed to agree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeamReport {
    /// Edges used by a single face
    pub boundary_edges: usize,
    /// Edges shared by more than two faces
    pub non_manifold_edges: usize,
}

impl SeamReport {
    pub fn of(mesh: &TriangleMesh) -> Self {
        let mut report = SeamReport::default();
        for count in mesh.edge_face_counts().into_values() {
            match count {
                1 => report.boundary_edges += 1,
                c if c > 2 => report.non_manifold_edges += 1,
                _ => {}
            }
        }
        report
    }

    /// No open and no overloaded edge
    pub fn is_closed(&self) -> bool {
        self.boundary_edges == 0 && self.non_manifold_edges == 0
    }
}
