//! Post-processing of the merged mesh
//!
//! The pipeline hands the merged mesh to a [`MeshPostProcessor`] once every
//! unit is reconstructed. Smoothing or simplification plug in here.

use densecut_core::{
    triangle_double_area, Camera, CameraId, Hexahedron, ReconstructedMesh, Result,
    VisibilityProvider,
};
use tracing::debug;

/// Everything a post-processor may use
pub struct PostProcessInput<'a> {
    /// Valid, non-empty mesh with one camera list per vertex
    pub mesh: ReconstructedMesh,
    /// Sorted cameras referenced by the mesh
    pub used_cameras: Vec<CameraId>,
    pub cameras: &'a [Camera],
    pub provider: &'a dyn VisibilityProvider,
    pub exclusions: &'a [Hexahedron],
}

/// Final mesh cleanup step
pub trait MeshPostProcessor: Send + Sync {
    fn process(&self, input: PostProcessInput<'_>) -> Result<ReconstructedMesh>;
}

/// Drops faces inside exclusion regions and degenerate faces, then
/// unreferenced vertices
#[derive(Debug, Clone, Default)]
pub struct BasicCleanup {
    /// Faces whose doubled area is at or below this value are degenerate
    pub min_double_area: f64,
}

impl MeshPostProcessor for BasicCleanup {
    fn process(&self, input: PostProcessInput<'_>) -> Result<ReconstructedMesh> {
        let mut mesh = input.mesh;
        let before = mesh.mesh.face_count();
        let exclusions = input.exclusions;
        let min_double_area = self.min_double_area;

        mesh.retain_faces(|m, f| {
            let [a, b, c] = m.faces[f];
            if a == b || b == c || a == c {
                return false;
            }
            let (pa, pb, pc) = (&m.vertices[a], &m.vertices[b], &m.vertices[c]);
            if triangle_double_area(pa, pb, pc) <= min_double_area {
                return false;
            }
            let centroid = m.face_centroid(f);
            !exclusions.iter().any(|h| h.contains(&centroid))
        });

        debug!(
            "Basic cleanup removed {} of {} faces",
            before - mesh.mesh.face_count(),
            before
        );
        Ok(mesh)
    }
}
