//! Core traits for densecut

use crate::camera::{Camera, CameraId};
use crate::error::Result;
use crate::hexahedron::Aabb;
use crate::mesh::TriangleMesh;
use crate::point::*;
use crate::track::Track;

/// Source of calibrated cameras and candidate point tracks.
///
/// Implementations are shared read-only across reconstruction threads.
pub trait VisibilityProvider: Sync {
    /// All calibrated cameras of the scene
    fn cameras(&self) -> &[Camera];

    /// Visit every candidate track once, in a stable order.
    ///
    /// Implementations hand tracks over as they are produced, so callers
    /// that only aggregate never hold the whole set. An error returned by
    /// `visit` stops the walk and is passed through.
    fn for_each_track(&self, visit: &mut dyn FnMut(Track) -> Result<()>) -> Result<()>;

    /// Collect every candidate track into memory
    fn tracks(&self) -> Result<Vec<Track>> {
        let mut tracks = Vec::new();
        self.for_each_track(&mut |track| {
            tracks.push(track);
            Ok(())
        })?;
        Ok(tracks)
    }

    /// Look up a camera by id
    fn camera(&self, id: CameraId) -> Option<&Camera> {
        self.cameras().iter().find(|camera| camera.id == id)
    }
}

/// Trait for objects with a spatial extent
pub trait Bounded {
    /// Get the bounding box, `None` for empty objects
    fn bounding_box(&self) -> Option<Aabb>;

    /// Get the center point
    fn center(&self) -> Option<Point3d> {
        self.bounding_box().map(|aabb| aabb.center())
    }
}

impl Bounded for TriangleMesh {
    fn bounding_box(&self) -> Option<Aabb> {
        Aabb::from_points(&self.vertices)
    }
}

impl Bounded for [Track] {
    fn bounding_box(&self) -> Option<Aabb> {
        Aabb::from_points(self.iter().map(|track| &track.position))
    }
}

/// Provider over cameras and tracks already held in memory
#[derive(Debug, Clone, Default)]
pub struct StaticScene {
    pub cameras: Vec<Camera>,
    pub tracks: Vec<Track>,
}

impl StaticScene {
    pub fn new(cameras: Vec<Camera>, tracks: Vec<Track>) -> Self {
        Self { cameras, tracks }
    }
}

impl VisibilityProvider for StaticScene {
    fn cameras(&self) -> &[Camera] {
        &self.cameras
    }

    fn for_each_track(&self, visit: &mut dyn FnMut(Track) -> Result<()>) -> Result<()> {
        self.tracks.iter().cloned().try_for_each(visit)
    }
}
