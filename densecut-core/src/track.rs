//! Candidate 3D points with their supporting cameras

use crate::camera::CameraId;
use crate::point::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A candidate surface point seen by one or more cameras.
///
/// Each supporting camera carries the photo-consistency similarity of the
/// observation; lower values are better.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub position: Point3d,
    pub cameras: BTreeMap<CameraId, f32>,
}

impl Track {
    /// Create a track without observations
    pub fn new(position: Point3d) -> Self {
        Self {
            position,
            cameras: BTreeMap::new(),
        }
    }

    /// Builder-style observation
    pub fn with_camera(mut self, camera: CameraId, similarity: f32) -> Self {
        self.add_observation(camera, similarity);
        self
    }

    /// Record an observation, keeping the best similarity per camera
    pub fn add_observation(&mut self, camera: CameraId, similarity: f32) {
        self.cameras
            .entry(camera)
            .and_modify(|best| *best = best.min(similarity))
            .or_insert(similarity);
    }

    /// Supporting camera ids in ascending order
    pub fn supporting_cameras(&self) -> impl Iterator<Item = CameraId> + '_ {
        self.cameras.keys().copied()
    }

    pub fn support_count(&self) -> usize {
        self.cameras.len()
    }
}
