//! Pinhole camera model

use crate::point::*;
use nalgebra::{Matrix3, Point2, Vector3};
use serde::{Deserialize, Serialize};

/// Identifier of a camera (view) in the scene
pub type CameraId = u32;

/// A calibrated pinhole camera.
///
/// `rotation` and `translation` map world coordinates into the camera frame
/// (`x_cam = R x_world + t`); the camera looks down its local +z axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    pub id: CameraId,
    pub width: u32,
    pub height: u32,
    pub intrinsics: Matrix3<f64>,
    pub rotation: Matrix3<f64>,
    pub translation: Vector3d,
}

impl Camera {
    /// Create a camera from its calibration
    pub fn new(
        id: CameraId,
        width: u32,
        height: u32,
        intrinsics: Matrix3<f64>,
        rotation: Matrix3<f64>,
        translation: Vector3d,
    ) -> Self {
        Self {
            id,
            width,
            height,
            intrinsics,
            rotation,
            translation,
        }
    }

    /// Create a camera at `eye` looking at `target`, with the principal point
    /// at the image center.
    ///
    /// Returns `None` when `up` is parallel to the viewing direction.
    pub fn look_at(
        id: CameraId,
        width: u32,
        height: u32,
        focal: f64,
        eye: Point3d,
        target: Point3d,
        up: Vector3d,
    ) -> Option<Self> {
        let forward = (target - eye).try_normalize(1e-12)?;
        let right = (-up).cross(&forward).try_normalize(1e-12)?;
        let down = forward.cross(&right);

        let rotation = Matrix3::from_rows(&[
            right.transpose(),
            down.transpose(),
            forward.transpose(),
        ]);
        let translation = -(rotation * eye.coords);
        let intrinsics = Matrix3::new(
            focal,
            0.0,
            width as f64 / 2.0,
            0.0,
            focal,
            height as f64 / 2.0,
            0.0,
            0.0,
            1.0,
        );

        Some(Self::new(id, width, height, intrinsics, rotation, translation))
    }

    /// Optical center in world coordinates
    pub fn center(&self) -> Point3d {
        Point3d::from(-(self.rotation.transpose() * self.translation))
    }

    /// Unit viewing direction in world coordinates
    pub fn viewing_direction(&self) -> Vector3d {
        self.rotation.row(2).transpose()
    }

    /// Transform a world point into the camera frame
    pub fn to_camera(&self, point: &Point3d) -> Vector3d {
        self.rotation * point.coords + self.translation
    }

    /// Project a world point to pixel coordinates, `None` if it is behind the camera
    pub fn project(&self, point: &Point3d) -> Option<Point2<f64>> {
        let local = self.to_camera(point);
        if local.z <= 0.0 {
            return None;
        }
        let pixel = self.intrinsics * local;
        Some(Point2::new(pixel.x / pixel.z, pixel.y / pixel.z))
    }

    /// Whether a world point projects inside the image
    pub fn sees(&self, point: &Point3d) -> bool {
        match self.project(point) {
            Some(pixel) => {
                pixel.x >= 0.0
                    && pixel.y >= 0.0
                    && pixel.x < self.width as f64
                    && pixel.y < self.height as f64
            }
            None => false,
        }
    }

    /// Back-project a pixel at a given z-depth into world coordinates
    pub fn back_project(&self, u: f64, v: f64, depth: f64) -> Option<Point3d> {
        let inverse = self.intrinsics.try_inverse()?;
        let ray = inverse * Vector3::new(u, v, 1.0);
        let local = ray * depth;
        Some(Point3d::from(
            self.rotation.transpose() * (local - self.translation),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn front_camera() -> Camera {
        Camera::look_at(
            3,
            640,
            480,
            500.0,
            Point3d::new(0.0, 0.0, -5.0),
            Point3d::origin(),
            Vector3d::new(0.0, 1.0, 0.0),
        )
        .unwrap()
    }

    #[test]
    fn test_look_at_center_and_direction() {
        let camera = front_camera();
        assert_relative_eq!(camera.center(), Point3d::new(0.0, 0.0, -5.0), epsilon = 1e-12);
        assert_relative_eq!(
            camera.viewing_direction(),
            Vector3d::new(0.0, 0.0, 1.0),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_target_projects_to_principal_point() {
        let camera = front_camera();
        let pixel = camera.project(&Point3d::origin()).unwrap();
        assert_relative_eq!(pixel.x, 320.0, epsilon = 1e-9);
        assert_relative_eq!(pixel.y, 240.0, epsilon = 1e-9);
        assert!(camera.sees(&Point3d::new(0.5, 0.5, 0.0)));
        assert!(!camera.sees(&Point3d::new(0.0, 0.0, -10.0)));
    }

    #[test]
    fn test_back_projection_uses_z_depth() {
        let camera = front_camera();
        let point = Point3d::new(0.4, -0.3, 1.0);
        let pixel = camera.project(&point).unwrap();
        let depth = camera.to_camera(&point).z;
        let restored = camera.back_project(pixel.x, pixel.y, depth).unwrap();
        assert_relative_eq!(restored, point, epsilon = 1e-9);
    }

    #[test]
    fn test_look_at_rejects_parallel_up() {
        let camera = Camera::look_at(
            0,
            10,
            10,
            1.0,
            Point3d::new(0.0, 5.0, 0.0),
            Point3d::origin(),
            Vector3d::new(0.0, 1.0, 0.0),
        );
        assert!(camera.is_none());
    }
}
