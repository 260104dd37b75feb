//! Point and vector types

use nalgebra::{Point3, Vector3};

pub type Point3d = Point3<f64>;
pub type Vector3d = Vector3<f64>;

/// Centroid of a triangle
pub fn triangle_centroid(a: &Point3d, b: &Point3d, c: &Point3d) -> Point3d {
    Point3d::from((a.coords + b.coords + c.coords) / 3.0)
}

/// Twice the area of a triangle
pub fn triangle_double_area(a: &Point3d, b: &Point3d, c: &Point3d) -> f64 {
    (b - a).cross(&(c - a)).norm()
}
