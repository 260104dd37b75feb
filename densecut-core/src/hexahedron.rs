//! Boxes, hexahedra and voxel records used to partition the scene

use crate::error::{Error, Result};
use crate::point::*;
use serde::{Deserialize, Serialize};

/// Stable identifier of a voxel inside a space grid
pub type VoxelId = u32;

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Point3d,
    pub max: Point3d,
}

impl Aabb {
    pub fn new(min: Point3d, max: Point3d) -> Self {
        Self { min, max }
    }

    /// Tightest box around a set of points, `None` when the set is empty
    pub fn from_points<'a, I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a Point3d>,
    {
        let mut iter = points.into_iter();
        let first = *iter.next()?;
        Some(iter.fold(Self::new(first, first), |mut acc, p| {
            acc.include(p);
            acc
        }))
    }

    /// Grow the box to contain `point`
    pub fn include(&mut self, point: &Point3d) {
        self.min = self.min.inf(point);
        self.max = self.max.sup(point);
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb::new(self.min.inf(&other.min), self.max.sup(&other.max))
    }

    pub fn extent(&self) -> Vector3d {
        self.max - self.min
    }

    pub fn center(&self) -> Point3d {
        nalgebra::center(&self.min, &self.max)
    }

    pub fn max_extent(&self) -> f64 {
        self.extent().max()
    }

    /// Closed containment
    pub fn contains(&self, point: &Point3d) -> bool {
        (0..3).all(|axis| point[axis] >= self.min[axis] && point[axis] <= self.max[axis])
    }

    /// Half-open containment: `min <= p < max` on every axis
    pub fn contains_half_open(&self, point: &Point3d) -> bool {
        (0..3).all(|axis| point[axis] >= self.min[axis] && point[axis] < self.max[axis])
    }

    /// Whether the interiors of both boxes overlap with positive volume
    pub fn overlaps(&self, other: &Aabb) -> bool {
        (0..3).all(|axis| self.min[axis] < other.max[axis] && other.min[axis] < self.max[axis])
    }

    /// Box grown by `margin` on every side
    pub fn expanded(&self, margin: f64) -> Aabb {
        let delta = Vector3d::repeat(margin);
        Aabb::new(self.min - delta, self.max + delta)
    }

    /// Smallest cube sharing this box's center that contains the box
    pub fn to_cube(&self) -> Aabb {
        let half = Vector3d::repeat(self.max_extent() / 2.0);
        let center = self.center();
        Aabb::new(center - half, center + half)
    }

    pub fn volume(&self) -> f64 {
        let extent = self.extent();
        extent.x * extent.y * extent.z
    }
}

/// A six-faced cell given by its eight corners.
///
/// Corners 0-3 walk the bottom face counter-clockwise seen from above and
/// corners 4-7 repeat that walk on the top face. Containment queries use the
/// axis-aligned bounds of the corners, which is exact for the scene-aligned
/// blocks produced by the partitioner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hexahedron {
    pub corners: [Point3d; 8],
}

impl Hexahedron {
    pub fn from_aabb(aabb: &Aabb) -> Self {
        let (lo, hi) = (aabb.min, aabb.max);
        Self {
            corners: [
                Point3d::new(lo.x, lo.y, lo.z),
                Point3d::new(hi.x, lo.y, lo.z),
                Point3d::new(hi.x, hi.y, lo.z),
                Point3d::new(lo.x, hi.y, lo.z),
                Point3d::new(lo.x, lo.y, hi.z),
                Point3d::new(hi.x, lo.y, hi.z),
                Point3d::new(hi.x, hi.y, hi.z),
                Point3d::new(lo.x, hi.y, hi.z),
            ],
        }
    }

    pub fn aabb(&self) -> Aabb {
        let mut aabb = Aabb::new(self.corners[0], self.corners[0]);
        for corner in &self.corners[1..] {
            aabb.include(corner);
        }
        aabb
    }

    pub fn contains(&self, point: &Point3d) -> bool {
        self.aabb().contains(point)
    }

    pub fn contains_half_open(&self, point: &Point3d) -> bool {
        self.aabb().contains_half_open(point)
    }

    /// Flatten hexahedra into a point list grouped in eights
    pub fn flatten(hexahedra: &[Hexahedron]) -> Vec<Point3d> {
        hexahedra.iter().flat_map(|h| h.corners).collect()
    }

    /// Rebuild hexahedra from a point list grouped in eights
    pub fn from_flat(points: &[Point3d]) -> Result<Vec<Hexahedron>> {
        if points.len() % 8 != 0 {
            return Err(Error::InvalidData(format!(
                "Hexahedron corner list has {} points, expected a multiple of 8",
                points.len()
            )));
        }
        Ok(points
            .chunks_exact(8)
            .map(|chunk| {
                let mut corners = [Point3d::origin(); 8];
                corners.copy_from_slice(chunk);
                Hexahedron { corners }
            })
            .collect())
    }
}

/// One block of a space grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Voxel {
    pub id: VoxelId,
    /// Integer block coordinates inside the grid
    pub cell: [u32; 3],
    pub hexahedron: Hexahedron,
    /// Face-adjacent voxels, ascending
    pub neighbors: Vec<VoxelId>,
    /// Number of fused candidate points inside the voxel
    pub point_count: usize,
}

impl Voxel {
    pub fn bounds(&self) -> Aabb {
        self.hexahedron.aabb()
    }

    pub fn is_empty(&self) -> bool {
        self.point_count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_half_open_containment() {
        let aabb = Aabb::new(Point3d::origin(), Point3d::new(1.0, 1.0, 1.0));
        assert!(aabb.contains_half_open(&Point3d::origin()));
        assert!(!aabb.contains_half_open(&Point3d::new(1.0, 0.5, 0.5)));
        assert!(aabb.contains(&Point3d::new(1.0, 0.5, 0.5)));
    }

    #[test]
    fn test_touching_boxes_do_not_overlap() {
        let a = Aabb::new(Point3d::origin(), Point3d::new(1.0, 1.0, 1.0));
        let b = Aabb::new(Point3d::new(1.0, 0.0, 0.0), Point3d::new(2.0, 1.0, 1.0));
        let c = Aabb::new(Point3d::new(0.5, 0.5, 0.5), Point3d::new(2.0, 2.0, 2.0));
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
    }

    #[test]
    fn test_cube_keeps_center() {
        let aabb = Aabb::new(Point3d::origin(), Point3d::new(4.0, 2.0, 1.0));
        let cube = aabb.to_cube();
        assert_eq!(cube.center(), aabb.center());
        assert_eq!(cube.extent(), Vector3d::new(4.0, 4.0, 4.0));
    }

    #[test]
    fn test_flat_corner_list_must_group_in_eights() {
        let hexa = Hexahedron::from_aabb(&Aabb::new(
            Point3d::origin(),
            Point3d::new(1.0, 2.0, 3.0),
        ));
        let flat = Hexahedron::flatten(&[hexa, hexa]);
        assert_eq!(flat.len(), 16);
        assert_eq!(Hexahedron::from_flat(&flat).unwrap(), vec![hexa, hexa]);
        assert!(Hexahedron::from_flat(&flat[..7]).is_err());
        assert_eq!(hexa.aabb().max, Point3d::new(1.0, 2.0, 3.0));
    }
}
