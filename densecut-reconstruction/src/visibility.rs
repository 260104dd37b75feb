//! Visibility voting along camera-to-point rays
//!
//! Every observation of a point by a camera is a segment of free space. The
//! segment is walked cell by cell through the tetrahedralization: crossed
//! cells and faces collect "outside" evidence, and the cell right behind the
//! point collects "inside" evidence.

use crate::delaunay::{orient, CellId, Tetrahedralization, VertexId, FACETS, NO_CELL};
use crate::parallel::parallel_fold;
use densecut_core::Point3d;
use std::collections::HashMap;

/// One observation: a camera center vertex seeing a point vertex
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisibilityRay {
    pub camera: VertexId,
    pub point: VertexId,
    pub weight: f64,
}

/// How a ray walk ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RayOutcome {
    /// The walk reached a cell incident to the point
    Reached,
    /// Camera and point share an edge, no cell lies in between
    Adjacent,
    /// The walk hit a degenerate configuration and was abandoned
    Lost,
}

/// Cells crossed by one ray
#[derive(Debug, Clone, PartialEq)]
pub struct RayWalk {
    /// Crossed cells with the local index of the face the ray leaves through
    pub crossed: Vec<(CellId, usize)>,
    /// First cell behind the point along the ray
    pub behind: Option<CellId>,
    pub outcome: RayOutcome,
}

/// Accumulated votes per cell
#[derive(Debug, Clone, PartialEq)]
pub struct VoteTable {
    pub inside: Vec<f64>,
    pub outside: Vec<f64>,
    /// Crossing votes per cell face, indexed like the cell's vertices
    pub crossings: Vec<[f64; 4]>,
    pub reached_rays: usize,
    pub adjacent_rays: usize,
    pub lost_rays: usize,
}

impl VoteTable {
    pub fn new(cells: usize) -> Self {
        Self {
            inside: vec![0.0; cells],
            outside: vec![0.0; cells],
            crossings: vec![[0.0; 4]; cells],
            reached_rays: 0,
            adjacent_rays: 0,
            lost_rays: 0,
        }
    }

    /// Additive merge of two private tables
    pub fn merge(mut self, other: VoteTable) -> VoteTable {
        for (a, b) in self.inside.iter_mut().zip(&other.inside) {
            *a += b;
        }
        for (a, b) in self.outside.iter_mut().zip(&other.outside) {
            *a += b;
        }
        for (a, b) in self.crossings.iter_mut().zip(&other.crossings) {
            for k in 0..4 {
                a[k] += b[k];
            }
        }
        self.reached_rays += other.reached_rays;
        self.adjacent_rays += other.adjacent_rays;
        self.lost_rays += other.lost_rays;
        self
    }

    pub fn total_rays(&self) -> usize {
        self.reached_rays + self.adjacent_rays + self.lost_rays
    }
}

/// Walks rays through a tetrahedralization
pub struct RayCaster<'a> {
    tetra: &'a Tetrahedralization,
    camera_stars: HashMap<VertexId, Vec<CellId>>,
    inside_weight: f64,
}

impl<'a> RayCaster<'a> {
    /// Prepare a caster for rays starting at the given camera vertices
    pub fn new<I>(tetra: &'a Tetrahedralization, camera_vertices: I, inside_weight: f64) -> Self
    where
        I: IntoIterator<Item = VertexId>,
    {
        let camera_stars = camera_vertices
            .into_iter()
            .map(|v| (v, tetra.incident_cells(v)))
            .collect();
        Self {
            tetra,
            camera_stars,
            inside_weight,
        }
    }

    /// Whether the line `origin -> target` leaves `cell` through face `face`
    fn leaves_through(&self, cell: CellId, face: usize, origin: &Point3d, target: &Point3d) -> bool {
        let vertices = self.tetra.cell(cell).vertices;
        let [a, b, c] = FACETS[face].map(|k| self.tetra.point(vertices[k]));
        let s0 = orient(origin, target, a, b);
        let s1 = orient(origin, target, b, c);
        let s2 = orient(origin, target, c, a);
        s0 <= 0.0 && s1 <= 0.0 && s2 <= 0.0 && (s0 < 0.0 || s1 < 0.0 || s2 < 0.0)
    }

    /// Cell of `star` (all incident to `apex`) that the ray from `apex`
    /// towards `target` enters first
    fn first_cell(&self, star: &[CellId], apex: VertexId, target: &Point3d) -> Option<CellId> {
        let origin = self.tetra.point(apex);
        star.iter().copied().find(|&c| {
            self.tetra
                .cell(c)
                .index_of(apex)
                .map_or(false, |k| self.leaves_through(c, k, origin, target))
        })
    }

    /// Walk one ray from its camera to its point
    pub fn walk(&self, ray: &VisibilityRay) -> RayWalk {
        let lost = RayWalk {
            crossed: Vec::new(),
            behind: None,
            outcome: RayOutcome::Lost,
        };
        if ray.camera == ray.point {
            return lost;
        }

        let origin = *self.tetra.point(ray.camera);
        let target = *self.tetra.point(ray.point);
        let beyond = target + (target - origin);
        let behind = self
            .first_cell(&self.tetra.incident_cells(ray.point), ray.point, &beyond);

        let computed;
        let star = match self.camera_stars.get(&ray.camera) {
            Some(star) => star,
            None => {
                computed = self.tetra.incident_cells(ray.camera);
                &computed
            }
        };
        if star.iter().any(|&c| self.tetra.cell(c).has_vertex(ray.point)) {
            return RayWalk {
                crossed: Vec::new(),
                behind,
                outcome: RayOutcome::Adjacent,
            };
        }

        let Some(first) = self.first_cell(star, ray.camera, &target) else {
            return lost;
        };
        let Some(exit) = self.tetra.cell(first).index_of(ray.camera) else {
            return lost;
        };

        let mut crossed = vec![(first, exit)];
        let mut current = first;
        let mut face = exit;
        for _ in 0..self.tetra.cell_count() {
            let next = self.tetra.cell(current).neighbors[face];
            let entry = match self.tetra.mirror_index(current, face) {
                Some(entry) if next != NO_CELL => entry,
                _ => return lost,
            };
            current = next;
            if self.tetra.cell(current).has_vertex(ray.point) {
                return RayWalk {
                    crossed,
                    behind,
                    outcome: RayOutcome::Reached,
                };
            }
            match (0..4).find(|&j| j != entry && self.leaves_through(current, j, &origin, &target)) {
                Some(j) => {
                    crossed.push((current, j));
                    face = j;
                }
                None => return lost,
            }
        }
        lost
    }

    /// Walk one ray and add its votes to `table`
    pub fn cast(&self, ray: &VisibilityRay, table: &mut VoteTable) {
        let walk = self.walk(ray);
        match walk.outcome {
            RayOutcome::Lost => {
                table.lost_rays += 1;
                return;
            }
            RayOutcome::Adjacent => table.adjacent_rays += 1,
            RayOutcome::Reached => table.reached_rays += 1,
        }
        for &(cell, face) in &walk.crossed {
            table.outside[cell as usize] += ray.weight;
            table.crossings[cell as usize][face] += ray.weight;
        }
        if let Some(cell) = walk.behind {
            table.inside[cell as usize] += self.inside_weight * ray.weight;
        }
    }

    /// Cast all rays in parallel into private tables, then merge them
    pub fn cast_all(&self, rays: &[VisibilityRay]) -> VoteTable {
        let cells = self.tetra.cell_count();
        parallel_fold(
            rays,
            || VoteTable::new(cells),
            |mut table, ray| {
                self.cast(ray, &mut table);
                table
            },
            VoteTable::merge,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A column of points along the z axis with a camera below it, plus a
    /// ring of points around the column so the rays cross several cells
    fn column_scene() -> (Tetrahedralization, VertexId, Vec<VertexId>) {
        let mut points = vec![Point3d::new(0.3, 0.2, -5.0)];
        for k in 0..5 {
            points.push(Point3d::new(0.0, 0.0, k as f64));
        }
        for k in 0..8 {
            let angle = k as f64 * std::f64::consts::PI / 4.0 + 0.1;
            for z in [-2.0, 0.5, 2.5] {
                points.push(Point3d::new(angle.cos(), angle.sin(), z));
            }
        }
        let tetra = Tetrahedralization::new(&points).unwrap();
        let camera = tetra.input_vertex(0);
        let column = (1..=5).map(|i| tetra.input_vertex(i)).collect();
        (tetra, camera, column)
    }

    #[test]
    fn test_walk_reaches_far_point() {
        let (tetra, camera, column) = column_scene();
        let caster = RayCaster::new(&tetra, [camera], 1.0);
        let ray = VisibilityRay {
            camera,
            point: column[4],
            weight: 1.0,
        };
        let walk = caster.walk(&ray);

        assert_eq!(walk.outcome, RayOutcome::Reached);
        assert!(walk.crossed.len() >= 2);
        assert!(walk.crossed.iter().all(|&(c, _)| !tetra.cell(c).has_vertex(ray.point)));
        // Consecutive crossed cells are neighbors through the exit face
        for pair in walk.crossed.windows(2) {
            let (cell, face) = pair[0];
            assert_eq!(tetra.cell(cell).neighbors[face], pair[1].0);
        }
        let behind = walk.behind.unwrap();
        assert!(tetra.cell(behind).has_vertex(ray.point));
    }

    #[test]
    fn test_votes_land_on_crossed_and_behind_cells() {
        let (tetra, camera, column) = column_scene();
        let caster = RayCaster::new(&tetra, [camera], 2.0);
        let rays: Vec<VisibilityRay> = column
            .iter()
            .map(|&point| VisibilityRay {
                camera,
                point,
                weight: 1.0,
            })
            .collect();

        let table = caster.cast_all(&rays);
        assert_eq!(table.total_rays(), rays.len());
        assert_eq!(table.lost_rays, 0);

        let walks: Vec<RayWalk> = rays.iter().map(|r| caster.walk(r)).collect();
        let crossed: usize = walks.iter().map(|w| w.crossed.len()).sum();
        let outside: f64 = table.outside.iter().sum();
        assert_eq!(outside, crossed as f64);
        let behind = walks.iter().filter(|w| w.behind.is_some()).count();
        let inside: f64 = table.inside.iter().sum();
        assert_eq!(inside, 2.0 * behind as f64);
    }

    #[test]
    fn test_merge_is_additive() {
        let mut a = VoteTable::new(2);
        a.inside[0] = 1.0;
        a.crossings[1][3] = 2.0;
        a.reached_rays = 1;
        let mut b = VoteTable::new(2);
        b.inside[0] = 0.5;
        b.outside[1] = 4.0;
        b.lost_rays = 2;

        let merged = a.merge(b);
        assert_eq!(merged.inside, vec![1.5, 0.0]);
        assert_eq!(merged.outside, vec![0.0, 4.0]);
        assert_eq!(merged.crossings[1], [0.0, 0.0, 0.0, 2.0]);
        assert_eq!(merged.total_rays(), 3);
    }

    #[test]
    fn test_ray_to_itself_is_lost() {
        let (tetra, camera, _) = column_scene();
        let caster = RayCaster::new(&tetra, [camera], 1.0);
        let walk = caster.walk(&VisibilityRay {
            camera,
            point: camera,
            weight: 1.0,
        });
        assert_eq!(walk.outcome, RayOutcome::Lost);
    }
}
