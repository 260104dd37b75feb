//! Incremental 3D Delaunay tetrahedralization
//!
//! Bowyer-Watson insertion inside a large enclosing tetrahedron, with exact
//! orientation and in-sphere predicates from the `robust` crate. The four
//! enclosing vertices are kept: cells touching them are the "infinite" cells
//! that bound the scene from outside.

use densecut_core::{Aabb, Error, Point3d, Result};
use robust::{insphere, orient3d, Coord3D};
use std::collections::{HashMap, HashSet};
use tracing::debug;

pub type VertexId = u32;
pub type CellId = u32;

/// Marker for a missing neighbor (outer faces of the enclosing tetrahedron)
pub const NO_CELL: CellId = u32::MAX;

/// Number of enclosing vertices; they occupy ids `0..INFINITE_VERTICES`
pub const INFINITE_VERTICES: u32 = 4;

/// Local vertex indices of the face opposite each vertex, ordered so that the
/// face normal (right-hand rule) points out of the cell.
pub const FACETS: [[usize; 3]; 4] = [[1, 3, 2], [0, 2, 3], [0, 3, 1], [0, 1, 2]];

/// A positively oriented tetrahedron.
///
/// `neighbors[i]` is the cell across the face opposite `vertices[i]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    pub vertices: [VertexId; 4],
    pub neighbors: [CellId; 4],
}

impl Cell {
    pub fn index_of(&self, vertex: VertexId) -> Option<usize> {
        self.vertices.iter().position(|&v| v == vertex)
    }

    pub fn has_vertex(&self, vertex: VertexId) -> bool {
        self.vertices.contains(&vertex)
    }

    /// Vertices of the face opposite local vertex `i`, outward oriented
    pub fn facet(&self, i: usize) -> [VertexId; 3] {
        FACETS[i].map(|k| self.vertices[k])
    }
}

fn coord(p: &Point3d) -> Coord3D<f64> {
    Coord3D {
        x: p.x,
        y: p.y,
        z: p.z,
    }
}

/// Positive when `d` lies below the plane through `a`, `b`, `c` (the triangle
/// appearing counter-clockwise seen from above), i.e. when the tetrahedron
/// `(a, b, c, d)` is positively oriented.
pub fn orient(a: &Point3d, b: &Point3d, c: &Point3d, d: &Point3d) -> f64 {
    orient3d(coord(a), coord(b), coord(c), coord(d))
}

/// Positive when `e` lies strictly inside the sphere through the positively
/// oriented tetrahedron `(a, b, c, d)`
pub fn in_sphere(a: &Point3d, b: &Point3d, c: &Point3d, d: &Point3d, e: &Point3d) -> f64 {
    insphere(coord(a), coord(b), coord(c), coord(d), coord(e))
}

/// Interleave the low 21 bits of three integers
fn morton_code(x: u64, y: u64, z: u64) -> u64 {
    fn spread(mut v: u64) -> u64 {
        v &= 0x1f_ffff;
        v = (v | v << 32) & 0x1f_0000_0000_ffff;
        v = (v | v << 16) & 0x1f_0000_ff00_00ff;
        v = (v | v << 8) & 0x100f_00f0_0f00_f00f;
        v = (v | v << 4) & 0x10c3_0c30_c30c_30c3;
        v = (v | v << 2) & 0x1249_2492_4924_9249;
        v
    }
    spread(x) | spread(y) << 1 | spread(z) << 2
}

/// A Delaunay tetrahedralization of a point set
#[derive(Debug, Clone)]
pub struct Tetrahedralization {
    points: Vec<Point3d>,
    cells: Vec<Cell>,
    vertex_cells: Vec<CellId>,
    input_vertices: Vec<VertexId>,
}

impl Tetrahedralization {
    /// Tetrahedralize `points`. Exactly coincident inputs share one vertex.
    pub fn new(points: &[Point3d]) -> Result<Self> {
        if let Some(bad) = points.iter().find(|p| !p.coords.iter().all(|x| x.is_finite())) {
            return Err(Error::InvalidData(format!(
                "Cannot tetrahedralize a non-finite point {:?}",
                bad
            )));
        }

        let bounds = Aabb::from_points(points)
            .unwrap_or_else(|| Aabb::new(Point3d::origin(), Point3d::origin()));
        let mut builder = Builder::new(&bounds, points.len());

        // Merge coincident points
        let mut unique: HashMap<[u64; 3], VertexId> = HashMap::with_capacity(points.len());
        let mut input_vertices = Vec::with_capacity(points.len());
        for p in points {
            let key = [(p.x + 0.0).to_bits(), (p.y + 0.0).to_bits(), (p.z + 0.0).to_bits()];
            let id = *unique
                .entry(key)
                .or_insert_with(|| builder.push_point(*p));
            input_vertices.push(id);
        }

        // Spatially coherent insertion order keeps point location walks short
        let extent = bounds.max_extent().max(f64::MIN_POSITIVE);
        let scale = ((1u64 << 21) - 1) as f64 / extent;
        let mut order: Vec<(u64, VertexId)> = (INFINITE_VERTICES..builder.points.len() as u32)
            .map(|v| {
                let p = builder.points[v as usize] - bounds.min;
                let code = morton_code(
                    (p.x * scale) as u64,
                    (p.y * scale) as u64,
                    (p.z * scale) as u64,
                );
                (code, v)
            })
            .collect();
        order.sort_unstable();

        for (_, v) in order {
            builder.insert(v)?;
        }

        let tetra = builder.finish(input_vertices);
        debug!(
            "Tetrahedralized {} points into {} cells",
            tetra.finite_vertex_count(),
            tetra.cell_count()
        );
        Ok(tetra)
    }

    /// Vertex assigned to input point `index`
    pub fn input_vertex(&self, index: usize) -> VertexId {
        self.input_vertices[index]
    }

    /// Number of vertices including the four enclosing ones
    pub fn vertex_count(&self) -> usize {
        self.points.len()
    }

    pub fn finite_vertex_count(&self) -> usize {
        self.points.len() - INFINITE_VERTICES as usize
    }

    pub fn point(&self, vertex: VertexId) -> &Point3d {
        &self.points[vertex as usize]
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn cell(&self, cell: CellId) -> &Cell {
        &self.cells[cell as usize]
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn is_infinite_vertex(&self, vertex: VertexId) -> bool {
        vertex < INFINITE_VERTICES
    }

    pub fn is_infinite_cell(&self, cell: CellId) -> bool {
        self.cells[cell as usize]
            .vertices
            .iter()
            .any(|&v| self.is_infinite_vertex(v))
    }

    /// Corner positions of a cell
    pub fn cell_points(&self, cell: CellId) -> [Point3d; 4] {
        self.cells[cell as usize].vertices.map(|v| self.points[v as usize])
    }

    /// Local index, inside the neighbor across face `i` of `cell`, of the
    /// vertex opposite the shared face
    pub fn mirror_index(&self, cell: CellId, i: usize) -> Option<usize> {
        let c = &self.cells[cell as usize];
        let neighbor = c.neighbors[i];
        if neighbor == NO_CELL {
            return None;
        }
        let n = &self.cells[neighbor as usize];
        (0..4).find(|&j| !c.has_vertex(n.vertices[j]))
    }

    /// All cells having `vertex` as a corner
    pub fn incident_cells(&self, vertex: VertexId) -> Vec<CellId> {
        let start = self.vertex_cells[vertex as usize];
        if start == NO_CELL {
            return Vec::new();
        }
        let mut seen = HashSet::new();
        let mut star = Vec::new();
        let mut stack = vec![start];
        seen.insert(start);
        while let Some(c) = stack.pop() {
            star.push(c);
            let cell = &self.cells[c as usize];
            for i in 0..4 {
                let n = cell.neighbors[i];
                if cell.vertices[i] != vertex && n != NO_CELL && seen.insert(n) {
                    stack.push(n);
                }
            }
        }
        star.sort_unstable();
        star
    }

    /// Cells around the edge `(a, b)`, walking the ring from `start`.
    ///
    /// `start` must contain both vertices.
    pub fn cells_around_edge(&self, start: CellId, a: VertexId, b: VertexId) -> Vec<CellId> {
        let mut ring = vec![start];
        let mut previous = NO_CELL;
        let mut current = start;
        // A finite edge never has more incident cells than the triangulation
        for _ in 0..self.cells.len() {
            let cell = &self.cells[current as usize];
            let next = (0..4)
                .filter(|&i| cell.vertices[i] != a && cell.vertices[i] != b)
                .map(|i| cell.neighbors[i])
                .find(|&n| n != previous && n != NO_CELL);
            match next {
                Some(n) if n != start => {
                    ring.push(n);
                    previous = current;
                    current = n;
                }
                _ => break,
            }
        }
        ring
    }
}

/// Mutable state while points are inserted
struct Builder {
    points: Vec<Point3d>,
    cells: Vec<Cell>,
    alive: Vec<bool>,
    free: Vec<CellId>,
    marks: Vec<u32>,
    stamp: u32,
    last: CellId,
}

impl Builder {
    fn new(bounds: &Aabb, capacity: usize) -> Self {
        let center = bounds.center();
        let size = 100.0 * bounds.max_extent().max(1e-6);
        let corners = [
            [1.0, 1.0, 1.0],
            [1.0, -1.0, -1.0],
            [-1.0, 1.0, -1.0],
            [-1.0, -1.0, 1.0],
        ];
        let mut points = Vec::with_capacity(capacity + INFINITE_VERTICES as usize);
        for [x, y, z] in corners {
            points.push(center + nalgebra::Vector3::new(x, y, z) * size);
        }

        let mut vertices = [0, 1, 2, 3];
        if orient(&points[0], &points[1], &points[2], &points[3]) < 0.0 {
            vertices.swap(2, 3);
        }

        Self {
            points,
            cells: vec![Cell {
                vertices,
                neighbors: [NO_CELL; 4],
            }],
            alive: vec![true],
            free: Vec::new(),
            marks: vec![0],
            stamp: 0,
            last: 0,
        }
    }

    fn push_point(&mut self, p: Point3d) -> VertexId {
        self.points.push(p);
        (self.points.len() - 1) as VertexId
    }

    fn allocate(&mut self, cell: Cell) -> CellId {
        match self.free.pop() {
            Some(id) => {
                self.cells[id as usize] = cell;
                self.alive[id as usize] = true;
                id
            }
            None => {
                self.cells.push(cell);
                self.alive.push(true);
                self.marks.push(0);
                (self.cells.len() - 1) as CellId
            }
        }
    }

    /// Orientation of `cell` with its vertex `i` replaced by `p`
    fn orient_with(&self, cell: CellId, i: usize, p: &Point3d) -> f64 {
        let mut corners = self.cells[cell as usize].vertices.map(|v| &self.points[v as usize]);
        corners[i] = p;
        orient(corners[0], corners[1], corners[2], corners[3])
    }

    fn conflicts(&self, cell: CellId, p: &Point3d) -> bool {
        let [a, b, c, d] = self.cells[cell as usize].vertices.map(|v| &self.points[v as usize]);
        in_sphere(a, b, c, d, p) > 0.0
    }

    /// Find a cell whose closure contains `p` by a visibility walk
    fn locate(&self, p: &Point3d) -> Result<CellId> {
        let mut current = if self.alive[self.last as usize] {
            self.last
        } else {
            self.alive.iter().position(|&a| a).unwrap_or(0) as CellId
        };
        let mut previous = NO_CELL;

        'walk: for step in 0..self.cells.len() * 4 + 64 {
            let cell = &self.cells[current as usize];
            for k in 0..4 {
                let i = (k + step) % 4;
                let neighbor = cell.neighbors[i];
                if neighbor != NO_CELL && neighbor == previous {
                    continue;
                }
                if self.orient_with(current, i, p) < 0.0 {
                    if neighbor == NO_CELL {
                        return Err(Error::Algorithm(format!(
                            "Point {:?} lies outside the enclosing tetrahedron",
                            p
                        )));
                    }
                    previous = current;
                    current = neighbor;
                    continue 'walk;
                }
            }
            return Ok(current);
        }

        // Exhaustive search when the walk cycles
        (0..self.cells.len() as CellId)
            .find(|&c| self.alive[c as usize] && (0..4).all(|i| self.orient_with(c, i, p) >= 0.0))
            .ok_or_else(|| Error::Algorithm(format!("Failed to locate point {:?}", p)))
    }

    fn insert(&mut self, vertex: VertexId) -> Result<()> {
        let p = self.points[vertex as usize];
        let start = self.locate(&p)?;

        self.stamp += 1;
        let stamp = self.stamp;
        self.marks[start as usize] = stamp;
        let mut cavity = vec![start];
        let mut stack = vec![start];
        while let Some(c) = stack.pop() {
            for i in 0..4 {
                let n = self.cells[c as usize].neighbors[i];
                if n != NO_CELL && self.marks[n as usize] != stamp && self.conflicts(n, &p) {
                    self.marks[n as usize] = stamp;
                    cavity.push(n);
                    stack.push(n);
                }
            }
        }

        // Grow the cavity until every boundary face sees the new point
        let mut grown = false;
        let boundary = loop {
            let mut boundary = Vec::new();
            let mut blocked = None;
            'scan: for &c in &cavity {
                for i in 0..4 {
                    let n = self.cells[c as usize].neighbors[i];
                    if n != NO_CELL && self.marks[n as usize] == stamp {
                        continue;
                    }
                    if self.orient_with(c, i, &p) <= 0.0 {
                        blocked = Some(n);
                        break 'scan;
                    }
                    boundary.push((self.cells[c as usize].vertices, n, i));
                }
            }
            match blocked {
                None => break boundary,
                Some(NO_CELL) => {
                    return Err(Error::Algorithm(format!(
                        "Point {:?} is not visible from the enclosing faces",
                        p
                    )))
                }
                Some(n) => {
                    self.marks[n as usize] = stamp;
                    cavity.push(n);
                    grown = true;
                }
            }
        };

        if grown {
            let kept: HashSet<VertexId> = boundary
                .iter()
                .flat_map(|(vertices, _, i)| {
                    let i = *i;
                    (0..4).filter(move |&k| k != i).map(move |k| vertices[k])
                })
                .collect();
            let lost = cavity
                .iter()
                .flat_map(|&c| self.cells[c as usize].vertices)
                .any(|v| !kept.contains(&v));
            if lost {
                return Err(Error::Algorithm(format!(
                    "Cavity of point {:?} swallowed an existing vertex",
                    p
                )));
            }
        }

        for &c in &cavity {
            self.alive[c as usize] = false;
            self.free.push(c);
        }

        let mut links: HashMap<(VertexId, VertexId), (CellId, usize)> =
            HashMap::with_capacity(boundary.len() * 2);
        let mut first = NO_CELL;
        for (old_vertices, outside, i) in boundary {
            let mut vertices = old_vertices;
            vertices[i] = vertex;
            let mut neighbors = [NO_CELL; 4];
            neighbors[i] = outside;
            let id = self.allocate(Cell {
                vertices,
                neighbors,
            });
            if first == NO_CELL {
                first = id;
            }

            if outside != NO_CELL {
                let back = (0..4)
                    .find(|&j| {
                        let w = self.cells[outside as usize].vertices[j];
                        !(0..4).any(|k| k != i && old_vertices[k] == w)
                    })
                    .ok_or_else(|| {
                        Error::Algorithm("Cavity boundary face has no outer cell".to_string())
                    })?;
                self.cells[outside as usize].neighbors[back] = id;
            }

            for j in (0..4).filter(|&j| j != i) {
                let mut edge = [0; 2];
                for (slot, k) in (0..4).filter(|&k| k != i && k != j).enumerate() {
                    edge[slot] = vertices[k];
                }
                let key = (edge[0].min(edge[1]), edge[0].max(edge[1]));
                match links.remove(&key) {
                    Some((other, other_face)) => {
                        self.cells[id as usize].neighbors[j] = other;
                        self.cells[other as usize].neighbors[other_face] = id;
                    }
                    None => {
                        links.insert(key, (id, j));
                    }
                }
            }
        }

        if !links.is_empty() {
            return Err(Error::Algorithm(format!(
                "Cavity of point {:?} is not closed ({} open edges)",
                p,
                links.len()
            )));
        }

        self.last = first;
        Ok(())
    }

    /// Drop dead cells and renumber the survivors densely
    fn finish(self, input_vertices: Vec<VertexId>) -> Tetrahedralization {
        let mut remap = vec![NO_CELL; self.cells.len()];
        let mut next = 0;
        for (old, alive) in self.alive.iter().enumerate() {
            if *alive {
                remap[old] = next;
                next += 1;
            }
        }

        let cells: Vec<Cell> = self
            .cells
            .iter()
            .zip(&self.alive)
            .filter(|(_, alive)| **alive)
            .map(|(cell, _)| Cell {
                vertices: cell.vertices,
                neighbors: cell
                    .neighbors
                    .map(|n| if n == NO_CELL { NO_CELL } else { remap[n as usize] }),
            })
            .collect();

        let mut vertex_cells = vec![NO_CELL; self.points.len()];
        for (id, cell) in cells.iter().enumerate() {
            for &v in &cell.vertices {
                vertex_cells[v as usize] = id as CellId;
            }
        }

        Tetrahedralization {
            points: self.points,
            cells,
            vertex_cells,
            input_vertices,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_points(count: usize, seed: u64) -> Vec<Point3d> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..count)
            .map(|_| Point3d::new(rng.gen(), rng.gen(), rng.gen()))
            .collect()
    }

    fn grid_points(n: usize) -> Vec<Point3d> {
        let mut points = Vec::new();
        for x in 0..n {
            for y in 0..n {
                for z in 0..n {
                    points.push(Point3d::new(x as f64, y as f64, z as f64));
                }
            }
        }
        points
    }

    fn assert_valid(tetra: &Tetrahedralization) {
        for (id, cell) in tetra.cells().iter().enumerate() {
            let [a, b, c, d] = tetra.cell_points(id as CellId);
            assert!(orient(&a, &b, &c, &d) > 0.0, "cell {} is not positive", id);

            for i in 0..4 {
                let n = cell.neighbors[i];
                if n == NO_CELL {
                    assert!(tetra.is_infinite_cell(id as CellId));
                    continue;
                }
                let j = tetra.mirror_index(id as CellId, i).unwrap();
                assert_eq!(tetra.cell(n).neighbors[j], id as CellId);
                let mut shared = cell.facet(i);
                let mut other = tetra.cell(n).facet(j);
                shared.sort_unstable();
                other.sort_unstable();
                assert_eq!(shared, other);
            }
        }
    }

    fn assert_delaunay(tetra: &Tetrahedralization) {
        for id in 0..tetra.cell_count() as CellId {
            if tetra.is_infinite_cell(id) {
                continue;
            }
            let [a, b, c, d] = tetra.cell_points(id);
            for v in INFINITE_VERTICES..tetra.vertex_count() as VertexId {
                assert!(
                    in_sphere(&a, &b, &c, &d, tetra.point(v)) <= 0.0,
                    "vertex {} inside circumsphere of cell {}",
                    v,
                    id
                );
            }
        }
    }

    #[test]
    fn test_single_tetrahedron() {
        let points = vec![
            Point3d::new(0.0, 0.0, 0.0),
            Point3d::new(1.0, 0.0, 0.0),
            Point3d::new(0.0, 1.0, 0.0),
            Point3d::new(0.0, 0.0, 1.0),
        ];
        let tetra = Tetrahedralization::new(&points).unwrap();
        assert_valid(&tetra);

        let finite: Vec<CellId> = (0..tetra.cell_count() as CellId)
            .filter(|&c| !tetra.is_infinite_cell(c))
            .collect();
        assert_eq!(finite.len(), 1);
        assert_eq!(tetra.finite_vertex_count(), 4);
    }

    #[test]
    fn test_random_points_are_delaunay() {
        let tetra = Tetrahedralization::new(&random_points(200, 7)).unwrap();
        assert_valid(&tetra);
        assert_delaunay(&tetra);
        assert_eq!(tetra.finite_vertex_count(), 200);
    }

    #[test]
    fn test_cospherical_grid_is_valid() {
        let tetra = Tetrahedralization::new(&grid_points(4)).unwrap();
        assert_valid(&tetra);
        assert_delaunay(&tetra);

        // The finite cells stay inside the cube [0, 3]^3 and cover most of it
        let volume: f64 = (0..tetra.cell_count() as CellId)
            .filter(|&c| !tetra.is_infinite_cell(c))
            .map(|c| {
                let [a, b, c, d] = tetra.cell_points(c);
                (b - a).cross(&(c - a)).dot(&(d - a)).abs() / 6.0
            })
            .sum();
        assert!(volume <= 27.0 + 1e-9);
        assert!(volume > 20.0);
    }

    #[test]
    fn test_duplicates_share_a_vertex() {
        let mut points = random_points(20, 3);
        points.push(points[5]);
        points.push(Point3d::new(points[2].x, points[2].y, points[2].z));
        let tetra = Tetrahedralization::new(&points).unwrap();

        assert_eq!(tetra.finite_vertex_count(), 20);
        assert_eq!(tetra.input_vertex(20), tetra.input_vertex(5));
        assert_eq!(tetra.input_vertex(21), tetra.input_vertex(2));
    }

    #[test]
    fn test_incident_cells_and_edge_ring() {
        let tetra = Tetrahedralization::new(&random_points(60, 11)).unwrap();
        let v = tetra.input_vertex(10);
        let star = tetra.incident_cells(v);
        assert!(!star.is_empty());
        assert!(star.iter().all(|&c| tetra.cell(c).has_vertex(v)));
        let brute: Vec<CellId> = (0..tetra.cell_count() as CellId)
            .filter(|&c| tetra.cell(c).has_vertex(v))
            .collect();
        assert_eq!(star, brute);

        let cell = *tetra.cell(star[0]);
        let other = *cell.vertices.iter().find(|&&w| w != v).unwrap();
        let ring = tetra.cells_around_edge(star[0], v, other);
        let expected = (0..tetra.cell_count() as CellId)
            .filter(|&c| tetra.cell(c).has_vertex(v) && tetra.cell(c).has_vertex(other))
            .count();
        assert_eq!(ring.len(), expected);
        assert!(ring.len() >= 3);
    }

    #[test]
    fn test_non_finite_input_is_rejected() {
        let points = vec![Point3d::new(0.0, f64::NAN, 0.0)];
        assert!(Tetrahedralization::new(&points).is_err());
    }

    #[test]
    fn test_morton_interleaving() {
        assert_eq!(morton_code(1, 0, 0), 0b001);
        assert_eq!(morton_code(0, 1, 0), 0b010);
        assert_eq!(morton_code(0, 0, 1), 0b100);
        assert_eq!(morton_code(3, 0, 0), 0b001_001);
    }
}
