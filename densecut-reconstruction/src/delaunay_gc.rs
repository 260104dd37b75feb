//! Delaunay graph-cut surface reconstruction of one unit
//!
//! Tracks and the centers of the cameras that see them are tetrahedralized.
//! Every camera-to-track segment votes: cells it crosses are likely empty,
//! the cell right behind the track is likely full. A minimum s-t cut over
//! the cell adjacency graph labels cells inside or outside, and the facets
//! between the two labels form the surface.

use crate::delaunay::{CellId, Tetrahedralization, VertexId, NO_CELL};
use crate::graph_cut::FlowNetwork;
use crate::partition::{load_voxel_tracks, SpaceGrid};
use crate::visibility::{RayCaster, VisibilityRay, VoteTable};
use densecut_core::{
    Bounded, Camera, CameraId, Error, Hexahedron, ReconstructedMesh, Result, Track, TriangleMesh,
    VoxelId,
};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Debug export of the raw cut surface, colored by camera support
pub const DEBUG_MESH_FILE: &str = "meshColoredByVisibility.obj";

/// Weights of the visibility votes and the cut energy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelaunayGcConfig {
    /// Weight of one camera-to-track observation
    pub vote_weight: f64,
    /// Multiplier of the inside vote behind a track
    pub inside_weight: f64,
    /// Multiplier of crossing votes on facet capacities
    pub facet_weight: f64,
    /// Constant facet capacity favoring smaller surfaces
    pub smoothness: f64,
    /// Margin around a unit, relative to its edge, from which tracks are gathered
    pub halo_ratio: f64,
    /// Inside components smaller than this fraction of the largest are dropped
    pub min_component_ratio: f64,
    pub max_repair_passes: usize,
}

impl Default for DelaunayGcConfig {
    fn default() -> Self {
        Self {
            vote_weight: 1.0,
            inside_weight: 2.0,
            facet_weight: 0.5,
            smoothness: 0.1,
            halo_ratio: 0.1,
            min_component_ratio: 0.02,
            max_repair_passes: 64,
        }
    }
}

/// One unit of work for the reconstructor
#[derive(Debug, Clone)]
pub struct VoxelRequest<'a> {
    /// Region the unit reconstructs
    pub hexahedron: Hexahedron,
    /// Owning voxel; `None` reconstructs the whole region without trimming
    pub voxel_id: Option<VoxelId>,
    /// Voxels whose tracks are gathered besides the unit's own
    pub neighbors: Vec<VoxelId>,
    pub output_dir: PathBuf,
    /// Space directory holding the per-voxel track files
    pub tracks_dir: PathBuf,
    pub export_debug: bool,
    /// Regions whose faces are removed from the result
    pub exclusions: &'a [Hexahedron],
    pub grid: &'a SpaceGrid,
    /// Fine cell edge of the grid, lower bound of the gathering halo
    pub steps: f64,
}

/// Cut surface together with the tetrahedralization vertex of each mesh vertex
#[derive(Debug, Clone)]
pub struct CutMesh {
    pub mesh: TriangleMesh,
    pub vertex_ids: Vec<VertexId>,
}

/// Sorted, deduplicated union of per-vertex camera lists
pub fn sorted_used_cams(point_cameras: &[Vec<CameraId>]) -> Vec<CameraId> {
    point_cameras
        .iter()
        .flatten()
        .copied()
        .sorted_unstable()
        .dedup()
        .collect()
}

/// Reconstructs units from the cameras of a scene
pub struct DelaunayGraphCut<'a> {
    cameras: HashMap<CameraId, &'a Camera>,
    config: DelaunayGcConfig,
}

impl<'a> DelaunayGraphCut<'a> {
    pub fn new(cameras: &'a [Camera], config: DelaunayGcConfig) -> Self {
        Self {
            cameras: cameras.iter().map(|c| (c.id, c)).collect(),
            config,
        }
    }

    pub fn config(&self) -> &DelaunayGcConfig {
        &self.config
    }

    /// Reconstruct one unit. `Ok(None)` when the unit has no tracks.
    pub fn reconstruct_voxel(&self, request: &VoxelRequest<'_>) -> Result<Option<ReconstructedMesh>> {
        let tracks = self.gather_tracks(request)?;
        if tracks.is_empty() {
            debug!("Unit {:?} has no tracks, skipping", request.voxel_id);
            return Ok(None);
        }

        let mut cut = self.reconstruct_tracks(&tracks)?;
        cut.graph_cut_post_processing();
        if request.export_debug {
            cut.export_debug(request.output_dir.join(DEBUG_MESH_FILE))?;
        }

        let mut result = cut.into_reconstructed_mesh()?;
        if let Some(id) = request.voxel_id {
            let grid = request.grid;
            result.retain_faces(|mesh, f| grid.locate(&mesh.face_centroid(f)) == Some(id));
        }
        if !request.exclusions.is_empty() {
            result.retain_faces(|mesh, f| {
                let centroid = mesh.face_centroid(f);
                !request.exclusions.iter().any(|h| h.contains(&centroid))
            });
        }
        debug!(
            "Unit {:?}: {} vertices, {} faces after trimming",
            request.voxel_id,
            result.mesh.vertex_count(),
            result.mesh.face_count()
        );
        Ok(Some(result))
    }

    /// Tracks of the unit and its neighbors within the halo around the unit
    pub fn gather_tracks(&self, request: &VoxelRequest<'_>) -> Result<Vec<Track>> {
        let bounds = request.hexahedron.aabb();
        let halo = (self.config.halo_ratio * bounds.max_extent()).max(request.steps);
        let region = bounds.expanded(halo);

        // Edge and corner neighbors reach into the halo as well
        let ids: Vec<VoxelId> = request
            .voxel_id
            .into_iter()
            .chain(request.neighbors.iter().copied())
            .chain(
                request
                    .grid
                    .non_empty_voxels()
                    .filter(|voxel| voxel.bounds().overlaps(&region))
                    .map(|voxel| voxel.id),
            )
            .sorted_unstable()
            .dedup()
            .collect();

        let mut tracks = Vec::new();
        for id in ids {
            tracks.extend(
                load_voxel_tracks(&request.tracks_dir, id)?
                    .into_iter()
                    .filter(|t| region.contains(&t.position)),
            );
        }
        if let Some(extent) = tracks.as_slice().bounding_box() {
            debug!(
                "Unit {:?}: {} tracks spanning {:?} to {:?}",
                request.voxel_id,
                tracks.len(),
                extent.min,
                extent.max
            );
        }
        Ok(tracks)
    }

    /// Tetrahedralize, vote and cut a set of tracks
    pub fn reconstruct_tracks(&self, tracks: &[Track]) -> Result<DelaunayCut> {
        let used: Vec<CameraId> = tracks
            .iter()
            .flat_map(|t| t.supporting_cameras())
            .sorted_unstable()
            .dedup()
            .collect();
        let mut cameras = Vec::with_capacity(used.len());
        for id in used {
            match self.cameras.get(&id) {
                Some(camera) => cameras.push(*camera),
                None => warn!("Track references unknown camera {}, ignoring it", id),
            }
        }

        let points: Vec<_> = tracks
            .iter()
            .map(|t| t.position)
            .chain(cameras.iter().map(|c| c.center()))
            .collect();
        let tetra = Tetrahedralization::new(&points)?;

        let camera_vertices: HashMap<CameraId, VertexId> = cameras
            .iter()
            .enumerate()
            .map(|(k, c)| (c.id, tetra.input_vertex(tracks.len() + k)))
            .collect();

        let mut vertex_cameras = vec![BTreeSet::new(); tetra.vertex_count()];
        let mut rays = Vec::new();
        for (i, track) in tracks.iter().enumerate() {
            let point = tetra.input_vertex(i);
            for camera in track.supporting_cameras() {
                let Some(&vertex) = camera_vertices.get(&camera) else {
                    continue;
                };
                vertex_cameras[point as usize].insert(camera);
                if vertex != point {
                    rays.push(VisibilityRay {
                        camera: vertex,
                        point,
                        weight: self.config.vote_weight,
                    });
                }
            }
        }
        for (&camera, &vertex) in &camera_vertices {
            vertex_cameras[vertex as usize].insert(camera);
        }

        let caster = RayCaster::new(
            &tetra,
            camera_vertices.values().copied().sorted_unstable(),
            self.config.inside_weight,
        );
        let votes = caster.cast_all(&rays);
        if votes.lost_rays > 0 {
            warn!(
                "{} of {} visibility rays hit a degenerate configuration",
                votes.lost_rays,
                votes.total_rays()
            );
        }

        let inside = self.min_cut(&tetra, &votes);
        info!(
            "Graph cut over {} cells from {} rays: {} cells inside",
            tetra.cell_count(),
            votes.total_rays(),
            inside.iter().filter(|&&x| x).count()
        );

        Ok(DelaunayCut {
            tetra,
            inside,
            vertex_cameras,
            config: self.config.clone(),
        })
    }

    /// Label cells through a minimum s-t cut of the vote graph
    fn min_cut(&self, tetra: &Tetrahedralization, votes: &VoteTable) -> Vec<bool> {
        let cells = tetra.cell_count();
        let (source, sink) = (cells, cells + 1);
        let mut network = FlowNetwork::new(cells + 2);

        for c in 0..cells {
            let id = c as CellId;
            if tetra.is_infinite_cell(id) {
                network.add_edge(c, sink, f64::INFINITY, 0.0);
                continue;
            }
            if votes.inside[c] > 0.0 {
                network.add_edge(source, c, votes.inside[c], 0.0);
            }
            if votes.outside[c] > 0.0 {
                network.add_edge(c, sink, votes.outside[c], 0.0);
            }
        }

        for c in 0..cells {
            let id = c as CellId;
            let cell = tetra.cell(id);
            for j in 0..4 {
                let n = cell.neighbors[j];
                if n == NO_CELL || (n as usize) < c {
                    continue;
                }
                if tetra.is_infinite_cell(id) && tetra.is_infinite_cell(n) {
                    continue;
                }
                let Some(mirror) = tetra.mirror_index(id, j) else {
                    continue;
                };
                let crossings = votes.crossings[c][j] + votes.crossings[n as usize][mirror];
                let capacity = self.config.smoothness + self.config.facet_weight * crossings;
                network.add_edge(c, n as usize, capacity, capacity);
            }
        }

        let flow = network.max_flow(source, sink);
        debug!("Max flow {:.3} over {} arcs", flow, network.arc_count());

        let mut side = network.source_side(source);
        side.truncate(cells);
        side
    }
}

/// Labelled tetrahedralization of one unit
#[derive(Debug, Clone)]
pub struct DelaunayCut {
    tetra: Tetrahedralization,
    inside: Vec<bool>,
    vertex_cameras: Vec<BTreeSet<CameraId>>,
    config: DelaunayGcConfig,
}

impl DelaunayCut {
    pub fn tetrahedralization(&self) -> &Tetrahedralization {
        &self.tetra
    }

    /// Inside label per cell
    pub fn inside(&self) -> &[bool] {
        &self.inside
    }

    pub fn inside_count(&self) -> usize {
        self.inside.iter().filter(|&&x| x).count()
    }

    /// Remove small inside components, then repair non-manifold edges
    pub fn graph_cut_post_processing(&mut self) {
        let removed = self.remove_small_components();
        let repaired = self.repair_non_manifold_edges();
        debug!(
            "Cut post-processing: {} small components removed, {} cells filled",
            removed, repaired
        );
    }

    /// Inside components under face adjacency, each sorted by cell id
    fn inside_components(&self) -> Vec<Vec<CellId>> {
        let mut seen = vec![false; self.inside.len()];
        let mut components = Vec::new();
        for start in 0..self.inside.len() {
            if !self.inside[start] || seen[start] {
                continue;
            }
            seen[start] = true;
            let mut component = Vec::new();
            let mut queue = VecDeque::from([start as CellId]);
            while let Some(c) = queue.pop_front() {
                component.push(c);
                for &n in &self.tetra.cell(c).neighbors {
                    if n != NO_CELL && self.inside[n as usize] && !seen[n as usize] {
                        seen[n as usize] = true;
                        queue.push_back(n);
                    }
                }
            }
            component.sort_unstable();
            components.push(component);
        }
        components
    }

    fn remove_small_components(&mut self) -> usize {
        let components = self.inside_components();
        let largest = components.iter().map(Vec::len).max().unwrap_or(0);
        let threshold = self.config.min_component_ratio * largest as f64;
        let mut removed = 0;
        for component in components {
            if (component.len() as f64) < threshold {
                for c in component {
                    self.inside[c as usize] = false;
                }
                removed += 1;
            }
        }
        removed
    }

    /// Edges shared by more than two surface facets, with an inside cell
    /// containing each
    fn non_manifold_edges(&self) -> Vec<((VertexId, VertexId), CellId)> {
        let mut edges: HashMap<(VertexId, VertexId), (usize, CellId)> = HashMap::new();
        for (c, facet) in self.surface_facets() {
            for k in 0..3 {
                let (a, b) = (facet[k], facet[(k + 1) % 3]);
                let entry = edges.entry((a.min(b), a.max(b))).or_insert((0, c));
                entry.0 += 1;
            }
        }
        edges
            .into_iter()
            .filter(|(_, (count, _))| *count > 2)
            .map(|(edge, (_, cell))| (edge, cell))
            .sorted_unstable()
            .collect()
    }

    /// Fill every finite cell around non-manifold edges until none is left.
    ///
    /// Returns the number of cells turned inside.
    fn repair_non_manifold_edges(&mut self) -> usize {
        let mut filled = 0;
        for _ in 0..self.config.max_repair_passes {
            let edges = self.non_manifold_edges();
            if edges.is_empty() {
                return filled;
            }
            let mut changed = false;
            for ((a, b), start) in edges {
                for c in self.tetra.cells_around_edge(start, a, b) {
                    if !self.inside[c as usize] && !self.tetra.is_infinite_cell(c) {
                        self.inside[c as usize] = true;
                        filled += 1;
                        changed = true;
                    }
                }
            }
            if !changed {
                warn!("Non-manifold edges remain on the convex hull of the unit");
                return filled;
            }
        }
        if !self.non_manifold_edges().is_empty() {
            warn!(
                "Non-manifold edges remain after {} repair passes",
                self.config.max_repair_passes
            );
        }
        filled
    }

    /// Facets between an inside cell and a non-inside neighbor, oriented
    /// away from the inside cell, in cell order
    fn surface_facets(&self) -> impl Iterator<Item = (CellId, [VertexId; 3])> + '_ {
        self.tetra
            .cells()
            .iter()
            .enumerate()
            .filter(|(c, _)| self.inside[*c])
            .flat_map(move |(c, cell)| {
                (0..4).filter_map(move |j| {
                    let n = cell.neighbors[j];
                    (n == NO_CELL || !self.inside[n as usize]).then(|| (c as CellId, cell.facet(j)))
                })
            })
    }

    /// Triangulate the cut surface
    pub fn create_mesh(&self) -> Result<CutMesh> {
        let mut mesh = TriangleMesh::new();
        let mut vertex_ids = Vec::new();
        let mut remap: HashMap<VertexId, usize> = HashMap::new();

        for (_, facet) in self.surface_facets() {
            let face = facet.map(|v| {
                *remap.entry(v).or_insert_with(|| {
                    vertex_ids.push(v);
                    mesh.add_vertex(*self.tetra.point(v))
                })
            });
            mesh.add_face(face);
        }

        if mesh.faces.is_empty() {
            return Err(Error::EmptyMesh(format!(
                "graph cut kept {} of {} cells and produced no surface",
                self.inside_count(),
                self.inside.len()
            )));
        }
        Ok(CutMesh { mesh, vertex_ids })
    }

    /// Supporting cameras of every mesh vertex, ascending
    pub fn create_pts_cams(&self, cut: &CutMesh) -> Vec<Vec<CameraId>> {
        cut.vertex_ids
            .iter()
            .map(|&v| self.vertex_cameras[v as usize].iter().copied().collect())
            .collect()
    }

    pub fn into_reconstructed_mesh(self) -> Result<ReconstructedMesh> {
        let cut = self.create_mesh()?;
        let point_cameras = self.create_pts_cams(&cut);
        ReconstructedMesh::new(cut.mesh, point_cameras)
    }

    /// Write the cut surface as OBJ with vertices colored by camera count
    pub fn export_debug<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut cut = self.create_mesh()?;
        let colors = self
            .create_pts_cams(&cut)
            .iter()
            .map(|cams| visibility_color(cams.len()))
            .collect();
        cut.mesh.set_colors(colors);
        densecut_io::write_mesh(&cut.mesh, path.as_ref())?;
        info!("Wrote debug cut surface {}", path.as_ref().display());
        Ok(())
    }
}

/// Red for single-camera support fading to green at five cameras or more
fn visibility_color(cameras: usize) -> [u8; 3] {
    let t = (cameras.saturating_sub(1) as f64 / 4.0).min(1.0);
    [(255.0 * (1.0 - t)).round() as u8, (255.0 * t).round() as u8, 0]
}
