//! Space partitioning of the scene bounding cube
//!
//! Candidate tracks are fused into fine cells at a given resolution and the
//! cube is split into `n³` axis-aligned blocks (voxels), `n` a power of two
//! chosen so that no block holds more fused points than requested when that
//! is achievable. Grids and per-voxel tracks are cached on disk.

use crate::parallel::parallel_bounding_box;
use densecut_core::{
    Aabb, Camera, Error, Hexahedron, Point3d, Result, Track, Vector3d, VisibilityProvider, Voxel,
    VoxelId,
};
use densecut_io::{load_tagged, save_tagged};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Grid file inside a space directory
pub const SPACE_FILE: &str = "space.bin";
/// Directory of per-voxel track files inside a space directory
pub const TRACKS_DIR: &str = "tracks";

const SPACE_TAG: [u8; 4] = *b"DCSG";
const TRACKS_TAG: [u8; 4] = *b"DCTR";

/// Padding added on every side of the scene cube, relative to its edge
const BOUNDS_PADDING: f64 = 0.05;
/// Upper bound on blocks per axis
const MAX_BLOCKS_PER_AXIS: u32 = 64;

/// Inputs a cached grid was generated from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpaceKey {
    pub resolution: u32,
    pub max_pts_per_voxel: usize,
    pub camera_count: usize,
    pub source_track_count: usize,
    pub scene_bounds: Aabb,
}

/// How existing cache files are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachePolicy {
    /// Reuse a cache only when its key matches the current inputs
    #[default]
    Validate,
    /// Reuse any cache file that exists
    TrustExisting,
}

/// Block partition of the scene cube at one fusion resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpaceGrid {
    pub key: SpaceKey,
    /// Padded scene cube
    pub bounds: Aabb,
    /// Fine cells per axis used to fuse tracks
    pub resolution: u32,
    /// Blocks per axis
    pub blocks: u32,
    /// Voxel records, `voxels[id].id == id`
    pub voxels: Vec<Voxel>,
}

impl SpaceGrid {
    pub fn voxel(&self, id: VoxelId) -> Option<&Voxel> {
        self.voxels.get(id as usize)
    }

    pub fn voxel_count(&self) -> usize {
        self.voxels.len()
    }

    /// Fused points over all voxels
    pub fn total_points(&self) -> usize {
        self.voxels.iter().map(|v| v.point_count).sum()
    }

    pub fn non_empty_voxels(&self) -> impl Iterator<Item = &Voxel> + '_ {
        self.voxels.iter().filter(|v| !v.is_empty())
    }

    pub fn all_ids(&self) -> Vec<VoxelId> {
        self.voxels.iter().map(|v| v.id).collect()
    }

    /// Voxel owning `point`: floor indexing over half-open blocks, with the
    /// outer max faces assigned to the last block
    pub fn locate(&self, point: &Point3d) -> Option<VoxelId> {
        let cell = cell_of(&self.bounds, self.blocks, point)?;
        Some(block_id(cell, self.blocks))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        save_tagged(path, SPACE_TAG, self)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let grid: SpaceGrid = load_tagged(path, SPACE_TAG)?;
        if grid.voxels.iter().enumerate().any(|(i, v)| v.id as usize != i) {
            return Err(Error::InvalidData(
                "Space grid voxels are not indexed by id".to_string(),
            ));
        }
        Ok(grid)
    }
}

/// Integer cell of `point` in a `dims³` subdivision of `bounds`
fn cell_of(bounds: &Aabb, dims: u32, point: &Point3d) -> Option<[u32; 3]> {
    if dims == 0 || !bounds.contains(point) {
        return None;
    }
    let edge = bounds.extent() / dims as f64;
    let mut cell = [0u32; 3];
    for axis in 0..3 {
        let offset = ((point[axis] - bounds.min[axis]) / edge[axis]).floor();
        cell[axis] = (offset.max(0.0) as u32).min(dims - 1);
    }
    Some(cell)
}

fn block_id(cell: [u32; 3], dims: u32) -> VoxelId {
    cell[0] + dims * (cell[1] + dims * cell[2])
}

/// Track file of voxel `id` inside a space directory
pub fn voxel_tracks_path<P: AsRef<Path>>(space_dir: P, id: VoxelId) -> PathBuf {
    space_dir
        .as_ref()
        .join(TRACKS_DIR)
        .join(format!("voxel_{:05}.bin", id))
}

/// Fused tracks of voxel `id`; a missing file means an empty voxel
pub fn load_voxel_tracks<P: AsRef<Path>>(space_dir: P, id: VoxelId) -> Result<Vec<Track>> {
    let path = voxel_tracks_path(space_dir, id);
    if !path.exists() {
        return Ok(Vec::new());
    }
    load_tagged(path, TRACKS_TAG)
}

/// Running fusion of tracks into the fine cells of a `resolution³` grid.
///
/// A fused track sits at the mean position of its cell and carries the union
/// of the supporting cameras with the best similarity per camera. Only one
/// accumulator per occupied cell is kept. Output order follows the fine cell
/// coordinates, which keeps cache files reproducible.
pub struct TrackFusion {
    bounds: Aabb,
    resolution: u32,
    cells: BTreeMap<[u32; 3], CellAccumulator>,
}

struct CellAccumulator {
    sum: Vector3d,
    count: usize,
    track: Track,
}

impl TrackFusion {
    pub fn new(bounds: Aabb, resolution: u32) -> Self {
        Self {
            bounds,
            resolution,
            cells: BTreeMap::new(),
        }
    }

    /// Add one track; tracks outside the bounds are ignored
    pub fn add(&mut self, track: &Track) {
        let Some(cell) = cell_of(&self.bounds, self.resolution, &track.position) else {
            return;
        };
        // Order by z, then y, then x
        let key = [cell[2], cell[1], cell[0]];
        let acc = self.cells.entry(key).or_insert_with(|| CellAccumulator {
            sum: Vector3d::zeros(),
            count: 0,
            track: Track::new(track.position),
        });
        acc.sum += track.position.coords;
        acc.count += 1;
        for (&camera, &similarity) in &track.cameras {
            acc.track.add_observation(camera, similarity);
        }
    }

    pub fn occupied_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn into_tracks(self) -> Vec<Track> {
        self.cells
            .into_values()
            .map(|mut acc| {
                acc.track.position = Point3d::from(acc.sum / acc.count as f64);
                acc.track
            })
            .collect()
    }
}

/// Fuse a slice of tracks, see [`TrackFusion`]
pub fn fuse_tracks(tracks: &[Track], bounds: &Aabb, resolution: u32) -> Vec<Track> {
    let mut fusion = TrackFusion::new(*bounds, resolution);
    for track in tracks {
        fusion.add(track);
    }
    fusion.into_tracks()
}

/// A freshly generated grid together with the fused tracks of every voxel
#[derive(Debug, Clone)]
pub struct GeneratedSpace {
    pub grid: SpaceGrid,
    /// Indexed by voxel id
    pub voxel_tracks: Vec<Vec<Track>>,
}

/// Splits the scene of a visibility provider into voxel blocks.
///
/// Tracks are never held as a whole: construction streams them once for
/// the scene bounds and every grid generation streams them again into a
/// [`TrackFusion`].
pub struct SpacePartitioner<'a> {
    provider: &'a dyn VisibilityProvider,
    cameras: Vec<Camera>,
    source_track_count: usize,
    scene_bounds: Aabb,
    policy: CachePolicy,
}

impl<'a> SpacePartitioner<'a> {
    /// Scan cameras and tracks and compute the padded scene cube
    pub fn new(provider: &'a dyn VisibilityProvider) -> Result<Self> {
        let cameras = provider.cameras().to_vec();
        if cameras.is_empty() {
            return Err(Error::DegenerateScene("scene has no cameras".to_string()));
        }

        let centers: Vec<Point3d> = cameras.iter().map(|c| c.center()).collect();
        let mut bounds = parallel_bounding_box(&centers)
            .ok_or_else(|| Error::DegenerateScene("scene has no geometry".to_string()))?;
        let mut source_track_count = 0usize;
        provider.for_each_track(&mut |track| {
            bounds.include(&track.position);
            source_track_count += 1;
            Ok(())
        })?;

        let extent = bounds.max_extent();
        if !(extent > 0.0) || !extent.is_finite() {
            return Err(Error::DegenerateScene(format!(
                "scene bounds have no extent: {:?}",
                bounds
            )));
        }
        let cube = bounds.to_cube();
        let scene_bounds = cube.expanded(cube.max_extent() * BOUNDS_PADDING);

        info!(
            "Space partitioner: {} cameras, {} tracks, cube edge {:.3}",
            cameras.len(),
            source_track_count,
            scene_bounds.max_extent()
        );

        Ok(Self {
            provider,
            cameras,
            source_track_count,
            scene_bounds,
            policy: CachePolicy::default(),
        })
    }

    pub fn with_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn cache_policy(&self) -> CachePolicy {
        self.policy
    }

    pub fn cameras(&self) -> &[Camera] {
        &self.cameras
    }

    /// Tracks seen while scanning the provider
    pub fn source_track_count(&self) -> usize {
        self.source_track_count
    }

    pub fn scene_bounds(&self) -> &Aabb {
        &self.scene_bounds
    }

    /// Key describing a grid generated from the current inputs
    pub fn space_key(&self, resolution: u32, max_pts_per_voxel: usize) -> SpaceKey {
        SpaceKey {
            resolution,
            max_pts_per_voxel,
            camera_count: self.cameras.len(),
            source_track_count: self.source_track_count,
            scene_bounds: self.scene_bounds,
        }
    }

    /// Fuse tracks at `resolution` and split the cube into blocks
    pub fn generate_space(&self, max_pts_per_voxel: usize, resolution: u32) -> Result<GeneratedSpace> {
        if resolution == 0 {
            return Err(Error::Config("fusion resolution must be positive".to_string()));
        }
        let mut fusion = TrackFusion::new(self.scene_bounds, resolution);
        self.provider.for_each_track(&mut |track| {
            fusion.add(&track);
            Ok(())
        })?;
        let fused = fusion.into_tracks();

        let mut blocks = 1u32;
        let mut assignment = self.assign(&fused, blocks);
        loop {
            let fullest = block_counts(&assignment, blocks).into_iter().max().unwrap_or(0);
            if fullest > max_pts_per_voxel
                && blocks < MAX_BLOCKS_PER_AXIS
                && blocks * 2 <= resolution
            {
                blocks *= 2;
                assignment = self.assign(&fused, blocks);
            } else {
                break;
            }
        }

        let counts = block_counts(&assignment, blocks);
        let mut voxel_tracks: Vec<Vec<Track>> = vec![Vec::new(); counts.len()];
        for (track, id) in fused.into_iter().zip(assignment) {
            voxel_tracks[id as usize].push(track);
        }

        let edge = self.scene_bounds.extent() / blocks as f64;
        let mut voxels = Vec::with_capacity(counts.len());
        for z in 0..blocks {
            for y in 0..blocks {
                for x in 0..blocks {
                    let cell = [x, y, z];
                    let id = block_id(cell, blocks);
                    let min = self.scene_bounds.min
                        + Vector3d::new(x as f64 * edge.x, y as f64 * edge.y, z as f64 * edge.z);
                    let max = Point3d::new(
                        upper(self.scene_bounds.min.x, edge.x, x, blocks, self.scene_bounds.max.x),
                        upper(self.scene_bounds.min.y, edge.y, y, blocks, self.scene_bounds.max.y),
                        upper(self.scene_bounds.min.z, edge.z, z, blocks, self.scene_bounds.max.z),
                    );
                    voxels.push(Voxel {
                        id,
                        cell,
                        hexahedron: Hexahedron::from_aabb(&Aabb::new(min, max)),
                        neighbors: face_neighbors(cell, blocks),
                        point_count: counts[id as usize],
                    });
                }
            }
        }

        let grid = SpaceGrid {
            key: self.space_key(resolution, max_pts_per_voxel),
            bounds: self.scene_bounds,
            resolution,
            blocks,
            voxels,
        };
        debug!(
            "Generated space at resolution {}: {}³ blocks, {} fused points",
            resolution,
            blocks,
            grid.total_points()
        );
        Ok(GeneratedSpace { grid, voxel_tracks })
    }

    fn assign(&self, fused: &[Track], blocks: u32) -> Vec<VoxelId> {
        fused
            .iter()
            .map(|t| {
                let cell = cell_of(&self.scene_bounds, blocks, &t.position).unwrap_or([0; 3]);
                block_id(cell, blocks)
            })
            .collect()
    }

    /// Load the grid cached in `dir`, or generate and cache it
    pub fn clone_space_if_does_not_exist<P: AsRef<Path>>(
        &self,
        resolution: u32,
        max_pts_per_voxel: usize,
        dir: P,
    ) -> Result<SpaceGrid> {
        let dir = dir.as_ref();
        let space_path = dir.join(SPACE_FILE);
        let expected = self.space_key(resolution, max_pts_per_voxel);

        if space_path.exists() {
            match SpaceGrid::load(&space_path) {
                Ok(grid) if self.policy == CachePolicy::TrustExisting || grid.key == expected => {
                    info!("Reusing cached space {}", space_path.display());
                    return Ok(grid);
                }
                Ok(_) => warn!(
                    "Cached space {} was built from other inputs, regenerating",
                    space_path.display()
                ),
                Err(e) => warn!(
                    "Cached space {} is unreadable ({}), regenerating",
                    space_path.display(),
                    e
                ),
            }
        }

        let generated = self.generate_space(max_pts_per_voxel, resolution)?;
        let tracks_dir = dir.join(TRACKS_DIR);
        if tracks_dir.exists() {
            fs::remove_dir_all(&tracks_dir)?;
        }
        fs::create_dir_all(&tracks_dir)?;
        for (id, tracks) in generated.voxel_tracks.iter().enumerate() {
            if !tracks.is_empty() {
                save_tagged(voxel_tracks_path(dir, id as VoxelId), TRACKS_TAG, tracks)?;
            }
        }
        // Grid file last: its presence marks a complete space directory
        generated.grid.save(&space_path)?;
        info!(
            "Wrote space {} ({} voxels, {} points)",
            dir.display(),
            generated.grid.voxel_count(),
            generated.grid.total_points()
        );
        Ok(generated.grid)
    }
}

/// Upper coordinate of block `index`, snapped to the cube face for the last block
fn upper(min: f64, edge: f64, index: u32, blocks: u32, max: f64) -> f64 {
    if index + 1 == blocks {
        max
    } else {
        min + (index + 1) as f64 * edge
    }
}

fn block_counts(assignment: &[VoxelId], blocks: u32) -> Vec<usize> {
    let mut counts = vec![0usize; (blocks * blocks * blocks) as usize];
    for &id in assignment {
        counts[id as usize] += 1;
    }
    counts
}

/// Face-adjacent blocks of `cell`, ascending id
fn face_neighbors(cell: [u32; 3], blocks: u32) -> Vec<VoxelId> {
    let mut neighbors = Vec::with_capacity(6);
    for axis in 0..3 {
        if cell[axis] > 0 {
            let mut other = cell;
            other[axis] -= 1;
            neighbors.push(block_id(other, blocks));
        }
        if cell[axis] + 1 < blocks {
            let mut other = cell;
            other[axis] += 1;
            neighbors.push(block_id(other, blocks));
        }
    }
    neighbors.sort_unstable();
    neighbors
}
