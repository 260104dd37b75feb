//! Meshing pipeline: partition, plan, reconstruct, merge, post-process
//!
//! The pipeline reconstructs either the whole scene as a single unit or every
//! planned voxel as its own unit, in parallel, and writes the final mesh with
//! its per-vertex camera lists once every unit succeeded.

use crate::delaunay_gc::{DelaunayGcConfig, DelaunayGraphCut, VoxelRequest};
use crate::merge::{join_meshes, SeamReport, DEFAULT_MERGE_TOLERANCE};
use crate::parallel::{current_num_threads, parallel_map};
use crate::partition::{CachePolicy, SpacePartitioner};
use crate::plan::{PlannedSpace, ReconstructionPlan, ReconstructionPlanner};
use crate::post_processing::{BasicCleanup, MeshPostProcessor, PostProcessInput};
use densecut_core::{
    Bounded, Error, Hexahedron, ReconstructedMesh, Result, VisibilityProvider, VoxelId,
};
use densecut_io::{
    load_array_of_arrays, load_mesh, load_tagged, save_array_of_arrays, save_mesh, save_tagged,
    write_mesh, ConfigFile,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Final binary mesh, next to the OBJ output
pub const DENSE_RECONSTRUCTION_FILE: &str = "denseReconstruction.bin";
/// Per-vertex camera lists of the final mesh
pub const PTS_CAMS_FILE: &str = "meshPtsCamsFromDGC.bin";
/// Per-voxel results under the cache root
pub const RECONSTRUCTION_DIR: &str = "reconstruction";

const VOXEL_MESH_FILE: &str = "mesh.bin";
const VOXEL_PTS_CAMS_FILE: &str = "ptsCams.bin";
const RECONSTRUCTION_KEY_FILE: &str = "key.bin";
const RECONSTRUCTION_KEY_TAG: [u8; 4] = *b"DCRK";

/// How the scene is split into reconstruction units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartitioningMode {
    /// One unit covering the whole grid
    #[default]
    SingleBlock,
    /// One unit per planned voxel
    Auto,
}

impl FromStr for PartitioningMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "singleBlock" => Ok(PartitioningMode::SingleBlock),
            "auto" => Ok(PartitioningMode::Auto),
            other => Err(Error::Config(format!(
                "Unknown partitioning mode '{}', expected 'singleBlock' or 'auto'",
                other
            ))),
        }
    }
}

impl fmt::Display for PartitioningMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitioningMode::SingleBlock => write!(f, "singleBlock"),
            PartitioningMode::Auto => write!(f, "auto"),
        }
    }
}

/// What to do when the merged surface has open or non-manifold edges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeamPolicy {
    /// Log the defects and keep the mesh
    #[default]
    Warn,
    /// Fail the run with [`Error::OpenSeams`]
    Fail,
}

impl FromStr for SeamPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "warn" => Ok(SeamPolicy::Warn),
            "fail" => Ok(SeamPolicy::Fail),
            other => Err(Error::Config(format!(
                "Unknown seam policy '{}', expected 'warn' or 'fail'",
                other
            ))),
        }
    }
}

/// Configuration for the meshing pipeline
#[derive(Debug, Clone)]
pub struct MeshingConfig {
    /// OBJ output; its folder receives the binary outputs and the cache
    pub output_mesh: PathBuf,
    /// Budget of fused points over the whole scene
    pub max_pts: usize,
    pub max_pts_per_voxel: usize,
    pub partitioning: PartitioningMode,
    /// Resolution the search starts from
    pub base_resolution: u32,
    pub base_dir_name: String,
    pub export_debug: bool,
    pub merge_tolerance: f64,
    /// Skip voxels whose cut is empty instead of failing
    pub allow_empty_voxels: bool,
    pub seam_policy: SeamPolicy,
    pub cache_policy: CachePolicy,
    /// Regions removed from the output
    pub exclusions: Vec<Hexahedron>,
    pub delaunay: DelaunayGcConfig,
}

impl Default for MeshingConfig {
    fn default() -> Self {
        Self {
            output_mesh: PathBuf::from("mesh.obj"),
            max_pts: 6_000_000,
            max_pts_per_voxel: 6_000_000,
            partitioning: PartitioningMode::SingleBlock,
            base_resolution: 1024,
            base_dir_name: "root01024".to_string(),
            export_debug: false,
            merge_tolerance: DEFAULT_MERGE_TOLERANCE,
            allow_empty_voxels: false,
            seam_policy: SeamPolicy::Warn,
            cache_policy: CachePolicy::Validate,
            exclusions: Vec::new(),
            delaunay: DelaunayGcConfig::default(),
        }
    }
}

impl MeshingConfig {
    /// Apply the `largeScale` and `delaunaycut` sections of a configuration file
    pub fn with_config_file(mut self, file: &ConfigFile) -> Result<Self> {
        self.base_resolution = file.large_scale.grid_level0;
        self.base_dir_name = file.large_scale.base_dir_name.clone();
        if let Some(tolerance) = file.large_scale.merge_tolerance {
            self.merge_tolerance = tolerance;
        }
        if let Some(policy) = &file.large_scale.seam_policy {
            self.seam_policy = policy.parse()?;
        }

        let cut = &file.delaunaycut;
        self.export_debug = cut.export_debug_gc;
        let gc = &mut self.delaunay;
        for (value, target) in [
            (cut.vote_weight, &mut gc.vote_weight),
            (cut.inside_weight, &mut gc.inside_weight),
            (cut.facet_weight, &mut gc.facet_weight),
            (cut.smoothness, &mut gc.smoothness),
            (cut.halo_ratio, &mut gc.halo_ratio),
            (cut.min_component_ratio, &mut gc.min_component_ratio),
        ] {
            if let Some(value) = value {
                *target = value;
            }
        }
        Ok(self)
    }

    /// Folder receiving the outputs
    pub fn output_dir(&self) -> PathBuf {
        match self.output_mesh.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Cache folder of spaces, plans and per-voxel results
    pub fn cache_root(&self) -> PathBuf {
        self.output_dir().join("tmp").join(&self.base_dir_name)
    }
}

/// What a pipeline run produced
#[derive(Debug, Clone)]
pub struct MeshingOutput {
    pub mesh: ReconstructedMesh,
    /// Accepted fusion resolution
    pub resolution: u32,
    /// Units reconstructed (1 in single-block mode)
    pub units: usize,
    /// Planned voxels whose cut was empty and that were left out
    pub skipped_voxels: Vec<VoxelId>,
    /// Edge defects of the merged surface before post-processing
    pub seams: SeamReport,
    pub mesh_path: PathBuf,
    pub dense_reconstruction_path: PathBuf,
    pub pts_cams_path: PathBuf,
}

/// Inputs shared by every cached voxel result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ReconstructionKey {
    plan: ReconstructionPlan,
    delaunay: DelaunayGcConfig,
    exclusions: Vec<Hexahedron>,
    export_debug: bool,
}

/// Runs the whole meshing process for one scene
pub struct MeshingPipeline<'a> {
    provider: &'a dyn VisibilityProvider,
    config: MeshingConfig,
    post_processor: Box<dyn MeshPostProcessor>,
}

impl<'a> MeshingPipeline<'a> {
    pub fn new(provider: &'a dyn VisibilityProvider, config: MeshingConfig) -> Self {
        Self {
            provider,
            config,
            post_processor: Box::new(BasicCleanup::default()),
        }
    }

    pub fn with_post_processor<M>(mut self, post_processor: M) -> Self
    where
        M: MeshPostProcessor + 'static,
    {
        self.post_processor = Box::new(post_processor);
        self
    }

    pub fn config(&self) -> &MeshingConfig {
        &self.config
    }

    pub fn run(&self) -> Result<MeshingOutput> {
        let config = &self.config;
        let output_dir = config.output_dir();
        fs::create_dir_all(&output_dir)?;
        let cache_root = config.cache_root();
        info!(
            "Meshing into {} ({} partitioning, budget {} points)",
            config.output_mesh.display(),
            config.partitioning,
            config.max_pts
        );

        let partitioner =
            SpacePartitioner::new(self.provider)?.with_cache_policy(config.cache_policy);
        let planner = ReconstructionPlanner::new(&partitioner, &cache_root, config.max_pts_per_voxel);
        let planned =
            planner.compute_reconstruction_plan_bin_search(config.max_pts, config.base_resolution)?;

        let gc = DelaunayGraphCut::new(partitioner.cameras(), config.delaunay.clone());
        let (merged, units, skipped_voxels) = match config.partitioning {
            PartitioningMode::SingleBlock => (
                self.reconstruct_single_block(&gc, &planned, &output_dir)?,
                1,
                Vec::new(),
            ),
            PartitioningMode::Auto => {
                let (parts, skipped) = self.reconstruct_partitioned(&gc, &planned, &cache_root)?;
                let units = parts.len();
                let meshes: Vec<ReconstructedMesh> = parts.into_iter().map(|(_, m)| m).collect();
                (join_meshes(&meshes, config.merge_tolerance), units, skipped)
            }
        };

        if merged.is_empty() {
            return Err(Error::EmptyMesh(
                "no unit produced any surface".to_string(),
            ));
        }
        merged.validate()?;
        let seams = self.check_seams(&merged)?;

        let input = PostProcessInput {
            used_cameras: merged.used_cameras(),
            mesh: merged,
            cameras: partitioner.cameras(),
            provider: self.provider,
            exclusions: &config.exclusions,
        };
        let mesh = self.post_processor.process(input)?;
        mesh.validate()?;

        let dense_reconstruction_path = output_dir.join(DENSE_RECONSTRUCTION_FILE);
        let pts_cams_path = output_dir.join(PTS_CAMS_FILE);
        save_mesh(&dense_reconstruction_path, &mesh.mesh)?;
        save_array_of_arrays(&pts_cams_path, &mesh.point_cameras)?;
        write_mesh(&mesh.mesh, &config.output_mesh)?;
        info!(
            "Wrote {} ({} vertices, {} faces)",
            config.output_mesh.display(),
            mesh.mesh.vertex_count(),
            mesh.mesh.face_count()
        );
        if let Some(extent) = mesh.mesh.bounding_box() {
            debug!("Mesh spans {:?} to {:?}", extent.min, extent.max);
        }

        Ok(MeshingOutput {
            mesh,
            resolution: planned.grid.resolution,
            units,
            skipped_voxels,
            seams,
            mesh_path: config.output_mesh.clone(),
            dense_reconstruction_path,
            pts_cams_path,
        })
    }

    fn check_seams(&self, merged: &ReconstructedMesh) -> Result<SeamReport> {
        let seams = SeamReport::of(&merged.mesh);
        if seams.is_closed() {
            return Ok(seams);
        }
        match self.config.seam_policy {
            SeamPolicy::Warn => {
                warn!(
                    "Merged surface has {} boundary and {} non-manifold edges",
                    seams.boundary_edges, seams.non_manifold_edges
                );
                Ok(seams)
            }
            SeamPolicy::Fail => Err(Error::OpenSeams {
                boundary_edges: seams.boundary_edges,
                non_manifold_edges: seams.non_manifold_edges,
            }),
        }
    }

    fn reconstruct_single_block(
        &self,
        gc: &DelaunayGraphCut<'_>,
        planned: &PlannedSpace,
        output_dir: &Path,
    ) -> Result<ReconstructedMesh> {
        let grid = &planned.grid;
        let request = VoxelRequest {
            hexahedron: Hexahedron::from_aabb(&grid.bounds),
            voxel_id: None,
            neighbors: grid.all_ids(),
            output_dir: output_dir.to_path_buf(),
            tracks_dir: planned.space_dir.clone(),
            export_debug: self.config.export_debug,
            exclusions: &self.config.exclusions,
            grid,
            steps: grid.bounds.max_extent() / grid.resolution as f64,
        };
        gc.reconstruct_voxel(&request)?
            .ok_or_else(|| Error::EmptyMesh("scene has no tracks".to_string()))
    }

    /// Reconstruct every planned voxel, reusing cached results, in id order.
    ///
    /// Returns the meshes and the ids of voxels skipped as empty.
    fn reconstruct_partitioned(
        &self,
        gc: &DelaunayGraphCut<'_>,
        planned: &PlannedSpace,
        cache_root: &Path,
    ) -> Result<(Vec<(VoxelId, ReconstructedMesh)>, Vec<VoxelId>)> {
        let root = cache_root.join(RECONSTRUCTION_DIR);
        self.prepare_reconstruction_dir(&root, &planned.plan)?;

        let ids = &planned.plan.voxel_ids;
        info!(
            "Reconstructing {} voxels on {} threads",
            ids.len(),
            current_num_threads()
        );
        let results = parallel_map(ids, |&id| {
            self.reconstruct_cached_voxel(gc, planned, id, &root)
                .map_err(|e| Error::voxel(id, e))
        });

        let mut parts = Vec::with_capacity(ids.len());
        let mut skipped = Vec::new();
        for (&id, result) in ids.iter().zip(results) {
            match result {
                Ok(mesh) => parts.push((id, mesh)),
                Err(e) if self.config.allow_empty_voxels && e.is_empty_mesh() => {
                    warn!("Skipping voxel {}: {}", id, e);
                    skipped.push(id);
                }
                Err(e) => return Err(e),
            }
        }
        Ok((parts, skipped))
    }

    /// Everything a cached voxel result depends on besides its tracks
    fn reconstruction_key(&self, plan: &ReconstructionPlan) -> ReconstructionKey {
        ReconstructionKey {
            plan: plan.clone(),
            delaunay: self.config.delaunay.clone(),
            exclusions: self.config.exclusions.clone(),
            export_debug: self.config.export_debug,
        }
    }

    /// Drop per-voxel results computed from another plan or other settings
    fn prepare_reconstruction_dir(&self, root: &Path, plan: &ReconstructionPlan) -> Result<()> {
        let key_path = root.join(RECONSTRUCTION_KEY_FILE);
        let expected = self.reconstruction_key(plan);
        if root.exists() && self.config.cache_policy == CachePolicy::Validate {
            let current: Option<ReconstructionKey> =
                load_tagged(&key_path, RECONSTRUCTION_KEY_TAG).ok();
            if current.as_ref() != Some(&expected) {
                warn!("Cached voxel results in {} are stale, discarding", root.display());
                fs::remove_dir_all(root)?;
            }
        }
        if !key_path.exists() {
            save_tagged(&key_path, RECONSTRUCTION_KEY_TAG, &expected)?;
        }
        Ok(())
    }

    fn reconstruct_cached_voxel(
        &self,
        gc: &DelaunayGraphCut<'_>,
        planned: &PlannedSpace,
        id: VoxelId,
        root: &Path,
    ) -> Result<ReconstructedMesh> {
        let dir = root.join(format!("voxel_{:05}", id));
        let mesh_path = dir.join(VOXEL_MESH_FILE);
        let cams_path = dir.join(VOXEL_PTS_CAMS_FILE);
        if mesh_path.exists() && cams_path.exists() {
            debug!("Reusing voxel {} from {}", id, dir.display());
            return ReconstructedMesh::new(load_mesh(&mesh_path)?, load_array_of_arrays(&cams_path)?);
        }

        let grid = &planned.grid;
        let voxel = grid
            .voxel(id)
            .ok_or_else(|| Error::InvalidData(format!("Plan references unknown voxel {}", id)))?;
        let request = VoxelRequest {
            hexahedron: voxel.hexahedron,
            voxel_id: Some(id),
            neighbors: voxel.neighbors.clone(),
            output_dir: dir.clone(),
            tracks_dir: planned.space_dir.clone(),
            export_debug: self.config.export_debug,
            exclusions: &self.config.exclusions,
            grid,
            steps: grid.bounds.max_extent() / grid.resolution as f64,
        };
        let mesh = gc
            .reconstruct_voxel(&request)?
            .unwrap_or_else(ReconstructedMesh::empty);

        // Mesh file last: its presence marks a complete voxel result
        save_array_of_arrays(&cams_path, &mesh.point_cameras)?;
        save_mesh(&mesh_path, &mesh.mesh)?;
        Ok(mesh)
    }
}
