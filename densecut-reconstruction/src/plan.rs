//! Search for a fusion resolution whose point count fits a budget
//!
//! The planner walks down from a base resolution, caching one space
//! directory per tried resolution, until the fused point count of the grid
//! is within budget. The accepted voxels are persisted as a plan next to the
//! accepted grid.

use crate::partition::{CachePolicy, SpaceGrid, SpaceKey, SpacePartitioner};
use densecut_core::{Error, Hexahedron, Point3d, Result, VoxelId};
use densecut_io::{load_tagged, save_tagged};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Plan file inside the accepted space directory
pub const PLAN_FILE: &str = "hexahsToReconstruct.bin";

const PLAN_TAG: [u8; 4] = *b"DCRP";

/// Default bound on tried resolutions
pub const DEFAULT_MAX_ITERATIONS: usize = 64;
/// Resolution decrement used when the budget is exceeded by less than 2x
pub const DEFAULT_RESOLUTION_STEP: u32 = 100;

/// Next resolution to try after `count` points exceeded `budget` at `resolution`.
///
/// A small overshoot (ratio below 2) steps down by `step` when the resolution
/// is larger than the step, anything else halves the resolution. `None` when
/// the resolution cannot decrease any further.
pub fn next_resolution(count: usize, budget: usize, resolution: u32, step: u32) -> Option<u32> {
    let ratio = if budget == 0 {
        f64::INFINITY
    } else {
        count as f64 / budget as f64
    };
    let next = if ratio < 2.0 && resolution > step {
        resolution - step
    } else {
        resolution / 2
    };
    (next > 0 && next < resolution).then_some(next)
}

/// Inputs a cached plan was computed from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanKey {
    pub max_pts: usize,
    pub space: SpaceKey,
}

/// Voxels to reconstruct at the accepted resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconstructionPlan {
    pub key: PlanKey,
    pub resolution: u32,
    pub total_points: usize,
    /// Accepted voxel ids, ascending
    pub voxel_ids: Vec<VoxelId>,
    /// Corners of the accepted voxels, grouped in eights
    pub corners: Vec<Point3d>,
}

impl ReconstructionPlan {
    /// Accept every non-empty voxel of `grid`
    pub fn from_grid(grid: &SpaceGrid, max_pts: usize) -> Self {
        let accepted: Vec<_> = grid.non_empty_voxels().collect();
        Self {
            key: PlanKey {
                max_pts,
                space: grid.key.clone(),
            },
            resolution: grid.resolution,
            total_points: accepted.iter().map(|v| v.point_count).sum(),
            voxel_ids: accepted.iter().map(|v| v.id).collect(),
            corners: accepted.iter().flat_map(|v| v.hexahedron.corners).collect(),
        }
    }

    pub fn voxel_count(&self) -> usize {
        self.voxel_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voxel_ids.is_empty()
    }

    pub fn hexahedra(&self) -> Result<Vec<Hexahedron>> {
        Hexahedron::from_flat(&self.corners)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        save_tagged(path, PLAN_TAG, self)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let plan: ReconstructionPlan = load_tagged(path, PLAN_TAG)?;
        if plan.corners.len() != plan.voxel_ids.len() * 8 {
            return Err(Error::InvalidData(format!(
                "Plan lists {} voxels but {} corners",
                plan.voxel_ids.len(),
                plan.corners.len()
            )));
        }
        Ok(plan)
    }
}

/// Accepted grid, its directory and plan
#[derive(Debug, Clone)]
pub struct PlannedSpace {
    pub grid: SpaceGrid,
    pub space_dir: PathBuf,
    pub plan: ReconstructionPlan,
    /// Number of resolutions tried
    pub iterations: usize,
}

/// Chooses the fusion resolution and the voxels to reconstruct
pub struct ReconstructionPlanner<'a> {
    partitioner: &'a SpacePartitioner<'a>,
    cache_root: PathBuf,
    max_pts_per_voxel: usize,
    max_iterations: usize,
    step: u32,
}

impl<'a> ReconstructionPlanner<'a> {
    pub fn new<P: AsRef<Path>>(
        partitioner: &'a SpacePartitioner<'a>,
        cache_root: P,
        max_pts_per_voxel: usize,
    ) -> Self {
        Self {
            partitioner,
            cache_root: cache_root.as_ref().to_path_buf(),
            max_pts_per_voxel,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            step: DEFAULT_RESOLUTION_STEP,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_resolution_step(mut self, step: u32) -> Self {
        self.step = step;
        self
    }

    /// Space directory of one resolution
    pub fn space_dir(&self, resolution: u32) -> PathBuf {
        self.cache_root
            .join(format!("largeScaleMaxPts{:04}", resolution))
    }

    /// Find the largest tried resolution whose fused point count is at most
    /// `max_pts` and return its grid and plan
    pub fn compute_reconstruction_plan_bin_search(
        &self,
        max_pts: usize,
        base_resolution: u32,
    ) -> Result<PlannedSpace> {
        let mut resolution = base_resolution;
        let mut last_count = 0;

        for iteration in 1..=self.max_iterations {
            if resolution == 0 {
                break;
            }
            let dir = self.space_dir(resolution);
            let grid = self.partitioner.clone_space_if_does_not_exist(
                resolution,
                self.max_pts_per_voxel,
                &dir,
            )?;
            last_count = grid.total_points();
            debug!(
                "Planner iteration {}: resolution {} holds {} points (budget {})",
                iteration, resolution, last_count, max_pts
            );

            if last_count <= max_pts {
                let plan = self.load_or_create_plan(&grid, &dir, max_pts)?;
                info!(
                    "Accepted resolution {} after {} iterations: {} voxels, {} points",
                    resolution,
                    iteration,
                    plan.voxel_count(),
                    plan.total_points
                );
                return Ok(PlannedSpace {
                    grid,
                    space_dir: dir,
                    plan,
                    iterations: iteration,
                });
            }

            match next_resolution(last_count, max_pts, resolution, self.step) {
                Some(next) => resolution = next,
                None => {
                    return Err(Error::BudgetUnreachable {
                        budget: max_pts,
                        iterations: iteration,
                        last_count,
                        resolution,
                    })
                }
            }
        }

        Err(Error::BudgetUnreachable {
            budget: max_pts,
            iterations: self.max_iterations,
            last_count,
            resolution,
        })
    }

    fn load_or_create_plan(
        &self,
        grid: &SpaceGrid,
        dir: &Path,
        max_pts: usize,
    ) -> Result<ReconstructionPlan> {
        let path = dir.join(PLAN_FILE);
        let expected = ReconstructionPlan::from_grid(grid, max_pts);

        if path.exists() {
            match ReconstructionPlan::load(&path) {
                // Even a trusted plan must fit the current budget
                Ok(plan) if plan.total_points > max_pts => warn!(
                    "Cached plan {} holds {} points over the budget of {}, rewriting",
                    path.display(),
                    plan.total_points,
                    max_pts
                ),
                Ok(plan)
                    if self.partitioner.cache_policy() == CachePolicy::TrustExisting
                        || plan.key == expected.key =>
                {
                    info!("Reusing cached plan {}", path.display());
                    return Ok(plan);
                }
                Ok(_) => warn!("Cached plan {} is stale, rewriting", path.display()),
                Err(e) => warn!("Cached plan {} is unreadable ({}), rewriting", path.display(), e),
            }
        }

        expected.save(&path)?;
        Ok(expected)
    }
}
