//! Integration tests for densecut-reconstruction
//!
//! These tests run the whole meshing pipeline on small synthetic scenes and
//! check the written artifacts and cache behavior.

use densecut_core::{Camera, Error, Point3d, ReconstructedMesh, StaticScene, Track, Vector3d};
use densecut_io::{load_array_of_arrays, load_mesh, read_mesh};
use densecut_reconstruction::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Four cameras on alternate corners of a cube around a unit sphere sampled
/// with 100 seeded points; each point is seen by every camera it faces
fn sphere_scene() -> StaticScene {
    let cameras: Vec<Camera> = [
        Point3d::new(3.0, 3.0, 3.0),
        Point3d::new(3.0, -3.0, -3.0),
        Point3d::new(-3.0, 3.0, -3.0),
        Point3d::new(-3.0, -3.0, 3.0),
    ]
    .iter()
    .enumerate()
    .map(|(i, eye)| {
        Camera::look_at(
            i as u32,
            1280,
            960,
            1000.0,
            *eye,
            Point3d::origin(),
            Vector3d::new(0.0, 0.0, 1.0),
        )
        .unwrap()
    })
    .collect();

    let mut rng = StdRng::seed_from_u64(2024);
    let tracks = (0..100)
        .map(|_| {
            let z: f64 = rng.gen_range(-1.0..1.0);
            let phi: f64 = rng.gen_range(0.0..std::f64::consts::TAU);
            let r = (1.0 - z * z).sqrt();
            let normal = Vector3d::new(r * phi.cos(), r * phi.sin(), z);
            let position = Point3d::from(normal);
            let mut track = Track::new(position);
            for camera in &cameras {
                if normal.dot(&(camera.center() - position)) > 0.0 {
                    track.add_observation(camera.id, -0.7);
                }
            }
            track
        })
        .collect();
    StaticScene::new(cameras, tracks)
}

/// Four cameras on the corners of a square above the unit cube, looking at
/// its center, and 100 seeded points inside the cube seen by all of them
fn cube_volume_scene() -> StaticScene {
    let cameras: Vec<Camera> = [(2.0, 2.0), (2.0, -2.0), (-2.0, -2.0), (-2.0, 2.0)]
        .iter()
        .enumerate()
        .map(|(i, &(x, y))| {
            Camera::look_at(
                i as u32,
                1280,
                960,
                1000.0,
                Point3d::new(x, y, 3.0),
                Point3d::new(0.5, 0.5, 0.5),
                Vector3d::new(0.0, 0.0, 1.0),
            )
            .unwrap()
        })
        .collect();

    let mut rng = StdRng::seed_from_u64(7);
    let tracks = (0..100)
        .map(|_| {
            let position = Point3d::new(rng.gen(), rng.gen(), rng.gen());
            (0..4).fold(Track::new(position), |track, camera| {
                track.with_camera(camera, -0.6)
            })
        })
        .collect();
    StaticScene::new(cameras, tracks)
}

/// Points on the plane `z = 0`, each seen by a single camera above it
fn planar_scene() -> StaticScene {
    let cameras: Vec<Camera> = [(1.0, 1.0), (1.0, -1.0), (-1.0, -1.0), (-1.0, 1.0)]
        .iter()
        .enumerate()
        .map(|(i, &(x, y))| {
            Camera::look_at(
                i as u32,
                640,
                480,
                500.0,
                Point3d::new(x, y, 4.0),
                Point3d::origin(),
                Vector3d::new(0.0, 1.0, 0.0),
            )
            .unwrap()
        })
        .collect();
    let tracks = (0..100)
        .map(|i| {
            let position = Point3d::new((i % 10) as f64 * 0.2 - 0.9, (i / 10) as f64 * 0.2 - 0.9, 0.0);
            Track::new(position).with_camera((i % 4) as u32, -0.8)
        })
        .collect();
    StaticScene::new(cameras, tracks)
}

/// Hands the merged mesh through unchanged
struct Passthrough;

impl MeshPostProcessor for Passthrough {
    fn process(&self, input: PostProcessInput<'_>) -> densecut_core::Result<ReconstructedMesh> {
        Ok(input.mesh)
    }
}

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "densecut-pipeline-{}-{}",
        name,
        std::process::id()
    ));
    let _ = fs::remove_dir_all(&dir);
    dir
}

fn config(dir: &Path) -> MeshingConfig {
    MeshingConfig {
        output_mesh: dir.join("mesh.obj"),
        max_pts: 1_000_000,
        base_resolution: 1024,
        ..MeshingConfig::default()
    }
}

#[test]
fn test_every_point_is_seen() {
    let scene = sphere_scene();
    assert_eq!(scene.tracks.len(), 100);
    assert!(scene.tracks.iter().all(|t| t.support_count() >= 1));
}

#[test]
fn test_single_block_end_to_end() {
    let dir = scratch_dir("single");
    let scene = sphere_scene();
    let output = MeshingPipeline::new(&scene, config(&dir)).run().unwrap();

    assert_eq!(output.units, 1);
    assert_eq!(output.resolution, 1024);
    assert!(output.mesh.mesh.face_count() > 0);
    assert!(output.mesh.mesh.is_watertight());
    output.mesh.validate().unwrap();

    // Artifacts match the returned mesh
    assert_eq!(load_mesh(&output.dense_reconstruction_path).unwrap(), output.mesh.mesh);
    assert_eq!(
        load_array_of_arrays(&output.pts_cams_path).unwrap(),
        output.mesh.point_cameras
    );
    let obj = read_mesh(&output.mesh_path).unwrap();
    assert_eq!(obj.face_count(), output.mesh.mesh.face_count());
    assert_eq!(output.dense_reconstruction_path, dir.join(DENSE_RECONSTRUCTION_FILE));
    assert_eq!(output.pts_cams_path, dir.join(PTS_CAMS_FILE));

    // Every vertex keeps the cameras of its track, all of them known
    let known: HashSet<u32> = (0..4).collect();
    assert!(output
        .mesh
        .point_cameras
        .iter()
        .all(|cams| !cams.is_empty() && cams.iter().all(|c| known.contains(c))));

    let _ = fs::remove_dir_all(dir);
}

#[test]
fn test_cameras_above_a_point_cube_give_a_closed_surface() {
    let dir = scratch_dir("cube-volume");
    let scene = cube_volume_scene();
    let output = MeshingPipeline::new(&scene, config(&dir)).run().unwrap();

    assert_eq!(output.units, 1);
    assert!(output.mesh.mesh.vertex_count() > 0);
    assert!(output.mesh.mesh.face_count() > 0);
    assert_eq!(output.seams.boundary_edges, 0);
    assert!(output.skipped_voxels.is_empty());
    output.mesh.validate().unwrap();
    assert!(output.mesh_path.exists());

    let _ = fs::remove_dir_all(dir);
}

#[test]
fn test_planar_scene_is_an_empty_mesh() {
    let dir = scratch_dir("planar");
    let scene = planar_scene();
    let err = MeshingPipeline::new(&scene, config(&dir)).run().unwrap_err();

    assert!(err.is_empty_mesh(), "expected an empty mesh, got {:?}", err);
    assert!(!dir.join("mesh.obj").exists());
    assert!(!dir.join(DENSE_RECONSTRUCTION_FILE).exists());

    let _ = fs::remove_dir_all(dir);
}

#[test]
fn test_rerun_reuses_caches() {
    let dir = scratch_dir("rerun");
    let scene = sphere_scene();
    let cfg = config(&dir);
    let space_dir = cfg.cache_root().join("largeScaleMaxPts1024");

    let first = MeshingPipeline::new(&scene, cfg.clone()).run().unwrap();
    let space = fs::read(space_dir.join(SPACE_FILE)).unwrap();
    let plan = fs::read(space_dir.join(PLAN_FILE)).unwrap();

    let second = MeshingPipeline::new(&scene, cfg).run().unwrap();
    assert_eq!(fs::read(space_dir.join(SPACE_FILE)).unwrap(), space);
    assert_eq!(fs::read(space_dir.join(PLAN_FILE)).unwrap(), plan);
    assert_eq!(first.mesh, second.mesh);

    let _ = fs::remove_dir_all(dir);
}

#[test]
fn test_auto_partitioning_merges_voxels() {
    let dir = scratch_dir("auto");
    let scene = sphere_scene();
    let cfg = MeshingConfig {
        partitioning: PartitioningMode::Auto,
        max_pts_per_voxel: 30,
        allow_empty_voxels: true,
        ..config(&dir)
    };
    let output = MeshingPipeline::new(&scene, cfg.clone()).run().unwrap();
    assert!(output.units > 1);
    assert!(output.mesh.mesh.face_count() > 0);
    output.mesh.validate().unwrap();

    // No duplicate faces
    let keys: HashSet<[usize; 3]> = output
        .mesh
        .mesh
        .faces
        .iter()
        .map(|f| {
            let mut k = *f;
            k.sort_unstable();
            k
        })
        .collect();
    assert_eq!(keys.len(), output.mesh.mesh.face_count());

    // No duplicate vertices
    let vertices = &output.mesh.mesh.vertices;
    for (i, a) in vertices.iter().enumerate() {
        for b in &vertices[i + 1..] {
            assert!((a - b).norm() > cfg.merge_tolerance);
        }
    }

    // Per-voxel results are cached and reused
    let voxel_dirs = fs::read_dir(cfg.cache_root().join(RECONSTRUCTION_DIR))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .count();
    assert!(voxel_dirs >= output.units);
    let again = MeshingPipeline::new(&scene, cfg).run().unwrap();
    assert_eq!(again.mesh, output.mesh);

    let _ = fs::remove_dir_all(dir);
}

#[test]
fn test_failing_seam_policy_never_writes_an_open_surface() {
    let dir = scratch_dir("seams-fail");
    let scene = sphere_scene();
    let cfg = MeshingConfig {
        partitioning: PartitioningMode::Auto,
        max_pts_per_voxel: 30,
        seam_policy: SeamPolicy::Fail,
        ..config(&dir)
    };

    match MeshingPipeline::new(&scene, cfg).run() {
        Ok(output) => {
            assert!(output.seams.is_closed());
            assert!(output.skipped_voxels.is_empty());
        }
        Err(Error::OpenSeams {
            boundary_edges,
            non_manifold_edges,
        }) => {
            assert!(boundary_edges + non_manifold_edges > 0);
            assert!(!dir.join("mesh.obj").exists());
        }
        Err(e) if e.is_empty_mesh() => assert!(!dir.join("mesh.obj").exists()),
        Err(e) => panic!("unexpected error {:?}", e),
    }

    let _ = fs::remove_dir_all(dir);
}

#[test]
fn test_seam_report_describes_the_merged_surface() {
    let dir = scratch_dir("seams-warn");
    let scene = sphere_scene();
    let cfg = MeshingConfig {
        partitioning: PartitioningMode::Auto,
        max_pts_per_voxel: 30,
        allow_empty_voxels: true,
        ..config(&dir)
    };
    let output = MeshingPipeline::new(&scene, cfg.clone())
        .with_post_processor(Passthrough)
        .run()
        .unwrap();

    assert_eq!(output.seams, SeamReport::of(&output.mesh.mesh));
    if output.mesh.mesh.is_watertight() {
        assert!(output.seams.is_closed());
    }

    let plan = ReconstructionPlan::load(
        cfg.cache_root()
            .join(format!("largeScaleMaxPts{:04}", output.resolution))
            .join(PLAN_FILE),
    )
    .unwrap();
    assert_eq!(output.units + output.skipped_voxels.len(), plan.voxel_count());
    assert!(output
        .skipped_voxels
        .iter()
        .all(|id| plan.voxel_ids.contains(id)));

    let _ = fs::remove_dir_all(dir);
}

#[test]
fn test_changed_cut_settings_discard_cached_voxels() {
    let dir = scratch_dir("voxel-cache-key");
    let scene = sphere_scene();
    let cfg = MeshingConfig {
        partitioning: PartitioningMode::Auto,
        max_pts_per_voxel: 30,
        allow_empty_voxels: true,
        ..config(&dir)
    };
    let first = MeshingPipeline::new(&scene, cfg.clone()).run().unwrap();

    // Plant a marker in every cached voxel folder
    let root = cfg.cache_root().join(RECONSTRUCTION_DIR);
    let voxel_dirs: Vec<PathBuf> = fs::read_dir(&root)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    assert!(!voxel_dirs.is_empty());
    let plant = |dirs: &[PathBuf]| {
        for voxel_dir in dirs.iter().filter(|d| d.exists()) {
            fs::write(voxel_dir.join("marker"), b"1").unwrap();
        }
    };
    plant(&voxel_dirs);

    // Same settings keep the cache
    MeshingPipeline::new(&scene, cfg.clone()).run().unwrap();
    assert!(voxel_dirs.iter().all(|d| d.join("marker").exists()));

    // Any other cut setting recomputes every voxel
    let mut changed = cfg.clone();
    changed.delaunay.max_repair_passes += 1;
    let recomputed = MeshingPipeline::new(&scene, changed.clone()).run().unwrap();
    assert!(voxel_dirs.iter().all(|d| !d.join("marker").exists()));
    assert_eq!(recomputed.mesh, first.mesh);

    // Trusting the cache skips the comparison
    plant(&voxel_dirs);
    let mut trusted = MeshingConfig {
        cache_policy: CachePolicy::TrustExisting,
        ..cfg
    };
    trusted.delaunay.smoothness *= 2.0;
    MeshingPipeline::new(&scene, trusted).run().unwrap();
    assert!(voxel_dirs
        .iter()
        .filter(|d| d.exists())
        .all(|d| d.join("marker").exists()));

    let _ = fs::remove_dir_all(dir);
}

#[test]
fn test_debug_export_writes_colored_surface() {
    let dir = scratch_dir("debug");
    let scene = sphere_scene();
    let cfg = MeshingConfig {
        export_debug: true,
        ..config(&dir)
    };
    MeshingPipeline::new(&scene, cfg).run().unwrap();
    let text = fs::read_to_string(dir.join(DEBUG_MESH_FILE)).unwrap();
    let vertex_line = text.lines().find(|l| l.starts_with("v ")).unwrap();
    assert_eq!(vertex_line.split_whitespace().count(), 7);

    let _ = fs::remove_dir_all(dir);
}

/// Keeps the first face only
struct FirstFaceOnly;

impl MeshPostProcessor for FirstFaceOnly {
    fn process(&self, input: PostProcessInput<'_>) -> densecut_core::Result<ReconstructedMesh> {
        assert_eq!(input.used_cameras, input.mesh.used_cameras());
        assert_eq!(input.cameras.len(), 4);
        let mut mesh = input.mesh;
        mesh.retain_faces(|_, f| f == 0);
        Ok(mesh)
    }
}

#[test]
fn test_custom_post_processor_output_is_written() {
    let dir = scratch_dir("post");
    let scene = sphere_scene();
    let pipeline = MeshingPipeline::new(&scene, config(&dir)).with_post_processor(FirstFaceOnly);
    let output = pipeline.run().unwrap();

    assert_eq!(output.mesh.mesh.face_count(), 1);
    assert_eq!(output.mesh.mesh.vertex_count(), 3);
    assert_eq!(load_mesh(&output.dense_reconstruction_path).unwrap(), output.mesh.mesh);
    assert_eq!(read_mesh(&output.mesh_path).unwrap().face_count(), 1);

    let _ = fs::remove_dir_all(dir);
}

#[test]
fn test_scene_without_cameras_is_rejected() {
    let dir = scratch_dir("no-cameras");
    let scene = StaticScene::new(Vec::new(), vec![Track::new(Point3d::origin())]);
    let result = MeshingPipeline::new(&scene, config(&dir)).run();
    assert!(matches!(result, Err(Error::DegenerateScene(_))));
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn test_zero_budget_is_unreachable() {
    let dir = scratch_dir("zero-budget");
    let scene = sphere_scene();
    let cfg = MeshingConfig {
        max_pts: 0,
        ..config(&dir)
    };
    let result = MeshingPipeline::new(&scene, cfg).run();
    assert!(matches!(result, Err(Error::BudgetUnreachable { budget: 0, .. })));
    assert!(!dir.join("mesh.obj").exists());
    let _ = fs::remove_dir_all(dir);
}
