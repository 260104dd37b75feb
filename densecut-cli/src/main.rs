//! Large-scale meshing from filtered depth maps.
//!
//! Reads the camera file and filtered depth maps of a scene, partitions it,
//! reconstructs a surface with Delaunay graph cuts and writes the mesh with
//! its per-vertex camera visibility next to the OBJ output.

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use densecut_io::{read_config_file, DepthMapScene};
use densecut_reconstruction::parallel::{init_thread_pool, ThreadPoolConfig};
use densecut_reconstruction::{MeshingConfig, MeshingPipeline, PartitioningMode};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Delaunay graph-cut meshing of depth maps
#[derive(Parser, Debug)]
#[command(name = "densecut-meshing")]
#[command(about = "Meshes filtered depth maps with Delaunay graph cuts")]
struct Args {
    /// Configuration file (JSON)
    #[arg(long)]
    ini: PathBuf,

    /// Folder with the camera file and the raw depth maps
    #[arg(long = "depthMapFolder")]
    depth_map_folder: PathBuf,

    /// Folder with the filtered depth maps
    #[arg(long = "depthMapFilterFolder")]
    depth_map_filter_folder: PathBuf,

    /// Output mesh (OBJ)
    #[arg(short, long)]
    output: PathBuf,

    /// Maximum number of fused points over the whole scene
    #[arg(long = "maxPts", default_value_t = 6_000_000)]
    max_pts: usize,

    /// Maximum number of fused points per voxel
    #[arg(long = "maxPtsPerVoxel", default_value_t = 6_000_000)]
    max_pts_per_voxel: usize,

    /// Partitioning mode: singleBlock or auto
    #[arg(long, default_value = "singleBlock")]
    partitioning: PartitioningMode,

    /// Worker threads (all cores when omitted)
    #[arg(long)]
    threads: Option<usize>,
}

fn run(args: Args) -> Result<()> {
    let start = Instant::now();
    if let Some(threads) = args.threads {
        init_thread_pool(ThreadPoolConfig::default().with_threads(threads))
            .context("Failed to start worker threads")?;
    }

    let file = read_config_file(&args.ini)
        .with_context(|| format!("Failed to read configuration {}", args.ini.display()))?;

    let config = MeshingConfig {
        output_mesh: args.output,
        max_pts: args.max_pts,
        max_pts_per_voxel: args.max_pts_per_voxel,
        partitioning: args.partitioning,
        ..MeshingConfig::default()
    }
    .with_config_file(&file)
    .context("Invalid configuration")?;

    let scene = DepthMapScene::open(
        &args.depth_map_folder,
        &args.depth_map_filter_folder,
        file.global.sim_threshold as f32,
    )
    .context("Failed to open depth maps")?;

    let output = MeshingPipeline::new(&scene, config)
        .run()
        .context("Meshing failed")?;
    info!(
        "Mesh with {} vertices and {} faces written to {}",
        output.mesh.mesh.vertex_count(),
        output.mesh.mesh.face_count(),
        output.mesh_path.display()
    );
    info!("Meshing took {:.1?}", start.elapsed());
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if std::env::args_os().len() <= 1 {
        let _ = Args::command().print_help();
        return ExitCode::SUCCESS;
    }

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
        }
    };

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
