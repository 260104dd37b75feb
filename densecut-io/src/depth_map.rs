//! Calibrated cameras and filtered depth maps on disk
//!
//! The depth map folder holds `cameras.json`; the filtered folder holds one
//! `<camera id>_depthMap.bin` per view with z-depths and photo-consistency
//! similarities in row-major pixel order.

use crate::binary::{load_tagged, save_tagged};
use crate::error::IoError;
use densecut_core::{
    Camera, CameraId, Error, Matrix3, Result, Track, Vector3d, VisibilityProvider,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Name of the camera calibration file inside the depth map folder
pub const CAMERAS_FILE: &str = "cameras.json";

/// Tag of filtered depth map files
pub const DEPTH_MAP_TAG: [u8; 4] = *b"DCDM";

/// Camera calibration as stored in `cameras.json`, matrices row-major
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraRecord {
    pub id: CameraId,
    pub width: u32,
    pub height: u32,
    #[serde(rename = "K")]
    pub k: [[f64; 3]; 3],
    #[serde(rename = "R")]
    pub r: [[f64; 3]; 3],
    pub t: [f64; 3],
}

fn matrix_from_rows(rows: &[[f64; 3]; 3]) -> Matrix3<f64> {
    Matrix3::from_fn(|i, j| rows[i][j])
}

fn rows_from_matrix(matrix: &Matrix3<f64>) -> [[f64; 3]; 3] {
    let mut rows = [[0.0; 3]; 3];
    for (i, row) in rows.iter_mut().enumerate() {
        for (j, value) in row.iter_mut().enumerate() {
            *value = matrix[(i, j)];
        }
    }
    rows
}

impl From<&CameraRecord> for Camera {
    fn from(record: &CameraRecord) -> Self {
        Camera::new(
            record.id,
            record.width,
            record.height,
            matrix_from_rows(&record.k),
            matrix_from_rows(&record.r),
            Vector3d::new(record.t[0], record.t[1], record.t[2]),
        )
    }
}

impl From<&Camera> for CameraRecord {
    fn from(camera: &Camera) -> Self {
        Self {
            id: camera.id,
            width: camera.width,
            height: camera.height,
            k: rows_from_matrix(&camera.intrinsics),
            r: rows_from_matrix(&camera.rotation),
            t: [
                camera.translation.x,
                camera.translation.y,
                camera.translation.z,
            ],
        }
    }
}

/// Read the cameras of a scene, sorted by id
pub fn read_cameras<P: AsRef<Path>>(path: P) -> Result<Vec<Camera>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|e| {
        Error::Io(std::io::Error::new(
            e.kind(),
            format!("{}: {}", path.display(), e),
        ))
    })?;
    let records: Vec<CameraRecord> = serde_json::from_str(&text).map_err(IoError::from)?;

    let mut cameras: Vec<Camera> = records.iter().map(Camera::from).collect();
    cameras.sort_by_key(|camera| camera.id);
    if cameras.windows(2).any(|w| w[0].id == w[1].id) {
        return Err(Error::InvalidData(format!(
            "{}: duplicate camera ids",
            path.display()
        )));
    }
    Ok(cameras)
}

pub fn write_cameras<P: AsRef<Path>>(path: P, cameras: &[Camera]) -> Result<()> {
    let records: Vec<CameraRecord> = cameras.iter().map(CameraRecord::from).collect();
    let text = serde_json::to_string_pretty(&records).map_err(IoError::from)?;
    fs::write(path, text)?;
    Ok(())
}

/// A filtered depth map of one camera
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthMap {
    pub camera: CameraId,
    pub width: u32,
    pub height: u32,
    /// z-depth per pixel, non-positive values mark missing depth
    pub depths: Vec<f32>,
    /// Similarity per pixel, lower is better
    pub similarities: Vec<f32>,
}

impl DepthMap {
    pub fn new(camera: CameraId, width: u32, height: u32) -> Self {
        let size = (width as usize) * (height as usize);
        Self {
            camera,
            width,
            height,
            depths: vec![0.0; size],
            similarities: vec![1.0; size],
        }
    }

    pub fn file_name(camera: CameraId) -> String {
        format!("{}_depthMap.bin", camera)
    }

    pub fn set(&mut self, x: u32, y: u32, depth: f32, similarity: f32) {
        let index = (y as usize) * (self.width as usize) + x as usize;
        self.depths[index] = depth;
        self.similarities[index] = similarity;
    }

    pub fn validate(&self) -> Result<()> {
        let size = (self.width as usize) * (self.height as usize);
        if self.depths.len() != size || self.similarities.len() != size {
            return Err(Error::InvalidData(format!(
                "Depth map of camera {} has {} depths and {} similarities for {}x{} pixels",
                self.camera,
                self.depths.len(),
                self.similarities.len(),
                self.width,
                self.height
            )));
        }
        Ok(())
    }

    pub fn save<P: AsRef<Path>>(&self, folder: P) -> Result<()> {
        save_tagged(
            folder.as_ref().join(Self::file_name(self.camera)),
            DEPTH_MAP_TAG,
            self,
        )
    }

    pub fn load<P: AsRef<Path>>(folder: P, camera: CameraId) -> Result<Self> {
        let map: DepthMap = load_tagged(folder.as_ref().join(Self::file_name(camera)), DEPTH_MAP_TAG)?;
        map.validate()?;
        if map.camera != camera {
            return Err(Error::InvalidData(format!(
                "Depth map file of camera {} holds camera {}",
                camera, map.camera
            )));
        }
        Ok(map)
    }

    /// Back-project every accepted pixel into a single-camera track
    pub fn to_tracks(&self, camera: &Camera, sim_threshold: f32) -> Vec<Track> {
        self.tracks_iter(camera, sim_threshold).collect()
    }

    /// Lazy form of [`DepthMap::to_tracks`], in row-major pixel order
    pub fn tracks_iter<'m>(
        &'m self,
        camera: &'m Camera,
        sim_threshold: f32,
    ) -> impl Iterator<Item = Track> + 'm {
        let width = self.width as usize;
        self.depths
            .iter()
            .zip(&self.similarities)
            .enumerate()
            .filter(move |(_, (&depth, &sim))| depth > 0.0 && sim <= sim_threshold)
            .filter_map(move |(index, (&depth, &sim))| {
                let u = (index % width) as f64 + 0.5;
                let v = (index / width) as f64 + 0.5;
                camera
                    .back_project(u, v, depth as f64)
                    .map(|position| Track::new(position).with_camera(camera.id, sim))
            })
    }
}

/// Scene backed by a depth map folder and its filtered counterpart
#[derive(Debug, Clone)]
pub struct DepthMapScene {
    cameras: Vec<Camera>,
    filter_folder: PathBuf,
    sim_threshold: f32,
}

impl DepthMapScene {
    /// Open a scene; both folders must exist
    pub fn open<P: AsRef<Path>, Q: AsRef<Path>>(
        depth_map_folder: P,
        filter_folder: Q,
        sim_threshold: f32,
    ) -> Result<Self> {
        let depth_map_folder = depth_map_folder.as_ref();
        let filter_folder = filter_folder.as_ref();
        for folder in [depth_map_folder, filter_folder] {
            if !folder.is_dir() {
                return Err(IoError::FileNotFound {
                    path: folder.display().to_string(),
                }
                .into());
            }
        }

        let cameras = read_cameras(depth_map_folder.join(CAMERAS_FILE))?;
        info!(
            "Opened depth map scene with {} cameras from {}",
            cameras.len(),
            depth_map_folder.display()
        );

        Ok(Self {
            cameras,
            filter_folder: filter_folder.to_path_buf(),
            sim_threshold,
        })
    }
}

impl VisibilityProvider for DepthMapScene {
    fn cameras(&self) -> &[Camera] {
        &self.cameras
    }

    /// Streams one depth map at a time; only the current map is resident
    fn for_each_track(&self, visit: &mut dyn FnMut(Track) -> Result<()>) -> Result<()> {
        for camera in &self.cameras {
            let path = self.filter_folder.join(DepthMap::file_name(camera.id));
            if !path.exists() {
                warn!("No filtered depth map for camera {}, skipping", camera.id);
                continue;
            }
            let map = DepthMap::load(&self.filter_folder, camera.id)?;
            let mut contributed = 0usize;
            for track in map.tracks_iter(camera, self.sim_threshold) {
                visit(track)?;
                contributed += 1;
            }
            debug!("Camera {} contributed {} tracks", camera.id, contributed);
        }
        Ok(())
    }
}
