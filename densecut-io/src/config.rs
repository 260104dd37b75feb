//! Meshing configuration file
//!
//! A JSON document with the sections `global`, `largeScale` and
//! `delaunaycut`. Missing sections and keys take their defaults.

use crate::error::IoError;
use densecut_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub global: GlobalSection,
    #[serde(rename = "largeScale")]
    pub large_scale: LargeScaleSection,
    pub delaunaycut: DelaunayCutSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GlobalSection {
    /// Pixels with a similarity above this value are discarded
    #[serde(rename = "simThr")]
    pub sim_threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LargeScaleSection {
    /// Base fusion resolution of the resolution search
    pub grid_level0: u32,
    /// Name of the space cache folder under the output's `tmp` folder
    pub base_dir_name: String,
    pub merge_tolerance: Option<f64>,
    /// `warn` or `fail` when the merged surface has open or non-manifold seams
    pub seam_policy: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DelaunayCutSection {
    #[serde(rename = "exportDebugGC")]
    pub export_debug_gc: bool,
    pub vote_weight: Option<f64>,
    pub inside_weight: Option<f64>,
    pub facet_weight: Option<f64>,
    pub smoothness: Option<f64>,
    pub halo_ratio: Option<f64>,
    pub min_component_ratio: Option<f64>,
}

impl Default for GlobalSection {
    fn default() -> Self {
        Self { sim_threshold: 0.0 }
    }
}

impl Default for LargeScaleSection {
    fn default() -> Self {
        Self {
            grid_level0: 1024,
            base_dir_name: "root01024".to_string(),
            merge_tolerance: None,
            seam_policy: None,
        }
    }
}

impl ConfigFile {
    pub fn from_json(text: &str) -> Result<Self> {
        let config: ConfigFile = serde_json::from_str(text)
            .map_err(|e| Error::Config(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.large_scale.grid_level0 == 0 {
            return Err(Error::Config("largeScale.gridLevel0 must be positive".to_string()));
        }
        if self.large_scale.base_dir_name.trim().is_empty() {
            return Err(Error::Config("largeScale.baseDirName must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Read and validate a configuration file
pub fn read_config_file<P: AsRef<Path>>(path: P) -> Result<ConfigFile> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(IoError::FileNotFound {
            path: path.display().to_string(),
        }
        .into());
    }
    let text = fs::read_to_string(path)?;
    ConfigFile::from_json(&text)
}
