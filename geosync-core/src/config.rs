//! Workspace configuration loaded from `geosync.yaml`.
//!
//! ```yaml
//! workspace: data            # data source directory
//! output_dir: package_temp   # scratch directory, renewed every run
//! spec_dir: specs            # metadata store root
//! remote_dir: remote         # distribution store root
//! root_folder_id: "0"        # remote folder holding category folders
//! hash_folder_id: "1"        # remote folder receiving hash archives
//! ```
//!
//! Relative paths resolve against the directory containing the config file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{io_err, SpecError};
use crate::types::RemoteId;

/// Default config file name, looked up in the run root.
pub const CONFIG_FILE_NAME: &str = "geosync.yaml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    pub workspace: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_spec_dir")]
    pub spec_dir: PathBuf,
    pub remote_dir: PathBuf,
    pub root_folder_id: RemoteId,
    pub hash_folder_id: RemoteId,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("package_temp")
}

fn default_spec_dir() -> PathBuf {
    PathBuf::from("specs")
}

impl SyncConfig {
    /// Load and resolve `path`.
    ///
    /// Returns `SpecError::ConfigNotFound` if absent and
    /// `SpecError::ConfigParse` (with path) if malformed.
    pub fn load(path: &Path) -> Result<Self, SpecError> {
        if !path.exists() {
            return Err(SpecError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }
        let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        let config: SyncConfig =
            serde_yaml::from_str(&contents).map_err(|e| SpecError::ConfigParse {
                path: path.to_path_buf(),
                source: e,
            })?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Ok(config.resolved_against(base))
    }

    /// `<root>/geosync.yaml`
    pub fn default_path(root: &Path) -> PathBuf {
        root.join(CONFIG_FILE_NAME)
    }

    /// Make every relative path absolute with respect to `base`.
    pub fn resolved_against(mut self, base: &Path) -> Self {
        for path in [
            &mut self.workspace,
            &mut self.output_dir,
            &mut self.spec_dir,
            &mut self.remote_dir,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
        self
    }

    /// Directory that receives package builds.
    pub fn package_output_dir(&self) -> PathBuf {
        self.output_dir.join("output_packages")
    }
}
