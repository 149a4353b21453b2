//! Stage configuration, loadable from TOML stage description files.

use crate::core::table::StorageFormat;
use crate::engine::retry::RetryPolicy;
use crate::workflows::error::StageError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_nstruct() -> u32 {
    1
}

fn default_artifact_ext() -> String {
    "pdb".to_string()
}

fn default_barrier_max_attempts() -> u32 {
    RetryPolicy::default().max_attempts
}

fn default_barrier_interval_ms() -> u64 {
    RetryPolicy::default().interval.as_millis() as u64
}

/// Configuration of one scoring stage.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageConfig {
    /// External scoring executable driven by the stage.
    pub executable: PathBuf,
    /// Number of replicas produced per input pose.
    #[serde(default = "default_nstruct")]
    pub nstruct: u32,
    /// Stage-wide option string passed to every invocation.
    #[serde(default)]
    pub options: Option<String>,
    /// Per-pose option strings; length must match the pose list.
    #[serde(default)]
    pub pose_options: Option<Vec<String>>,
    /// Recompute even when a valid score table already exists.
    #[serde(default)]
    pub overwrite: bool,
    /// On-disk format of the persisted score table.
    #[serde(default)]
    pub storage_format: StorageFormat,
    /// Extension of the structure artifacts the tool writes.
    #[serde(default = "default_artifact_ext")]
    pub artifact_ext: String,
    /// Artifact readiness barrier: maximum poll attempts.
    #[serde(default = "default_barrier_max_attempts")]
    pub barrier_max_attempts: u32,
    /// Artifact readiness barrier: poll interval in milliseconds.
    #[serde(default = "default_barrier_interval_ms")]
    pub barrier_interval_ms: u64,
}

impl StageConfig {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            nstruct: default_nstruct(),
            options: None,
            pose_options: None,
            overwrite: false,
            storage_format: StorageFormat::default(),
            artifact_ext: default_artifact_ext(),
            barrier_max_attempts: default_barrier_max_attempts(),
            barrier_interval_ms: default_barrier_interval_ms(),
        }
    }

    pub fn from_toml_path(path: &Path) -> Result<Self, StageError> {
        let content = std::fs::read_to_string(path).map_err(|e| StageError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| StageError::Config {
            path: path.to_path_buf(),
            source: Box::new(e),
        })
    }

    pub fn barrier_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.barrier_max_attempts,
            Duration::from_millis(self.barrier_interval_ms),
        )
    }
}
