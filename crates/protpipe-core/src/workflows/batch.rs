//! The batch-script stage: shards a per-pose argument map into JSON input
//! files and runs an auxiliary script once per shard.
//!
//! Auxiliary pipeline steps (pose editing, format conversion, relabeling) are
//! implemented as scripts that take `--input_json` with a map of pose path to
//! arguments and write one output file per pose into `--output_dir`. This
//! stage owns the sharding and dispatch; the script owns the edit semantics.

use crate::engine::jobstarter::{JobStarter, split_into};
use crate::workflows::error::StageError;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

/// One configured batch-script stage.
#[derive(Debug, Clone)]
pub struct BatchScriptStage {
    interpreter: PathBuf,
    script: PathBuf,
}

impl BatchScriptStage {
    pub fn new(interpreter: impl Into<PathBuf>, script: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            script: script.into(),
        }
    }

    /// Runs the script over all poses in `inputs` (pose path -> argument
    /// object) and returns the expected per-pose output paths in the working
    /// directory.
    ///
    /// When every expected output already exists and `overwrite` is false the
    /// stage is skipped. Inputs are sharded over at most `starter.max_cores()`
    /// JSON files, one command per shard.
    #[instrument(skip_all, fields(prefix = prefix, inputs = inputs.len()))]
    pub fn run(
        &self,
        inputs: &BTreeMap<String, Value>,
        prefix: &str,
        work_dir: &Path,
        starter: &dyn JobStarter,
        overwrite: bool,
    ) -> Result<Vec<PathBuf>, StageError> {
        std::fs::create_dir_all(work_dir).map_err(|e| StageError::Io {
            path: work_dir.to_path_buf(),
            source: e,
        })?;

        let expected = expected_outputs(inputs, work_dir)?;
        if !overwrite && !expected.is_empty() && expected.iter().all(|p| p.is_file()) {
            info!(
                "All {} output(s) of stage '{}' already exist; skipping",
                expected.len(),
                prefix
            );
            return Ok(expected);
        }

        let shards = split_into(inputs.keys().cloned().collect(), starter.max_cores());
        let mut cmds = Vec::with_capacity(shards.len());
        for (i, shard) in shards.iter().enumerate() {
            let shard_path = work_dir.join(format!("{}_input_{:04}.json", prefix, i + 1));
            let subset: BTreeMap<&String, &Value> =
                shard.iter().map(|key| (key, &inputs[key])).collect();
            let content = serde_json::to_string(&subset).map_err(|e| StageError::Io {
                path: shard_path.clone(),
                source: e.into(),
            })?;
            std::fs::write(&shard_path, content).map_err(|e| StageError::Io {
                path: shard_path.clone(),
                source: e,
            })?;
            cmds.push(format!(
                "{} {} --input_json {} --output_dir {}",
                self.interpreter.display(),
                self.script.display(),
                shard_path.display(),
                work_dir.display()
            ));
        }
        info!(
            "Stage '{}': {} pose(s) sharded into {} input file(s)",
            prefix,
            inputs.len(),
            cmds.len()
        );

        starter.start(&cmds, &format!("{}_batch", prefix), work_dir)?;

        for path in &expected {
            if !path.is_file() {
                return Err(StageError::MissingOutput { path: path.clone() });
            }
        }
        Ok(expected)
    }
}

fn expected_outputs(
    inputs: &BTreeMap<String, Value>,
    work_dir: &Path,
) -> Result<Vec<PathBuf>, StageError> {
    inputs
        .keys()
        .map(|pose| {
            Path::new(pose)
                .file_name()
                .map(|name| work_dir.join(name))
                .ok_or_else(|| StageError::InvalidPose {
                    path: PathBuf::from(pose),
                })
        })
        .collect()
}
