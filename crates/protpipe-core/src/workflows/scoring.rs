//! The scoring stage: drives an external modeling executable over a set of
//! poses, one command per pose and replica, then reconciles the scattered
//! outputs into the stage's score table.
//!
//! The persisted score table is the stage's completion marker: when it exists
//! and parses, the stage is skipped on re-run unless recomputation is forced.

use crate::core::naming;
use crate::core::table::ScoreTable;
use crate::engine::jobstarter::JobStarter;
use crate::engine::reconcile::Reconciler;
use crate::workflows::config::StageConfig;
use crate::workflows::error::StageError;
use crate::workflows::options::ToolOptions;
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

/// Options the stage assembles itself; user-supplied copies would corrupt the
/// output naming contract the reconciler depends on.
pub const RESERVED_OPTIONS: &[&str] = &[
    "-out:path:all",
    "-in:file:s",
    "-s",
    "-out:prefix",
    "-out:file:scorefile",
    "-out:file:scorefile_format",
    "-scorefile_format",
];

const OPTION_SEP: char = '-';

/// One configured scoring stage.
#[derive(Debug, Clone)]
pub struct ScoringStage {
    config: StageConfig,
}

impl ScoringStage {
    pub fn new(config: StageConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    /// Runs the stage end to end and returns the consolidated score table.
    ///
    /// Steps: validate the executable, honor the completion marker, assemble
    /// one command per pose x replica, dispatch through `starter` (blocking),
    /// reconcile the outputs and persist the table.
    #[instrument(skip_all, fields(prefix = prefix, poses = poses.len()))]
    pub fn run(
        &self,
        poses: &[PathBuf],
        prefix: &str,
        work_dir: &Path,
        starter: &dyn JobStarter,
    ) -> Result<ScoreTable, StageError> {
        validate_executable(&self.config.executable)?;

        let format = self.config.storage_format;
        let scorefile = work_dir.join(format!("{}_scores.{}", prefix, format.extension()));
        if let Some(table) = ScoreTable::load_existing(&scorefile, format, self.config.overwrite) {
            info!(
                "Found existing score table '{}' with {} row(s); skipping stage '{}'",
                scorefile.display(),
                table.len(),
                prefix
            );
            return Ok(table);
        }

        std::fs::create_dir_all(work_dir).map_err(|e| StageError::Io {
            path: work_dir.to_path_buf(),
            source: e,
        })?;
        if self.config.overwrite {
            remove_stale_records(work_dir)?;
        }

        let pose_options = self.pose_options(poses)?;
        let mut cmds = Vec::with_capacity(poses.len() * self.config.nstruct.max(1) as usize);
        for (pose, pose_opts) in poses.iter().zip(pose_options) {
            for replica in 1..=self.config.nstruct.max(1) {
                cmds.push(self.write_cmd(pose, replica, work_dir, pose_opts)?);
            }
        }

        starter.start(&cmds, &format!("scoring_{}", prefix), work_dir)?;

        let outcome = Reconciler::new(work_dir)
            .with_artifact_ext(self.config.artifact_ext.as_str())
            .with_barrier(self.config.barrier_policy())
            .collect()?;
        if !outcome.skipped.is_empty() {
            warn!(
                "Stage '{}' skipped {} record file(s); their artifacts were reindexed by the sweep pass",
                prefix,
                outcome.skipped.len()
            );
        }

        outcome.table.save(&scorefile, format)?;
        info!(
            "Stage '{}' produced {} scored pose(s); table persisted at '{}'",
            prefix,
            outcome.table.len(),
            scorefile.display()
        );
        Ok(outcome.table)
    }

    fn pose_options<'a>(&'a self, poses: &[PathBuf]) -> Result<Vec<Option<&'a str>>, StageError> {
        match &self.config.pose_options {
            None => Ok(vec![None; poses.len()]),
            Some(options) if options.len() == poses.len() => {
                Ok(options.iter().map(|s| Some(s.as_str())).collect())
            }
            Some(options) => Err(StageError::PoseOptionsMismatch {
                poses: poses.len(),
                options: options.len(),
            }),
        }
    }

    /// Assembles the command for one pose replica. The replica prefix and the
    /// record file name establish the naming contract the reconciler relies
    /// on afterwards.
    fn write_cmd(
        &self,
        pose: &Path,
        replica: u32,
        work_dir: &Path,
        pose_opts: Option<&str>,
    ) -> Result<String, StageError> {
        let stem = pose
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| StageError::InvalidPose {
                path: pose.to_path_buf(),
            })?;

        let options = ToolOptions::merge(self.config.options.as_deref(), pose_opts, OPTION_SEP);
        options.ensure_absent(RESERVED_OPTIONS, OPTION_SEP)?;

        let mut cmd = format!(
            "{exe} -out:path:all {dir} -in:file:s {pose} -out:prefix {prefix} -out:file:scorefile {record} -out:file:scorefile_format json",
            exe = self.config.executable.display(),
            dir = work_dir.display(),
            pose = pose.display(),
            prefix = naming::replica_prefix(replica),
            record = naming::record_file_name(replica, stem),
        );
        let rendered = options.render(OPTION_SEP);
        if !rendered.is_empty() {
            cmd.push(' ');
            cmd.push_str(&rendered);
        }
        if self.config.overwrite {
            cmd.push_str(" -overwrite");
        }
        Ok(cmd)
    }
}

fn validate_executable(path: &Path) -> Result<(), StageError> {
    if !path.is_file() {
        return Err(StageError::Executable {
            path: path.to_path_buf(),
        });
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let executable = std::fs::metadata(path)
            .map(|m| m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false);
        if !executable {
            return Err(StageError::Executable {
                path: path.to_path_buf(),
            });
        }
    }
    Ok(())
}

fn remove_stale_records(work_dir: &Path) -> Result<(), StageError> {
    let entries = std::fs::read_dir(work_dir).map_err(|e| StageError::Io {
        path: work_dir.to_path_buf(),
        source: e,
    })?;
    for entry in entries {
        let entry = entry.map_err(|e| StageError::Io {
            path: work_dir.to_path_buf(),
            source: e,
        })?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if naming::record_decoy(&name).is_some() {
            info!("Removing stale record file '{}'", name);
            std::fs::remove_file(entry.path()).map_err(|e| StageError::Io {
                path: entry.path(),
                source: e,
            })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::table::StorageFormat;
    use crate::engine::jobstarter::{JobError, LocalJobStarter};
    use serde_json::Value;
    use std::fs;

    struct RefusingStarter;

    impl JobStarter for RefusingStarter {
        fn start(&self, _: &[String], _: &str, _: &Path) -> Result<(), JobError> {
            panic!("stage dispatched a batch although its score table exists");
        }

        fn max_cores(&self) -> usize {
            1
        }
    }

    /// Fake scoring tool: writes the record file and artifact the real suite
    /// would, honoring the stage's naming contract.
    #[cfg(unix)]
    fn fake_tool(dir: &Path) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake_scorer.sh");
        fs::write(
            &path,
            concat!(
                "#!/bin/sh\n",
                "# $2=-out:path:all value, $4=pose, $6=prefix, $8=scorefile\n",
                "dir=$2; pose=$4; prefix=$6; scorefile=$8\n",
                "stem=$(basename \"$pose\" .pdb)\n",
                "printf '{\"decoy\":\"%s%s\",\"rmsd\":1.5}' \"$prefix\" \"$stem\" > \"$dir/$scorefile\"\n",
                "printf 'ATOM\\n' > \"$dir/$prefix$stem.pdb\"\n",
            ),
        )
        .unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn fast_config(executable: impl Into<PathBuf>) -> StageConfig {
        let mut config = StageConfig::new(executable);
        config.barrier_max_attempts = 20;
        config.barrier_interval_ms = 10;
        config
    }

    #[test]
    fn write_cmd_assembles_the_naming_contract() {
        let config = StageConfig::new("/opt/tools/scorer");
        let stage = ScoringStage::new(config);
        let cmd = stage
            .write_cmd(Path::new("/data/pose1.pdb"), 2, Path::new("/work"), None)
            .unwrap();
        assert_eq!(
            cmd,
            "/opt/tools/scorer -out:path:all /work -in:file:s /data/pose1.pdb \
             -out:prefix r0002_ -out:file:scorefile r0002_pose1_score.json \
             -out:file:scorefile_format json"
        );
    }

    #[test]
    fn write_cmd_appends_merged_options_and_overwrite() {
        let mut config = StageConfig::new("/opt/tools/scorer");
        config.options = Some("-ex1".to_string());
        config.overwrite = true;
        let stage = ScoringStage::new(config);
        let cmd = stage
            .write_cmd(
                Path::new("/data/pose1.pdb"),
                1,
                Path::new("/work"),
                Some("-nstruct_label=false"),
            )
            .unwrap();
        assert!(cmd.ends_with("-nstruct_label=false -ex1 -overwrite"));
    }

    #[test]
    fn write_cmd_rejects_reserved_options() {
        let mut config = StageConfig::new("/opt/tools/scorer");
        config.options = Some("-out:path:all=/elsewhere".to_string());
        let stage = ScoringStage::new(config);
        assert!(matches!(
            stage.write_cmd(Path::new("/data/pose1.pdb"), 1, Path::new("/work"), None),
            Err(StageError::ForbiddenOption { .. })
        ));
    }

    #[test]
    fn run_rejects_mismatched_pose_options() {
        let mut config = fast_config("/bin/sh");
        config.pose_options = Some(vec!["-ex1".to_string()]);
        let stage = ScoringStage::new(config);
        let dir = tempfile::tempdir().unwrap();
        let poses = vec![PathBuf::from("/a.pdb"), PathBuf::from("/b.pdb")];
        assert!(matches!(
            stage.run(&poses, "mismatch", dir.path(), &LocalJobStarter::new(1)),
            Err(StageError::PoseOptionsMismatch {
                poses: 2,
                options: 1
            })
        ));
    }

    #[test]
    fn run_rejects_missing_executable() {
        let stage = ScoringStage::new(fast_config("/no/such/tool"));
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            stage.run(&[], "missing", dir.path(), &LocalJobStarter::new(1)),
            Err(StageError::Executable { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn run_scores_poses_and_persists_the_table() {
        let tools = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let poses_dir = tempfile::tempdir().unwrap();
        let pose1 = poses_dir.path().join("pose1.pdb");
        let pose2 = poses_dir.path().join("pose2.pdb");
        fs::write(&pose1, "ATOM\n").unwrap();
        fs::write(&pose2, "ATOM\n").unwrap();

        let mut config = fast_config(fake_tool(tools.path()));
        config.nstruct = 2;
        let stage = ScoringStage::new(config);
        let table = stage
            .run(
                &[pose1, pose2],
                "stage1",
                work.path(),
                &LocalJobStarter::new(2),
            )
            .unwrap();

        assert_eq!(table.len(), 4);
        for description in ["pose1_0001", "pose1_0002", "pose2_0001", "pose2_0002"] {
            let row = table.get(description).unwrap();
            assert_eq!(row.get("rmsd"), Some(&Value::from(1.5)));
            assert!(
                work.path()
                    .join(format!("{}.pdb", description))
                    .is_file()
            );
        }
        assert!(work.path().join("stage1_scores.csv").is_file());
    }

    #[cfg(unix)]
    #[test]
    fn run_skips_stage_when_score_table_exists() {
        let tools = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let poses_dir = tempfile::tempdir().unwrap();
        let pose = poses_dir.path().join("pose1.pdb");
        fs::write(&pose, "ATOM\n").unwrap();

        let stage = ScoringStage::new(fast_config(fake_tool(tools.path())));
        let first = stage
            .run(
                std::slice::from_ref(&pose),
                "stage1",
                work.path(),
                &LocalJobStarter::new(1),
            )
            .unwrap();
        assert_eq!(first.len(), 1);

        // Second run must load the marker and never dispatch.
        let second = stage
            .run(
                std::slice::from_ref(&pose),
                "stage1",
                work.path(),
                &RefusingStarter,
            )
            .unwrap();
        assert_eq!(second.len(), 1);
        assert!(second.get("pose1_0001").is_some());
    }

    #[cfg(unix)]
    #[test]
    fn overwrite_recomputes_and_clears_stale_records() {
        let tools = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let poses_dir = tempfile::tempdir().unwrap();
        let pose = poses_dir.path().join("pose1.pdb");
        fs::write(&pose, "ATOM\n").unwrap();

        let mut config = fast_config(fake_tool(tools.path()));
        config.overwrite = true;
        let stage = ScoringStage::new(config);

        // A stale record from an interrupted earlier run.
        fs::write(
            work.path().join("r0009_stale_score.json"),
            r#"{"decoy":"0009_stale"}"#,
        )
        .unwrap();

        let table = stage
            .run(
                std::slice::from_ref(&pose),
                "stage1",
                work.path(),
                &LocalJobStarter::new(1),
            )
            .unwrap();
        assert_eq!(table.len(), 1);
        assert!(table.get("stale_0009").is_none());
        assert!(!work.path().join("r0009_stale_score.json").exists());
    }
}
