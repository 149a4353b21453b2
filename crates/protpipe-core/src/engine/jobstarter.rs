//! Job dispatch.
//!
//! Pipeline stages hand their command batches to a [`JobStarter`] and get
//! control back only once every command has finished. Scheduler-backed
//! starters live outside this crate; [`LocalJobStarter`] runs the batch on
//! the local machine, sharded across a fixed number of cores.

use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum JobError {
    #[error("failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error("failed to spawn command '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write job log '{path}': {source}", path = path.display())]
    Log {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("command '{command}' exited with {status} (log: '{log}')", log = log.display())]
    CommandFailed {
        command: String,
        status: String,
        log: PathBuf,
    },
}

/// Blocking dispatch of a command batch. Implementations return only after
/// all commands have completed.
pub trait JobStarter {
    fn start(&self, cmds: &[String], jobname: &str, output_dir: &Path) -> Result<(), JobError>;

    /// Core budget of this starter, used by stages to shard their inputs.
    fn max_cores(&self) -> usize;
}

/// Runs commands through `sh -c` on a local worker pool, capturing each
/// command's stdout/stderr into a per-job log file in the output directory.
#[derive(Debug, Clone)]
pub struct LocalJobStarter {
    max_cores: usize,
}

impl LocalJobStarter {
    pub fn new(max_cores: usize) -> Self {
        Self {
            max_cores: max_cores.max(1),
        }
    }
}

impl Default for LocalJobStarter {
    fn default() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::new(cores)
    }
}

impl JobStarter for LocalJobStarter {
    fn start(&self, cmds: &[String], jobname: &str, output_dir: &Path) -> Result<(), JobError> {
        if cmds.is_empty() {
            debug!("Job '{}' has no commands; nothing to start", jobname);
            return Ok(());
        }
        info!(
            "Starting job '{}': {} command(s) on {} core(s)",
            jobname,
            cmds.len(),
            self.max_cores
        );
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.max_cores.min(cmds.len()))
            .build()?;

        // Every command is attempted; the first failure (in batch order) is
        // reported after the whole batch has drained.
        let results: Vec<Result<(), JobError>> = pool.install(|| {
            cmds.par_iter()
                .enumerate()
                .map(|(i, cmd)| run_command(cmd, jobname, i + 1, output_dir))
                .collect()
        });
        for result in results {
            result?;
        }
        info!("Job '{}' finished", jobname);
        Ok(())
    }

    fn max_cores(&self) -> usize {
        self.max_cores
    }
}

fn run_command(cmd: &str, jobname: &str, index: usize, output_dir: &Path) -> Result<(), JobError> {
    debug!("Running command {:04} of job '{}'", index, jobname);
    let output = Command::new("sh")
        .arg("-c")
        .arg(cmd)
        .current_dir(output_dir)
        .output()
        .map_err(|e| JobError::Spawn {
            command: cmd.to_string(),
            source: e,
        })?;

    let log = output_dir.join(format!("{}_{:04}.log", jobname, index));
    let mut content = output.stdout;
    content.extend_from_slice(&output.stderr);
    std::fs::write(&log, &content).map_err(|e| JobError::Log {
        path: log.clone(),
        source: e,
    })?;

    if !output.status.success() {
        return Err(JobError::CommandFailed {
            command: cmd.to_string(),
            status: output.status.to_string(),
            log,
        });
    }
    Ok(())
}

/// Distributes `items` over at most `n` contiguous, near-equal shards.
/// Shard sizes differ by at most one; no shard is empty.
pub fn split_into<T>(items: Vec<T>, n: usize) -> Vec<Vec<T>> {
    let n = n.max(1).min(items.len());
    if n == 0 {
        return Vec::new();
    }
    let base = items.len() / n;
    let remainder = items.len() % n;
    let mut shards = Vec::with_capacity(n);
    let mut iter = items.into_iter();
    for i in 0..n {
        let size = base + usize::from(i < remainder);
        shards.push(iter.by_ref().take(size).collect());
    }
    shards
}
