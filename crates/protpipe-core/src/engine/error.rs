use crate::engine::retry::RetryTimeout;
use std::path::PathBuf;
use thiserror::Error;

/// Failures of the score reconciliation pass. Malformed record files are not
/// represented here: they are isolated per record and reported through
/// [`crate::engine::reconcile::Reconciliation::skipped`].
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failed to scan working directory '{work_dir}': {source}", work_dir = work_dir.display())]
    Scan {
        work_dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "artifact readiness barrier failed in '{work_dir}': expected {expected} '.{ext}' files, found {found}: {source}",
        work_dir = work_dir.display()
    )]
    ArtifactMissing {
        work_dir: PathBuf,
        ext: String,
        expected: usize,
        found: usize,
        #[source]
        source: RetryTimeout,
    },

    #[error("failed to rename artifact '{from}' to '{to}': {source}", from = from.display(), to = to.display())]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("renamed artifact never appeared at '{to}' (from '{from}')", from = from.display(), to = to.display())]
    RenameUnverified { from: PathBuf, to: PathBuf },
}
