use crate::core::table::TableError;
use crate::engine::error::ReconcileError;
use crate::engine::jobstarter::JobError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StageError {
    #[error("no usable executable at '{path}'", path = path.display())]
    Executable { path: PathBuf },

    #[error("option '{option}' is reserved by the stage and must not be supplied")]
    ForbiddenOption { option: String },

    #[error("{options} pose option string(s) supplied for {poses} pose(s)")]
    PoseOptionsMismatch { poses: usize, options: usize },

    #[error("pose path '{path}' has no usable file name", path = path.display())]
    InvalidPose { path: PathBuf },

    #[error("failed to parse stage config '{path}': {source}", path = path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: Box<toml::de::Error>,
    },

    #[error("I/O error on '{path}': {source}", path = path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("expected batch output '{path}' was not produced", path = path.display())]
    MissingOutput { path: PathBuf },

    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Job(#[from] JobError),
}
