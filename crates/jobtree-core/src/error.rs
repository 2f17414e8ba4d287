//! Error taxonomy for workspace bootstrap and batch-system dispatch.

use std::path::PathBuf;

use thiserror::Error;

use crate::workspace::Artifact;

/// Errors raised while resolving a workspace or driving a batch system.
///
/// None of these are retried here; they abort the resolve and surface to the
/// caller unchanged.
#[derive(Debug, Error)]
pub enum JobTreeError {
    /// A required input for the selected mode was not supplied.
    #[error("usage error: {0}")]
    Usage(String),

    /// An existing workspace is missing one of its required artifacts.
    #[error("workspace {} is corrupt: missing {artifact}", .root.display())]
    WorkspaceCorrupt { root: PathBuf, artifact: Artifact },

    /// The workspace path exists but is not a directory.
    #[error("{} exists and is not a directory", .0.display())]
    NotADirectory(PathBuf),

    /// The backend selector is neither a known backend nor a hybrid spec.
    #[error("unrecognised batch system {spec:?}: {reason}")]
    UnrecognizedBackend { spec: String, reason: String },

    /// The backend is known but cannot be constructed in this build.
    #[error("batch system {backend} is unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    /// The backend already holds its maximum number of unfinished jobs.
    #[error("batch system {backend} is saturated ({limit} jobs issued)")]
    Saturated { backend: String, limit: u64 },

    /// A queue rejected a submission.
    #[error("batch system {backend} rejected submission: {message}")]
    Submission { backend: String, message: String },

    /// A launched `jobtree` process exited unsuccessfully.
    #[error("jobtree exited with {status}")]
    LaunchFailed { status: std::process::ExitStatus },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(#[from] serde_yaml::Error),

    #[error("record error: {0}")]
    Record(#[from] serde_json::Error),
}

impl JobTreeError {
    pub(crate) fn unrecognized(spec: &str, reason: impl Into<String>) -> Self {
        Self::UnrecognizedBackend {
            spec: spec.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, JobTreeError>;
