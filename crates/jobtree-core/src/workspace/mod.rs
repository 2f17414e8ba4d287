//! Workspace layout - the on-disk home of a job tree.

mod lifecycle;

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{JobTreeError, Result};

pub use lifecycle::{create_first_job, resolve, ResolveMode, ResolveOptions, Resolved};

pub const CONFIG_FILE: &str = "config.yaml";
pub const ENVIRONMENT_FILE: &str = "environ.json";
pub const JOBS_DIR: &str = "jobs";

/// The three artifacts every valid workspace holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Artifact {
    Config,
    Environment,
    JobRecords,
}

impl Artifact {
    pub const ALL: [Self; 3] = [Self::Config, Self::Environment, Self::JobRecords];

    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Config => CONFIG_FILE,
            Self::Environment => ENVIRONMENT_FILE,
            Self::JobRecords => JOBS_DIR,
        }
    }

    pub fn path_in(&self, root: &Path) -> PathBuf {
        root.join(self.file_name())
    }

    fn is_present(&self, root: &Path) -> bool {
        let path = self.path_in(root);
        match self {
            Self::Config | Self::Environment => path.is_file(),
            Self::JobRecords => path.is_dir(),
        }
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config => write!(f, "config file {CONFIG_FILE}"),
            Self::Environment => write!(f, "environment file {ENVIRONMENT_FILE}"),
            Self::JobRecords => write!(f, "job records directory {JOBS_DIR}/"),
        }
    }
}

/// Paths of one workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> PathBuf {
        Artifact::Config.path_in(&self.root)
    }

    pub fn environment_path(&self) -> PathBuf {
        Artifact::Environment.path_in(&self.root)
    }

    pub fn jobs_dir(&self) -> PathBuf {
        Artifact::JobRecords.path_in(&self.root)
    }

    /// Artifacts missing from this workspace
    pub fn missing_artifacts(&self) -> Vec<Artifact> {
        Artifact::ALL
            .into_iter()
            .filter(|artifact| !artifact.is_present(&self.root))
            .collect()
    }

    /// Fail with the first missing artifact, if any
    pub fn validate(&self) -> Result<()> {
        match self.missing_artifacts().first() {
            Some(artifact) => Err(JobTreeError::WorkspaceCorrupt {
                root: self.root.clone(),
                artifact: *artifact,
            }),
            None => Ok(()),
        }
    }
}
