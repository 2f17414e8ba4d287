//! Adapters - batch systems that execute job commands.

mod cluster;
mod local;

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::TreeConfig;
use crate::error::{JobTreeError, Result};

pub use cluster::ClusterBatchSystem;
pub use local::{LocalBatchSystem, Worker};

/// Try count forced by the acid test. If each attempt fails independently
/// with probability 1/2, a job still fails after 32 tries about once in
/// 4 billion.
pub const ACID_TEST_TRY_COUNT: u32 = 32;

/// Lock bookkeeping maps; a panic elsewhere never leaves them half-written.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Known single batch systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchSystemKind {
    SingleMachine,
    AcidTest,
    Parasol,
    GridEngine,
    Torque,
    Drmaa,
    DrmaaTorque,
}

impl BatchSystemKind {
    pub const ALL: [Self; 7] = [
        Self::SingleMachine,
        Self::AcidTest,
        Self::Parasol,
        Self::GridEngine,
        Self::Torque,
        Self::Drmaa,
        Self::DrmaaTorque,
    ];

    /// Parse batch system from name, ignoring case, `_` and `-`
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized: String = name
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_lowercase();
        match normalized.as_str() {
            "singlemachine" | "local" => Some(Self::SingleMachine),
            "acidtest" => Some(Self::AcidTest),
            "parasol" => Some(Self::Parasol),
            "gridengine" | "sge" => Some(Self::GridEngine),
            "torque" | "pbs" => Some(Self::Torque),
            "drmaa" => Some(Self::Drmaa),
            "drmaatorque" => Some(Self::DrmaaTorque),
            _ => None,
        }
    }

    /// Get batch system name
    pub fn name(&self) -> &'static str {
        match self {
            Self::SingleMachine => "singleMachine",
            Self::AcidTest => "acidTest",
            Self::Parasol => "parasol",
            Self::GridEngine => "gridEngine",
            Self::Torque => "torque",
            Self::Drmaa => "drmaa",
            Self::DrmaaTorque => "drmaaTorque",
        }
    }

    /// Preferred seconds between rescue polls
    pub fn rescue_frequency(&self) -> f64 {
        match self {
            Self::SingleMachine | Self::AcidTest | Self::Parasol => 5400.0,
            Self::GridEngine | Self::Torque | Self::Drmaa | Self::DrmaaTorque => 1800.0,
        }
    }

    /// Build this batch system from the configuration.
    ///
    /// `max_jobs` overrides `config.max_jobs` for this handle only. The acid
    /// test forces the configuration's try count.
    pub fn construct(
        &self,
        config: &mut TreeConfig,
        max_jobs: Option<u64>,
    ) -> Result<SingleBatchSystem> {
        let max_jobs = max_jobs.unwrap_or(config.max_jobs);
        let system = match self {
            Self::SingleMachine => SingleBatchSystem::Local(LocalBatchSystem::new(
                *self,
                config,
                max_jobs,
                Worker::Shell,
            )),
            Self::AcidTest => {
                config.try_count = ACID_TEST_TRY_COUNT;
                SingleBatchSystem::Local(LocalBatchSystem::new(
                    *self,
                    config,
                    max_jobs,
                    Worker::Faulty { kill_probability: 0.5 },
                ))
            }
            Self::Parasol | Self::GridEngine | Self::Torque => {
                SingleBatchSystem::Cluster(ClusterBatchSystem::new(*self, config, max_jobs))
            }
            Self::Drmaa | Self::DrmaaTorque => {
                return Err(JobTreeError::BackendUnavailable {
                    backend: self.name().to_string(),
                    reason: "DRMAA bindings are not built into this binary".to_string(),
                })
            }
        };
        tracing::info!(backend = self.name(), max_jobs, "Using the {} batch system", self.name());
        Ok(system)
    }
}

impl fmt::Display for BatchSystemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identifier a batch system hands out for an issued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the scheduling loop asks a batch system to run.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSubmission {
    pub command: String,
    pub memory: u64,
    pub cpu: u32,
}

impl JobSubmission {
    pub fn new(command: impl Into<String>, memory: u64, cpu: u32) -> Self {
        Self {
            command: command.into(),
            memory,
            cpu,
        }
    }
}

/// A finished job as reported by a batch system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobUpdate {
    pub job_id: JobId,
    /// Process exit code; -1 when the job was killed
    pub exit_code: i32,
}

/// Capabilities every batch system handle exposes to the scheduling loop.
#[async_trait]
pub trait BatchSystem: Send + Sync {
    /// Name used in logs
    fn name(&self) -> String;

    /// Maximum unfinished jobs this handle accepts
    fn max_jobs(&self) -> u64;

    /// Preferred seconds between rescue polls
    fn rescue_frequency(&self) -> f64;

    /// Issue a job, returning the id updates will refer to
    async fn issue_job(&self, job: JobSubmission) -> Result<JobId>;

    /// Jobs issued and not yet reported finished
    async fn issued_jobs(&self) -> Vec<JobId>;

    /// Wait up to `max_wait` for a finished job
    async fn updated_job(&self, max_wait: Duration) -> Option<JobUpdate>;
}

/// A handle to exactly one backend.
pub enum SingleBatchSystem {
    Local(LocalBatchSystem),
    Cluster(ClusterBatchSystem),
}

impl SingleBatchSystem {
    pub fn kind(&self) -> BatchSystemKind {
        match self {
            Self::Local(local) => local.kind(),
            Self::Cluster(cluster) => cluster.kind(),
        }
    }
}

#[async_trait]
impl BatchSystem for SingleBatchSystem {
    fn name(&self) -> String {
        self.kind().name().to_string()
    }

    fn max_jobs(&self) -> u64 {
        match self {
            Self::Local(local) => local.max_jobs(),
            Self::Cluster(cluster) => cluster.max_jobs(),
        }
    }

    fn rescue_frequency(&self) -> f64 {
        self.kind().rescue_frequency()
    }

    async fn issue_job(&self, job: JobSubmission) -> Result<JobId> {
        match self {
            Self::Local(local) => local.issue_job(job).await,
            Self::Cluster(cluster) => cluster.issue_job(job).await,
        }
    }

    async fn issued_jobs(&self) -> Vec<JobId> {
        match self {
            Self::Local(local) => local.issued_jobs().await,
            Self::Cluster(cluster) => cluster.issued_jobs().await,
        }
    }

    async fn updated_job(&self, max_wait: Duration) -> Option<JobUpdate> {
        match self {
            Self::Local(local) => local.updated_job(max_wait).await,
            Self::Cluster(cluster) => cluster.updated_job(max_wait).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_match_ignoring_case_and_separators() {
        let single = Some(BatchSystemKind::SingleMachine);
        assert_eq!(BatchSystemKind::from_name("singleMachine"), single);
        assert_eq!(BatchSystemKind::from_name("single_machine"), single);
        assert_eq!(BatchSystemKind::from_name("acid_test"), Some(BatchSystemKind::AcidTest));
        assert_eq!(BatchSystemKind::from_name("GridEngine"), Some(BatchSystemKind::GridEngine));
        assert_eq!(BatchSystemKind::from_name("DrmaaTorque"), Some(BatchSystemKind::DrmaaTorque));
        assert_eq!(BatchSystemKind::from_name("quantumCluster"), None);
    }

    #[test]
    fn canonical_names_roundtrip() {
        for kind in BatchSystemKind::ALL {
            assert_eq!(BatchSystemKind::from_name(kind.name()), Some(kind));
        }
    }
}
