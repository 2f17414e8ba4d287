//! Router - builds the batch system named by the configuration.

mod hybrid;

use std::time::Duration;

use async_trait::async_trait;

use crate::adapters::{
    BatchSystem, BatchSystemKind, JobId, JobSubmission, JobUpdate, SingleBatchSystem,
};
use crate::config::TreeConfig;
use crate::error::Result;

pub use hybrid::{CombinedBatchSystem, HybridSpec, Route, RoutePredicate};

/// A parsed backend selector.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchSystemSpec {
    Single(BatchSystemKind),
    Hybrid(HybridSpec),
}

impl BatchSystemSpec {
    /// Parse a backend selector without constructing anything.
    ///
    /// A known name selects that backend; anything else must be a hybrid spec
    /// `"nameA nameB memoryThreshold [maxJobsA]"`.
    pub fn parse(spec: &str) -> Result<Self> {
        if let Some(kind) = BatchSystemKind::from_name(spec.trim()) {
            return Ok(Self::Single(kind));
        }
        HybridSpec::parse(spec).map(Self::Hybrid)
    }

    /// Construct the handle. The acid test may force `config.try_count`;
    /// nothing else in `config` changes.
    pub fn build(&self, config: &mut TreeConfig) -> Result<BatchSystemHandle> {
        match self {
            Self::Single(kind) => kind.construct(config, None).map(BatchSystemHandle::Single),
            Self::Hybrid(spec) => {
                let first = spec.first.construct(config, spec.max_jobs_first)?;
                let second = spec.second.construct(config, None)?;
                tracing::info!(
                    first = %spec.first,
                    second = %spec.second,
                    memory_threshold = spec.memory_threshold,
                    "Using a combined batch system"
                );
                Ok(BatchSystemHandle::Combined(CombinedBatchSystem::new(
                    first,
                    second,
                    RoutePredicate::MemoryAtMost(spec.memory_threshold),
                )))
            }
        }
    }
}

/// Build the batch system named by `config.batch_system`.
pub fn construct(config: &mut TreeConfig) -> Result<BatchSystemHandle> {
    let spec = BatchSystemSpec::parse(&config.batch_system)?;
    spec.build(config)
}

/// The batch system handed to the scheduling loop.
pub enum BatchSystemHandle {
    Single(SingleBatchSystem),
    Combined(CombinedBatchSystem),
}

impl BatchSystemHandle {
    pub fn as_single(&self) -> Option<&SingleBatchSystem> {
        match self {
            Self::Single(single) => Some(single),
            Self::Combined(_) => None,
        }
    }

    pub fn as_combined(&self) -> Option<&CombinedBatchSystem> {
        match self {
            Self::Single(_) => None,
            Self::Combined(combined) => Some(combined),
        }
    }
}

#[async_trait]
impl BatchSystem for BatchSystemHandle {
    fn name(&self) -> String {
        match self {
            Self::Single(single) => single.name(),
            Self::Combined(combined) => combined.name(),
        }
    }

    fn max_jobs(&self) -> u64 {
        match self {
            Self::Single(single) => single.max_jobs(),
            Self::Combined(combined) => combined.max_jobs(),
        }
    }

    fn rescue_frequency(&self) -> f64 {
        match self {
            Self::Single(single) => single.rescue_frequency(),
            Self::Combined(combined) => combined.rescue_frequency(),
        }
    }

    async fn issue_job(&self, job: JobSubmission) -> Result<JobId> {
        match self {
            Self::Single(single) => single.issue_job(job).await,
            Self::Combined(combined) => combined.issue_job(job).await,
        }
    }

    async fn issued_jobs(&self) -> Vec<JobId> {
        match self {
            Self::Single(single) => single.issued_jobs().await,
            Self::Combined(combined) => combined.issued_jobs().await,
        }
    }

    async fn updated_job(&self, max_wait: Duration) -> Option<JobUpdate> {
        match self {
            Self::Single(single) => single.updated_job(max_wait).await,
            Self::Combined(combined) => combined.updated_job(max_wait).await,
        }
    }
}

impl std::fmt::Debug for BatchSystemHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchSystemHandle")
            .field("name", &self.name())
            .field("max_jobs", &self.max_jobs())
            .field("rescue_frequency", &self.rescue_frequency())
            .finish()
    }
}
