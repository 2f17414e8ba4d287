//! Combined batch system - splits submissions across two backends by memory.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::adapters::{
    lock, BatchSystem, BatchSystemKind, JobId, JobSubmission, JobUpdate, SingleBatchSystem,
};
use crate::error::{JobTreeError, Result};

/// `"nameA nameB memoryThreshold [maxJobsA]"`
#[derive(Debug, Clone, PartialEq)]
pub struct HybridSpec {
    pub first: BatchSystemKind,
    pub second: BatchSystemKind,
    /// Jobs requesting at most this many bytes go to `first`
    pub memory_threshold: f64,
    /// Concurrency bound for `first` only; `second` keeps the configured one
    pub max_jobs_first: Option<u64>,
}

impl HybridSpec {
    pub fn parse(spec: &str) -> Result<Self> {
        let fields: Vec<&str> = spec.split_whitespace().collect();
        match fields.len() {
            0 => return Err(JobTreeError::unrecognized(spec, "empty batch system name")),
            1 => return Err(JobTreeError::unrecognized(spec, "not a known batch system")),
            3 | 4 => {}
            n => {
                return Err(JobTreeError::unrecognized(
                    spec,
                    format!("a combined batch system takes 3 or 4 fields, got {n}"),
                ))
            }
        }

        // "inf" is a valid threshold that sends every job to the first side.
        let memory_threshold = fields[2]
            .parse::<f64>()
            .ok()
            .filter(|threshold| !threshold.is_nan())
            .ok_or_else(|| {
                let reason = format!("memory threshold {:?} is not a number", fields[2]);
                JobTreeError::unrecognized(spec, reason)
            })?;

        let max_jobs_first = fields
            .get(3)
            .map(|field| {
                field.parse::<u64>().map_err(|_| {
                    let reason = format!("max jobs {field:?} is not a whole number");
                    JobTreeError::unrecognized(spec, reason)
                })
            })
            .transpose()?;

        let kind = |name: &str| {
            BatchSystemKind::from_name(name).ok_or_else(|| {
                JobTreeError::unrecognized(spec, format!("{name:?} is not a known batch system"))
            })
        };

        Ok(Self {
            first: kind(fields[0])?,
            second: kind(fields[1])?,
            memory_threshold,
            max_jobs_first,
        })
    }
}

/// Which side of a combined batch system takes a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    First,
    Second,
}

/// Per-submission routing rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RoutePredicate {
    /// First side when the memory request is at most this many bytes
    MemoryAtMost(f64),
}

impl RoutePredicate {
    pub fn route(&self, job: &JobSubmission) -> Route {
        match self {
            Self::MemoryAtMost(threshold) => {
                if job.memory as f64 <= *threshold {
                    Route::First
                } else {
                    Route::Second
                }
            }
        }
    }
}

#[derive(Default)]
struct JobMap {
    outer: HashMap<JobId, (Route, JobId)>,
    inner: HashMap<(Route, JobId), JobId>,
    /// Exit codes of inner jobs that finished before `issue_job` mapped them
    early: HashMap<(Route, JobId), i32>,
    /// Translated updates waiting to be handed out
    ready: VecDeque<JobUpdate>,
}

/// Two batch systems behind one handle, chosen per submission.
pub struct CombinedBatchSystem {
    first: SingleBatchSystem,
    second: SingleBatchSystem,
    predicate: RoutePredicate,
    next_id: AtomicU64,
    jobs: Mutex<JobMap>,
}

impl CombinedBatchSystem {
    pub fn new(
        first: SingleBatchSystem,
        second: SingleBatchSystem,
        predicate: RoutePredicate,
    ) -> Self {
        Self {
            first,
            second,
            predicate,
            next_id: AtomicU64::new(0),
            jobs: Mutex::new(JobMap::default()),
        }
    }

    pub fn first(&self) -> &SingleBatchSystem {
        &self.first
    }

    pub fn second(&self) -> &SingleBatchSystem {
        &self.second
    }

    pub fn predicate(&self) -> RoutePredicate {
        self.predicate
    }

    /// Side a submission would be issued to
    pub fn route(&self, job: &JobSubmission) -> Route {
        self.predicate.route(job)
    }

    /// Give an inner job its outer id.
    fn record(&self, route: Route, inner: JobId) -> JobId {
        let outer = JobId(self.next_id.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(job_id = %outer, inner_id = %inner, route = ?route, "Routed job");

        let mut jobs = lock(&self.jobs);
        match jobs.early.remove(&(route, inner)) {
            Some(exit_code) => jobs.ready.push_back(JobUpdate {
                job_id: outer,
                exit_code,
            }),
            None => {
                jobs.outer.insert(outer, (route, inner));
                jobs.inner.insert((route, inner), outer);
            }
        }
        outer
    }

    fn side(&self, route: Route) -> &SingleBatchSystem {
        match route {
            Route::First => &self.first,
            Route::Second => &self.second,
        }
    }
}

#[async_trait]
impl BatchSystem for CombinedBatchSystem {
    fn name(&self) -> String {
        format!("combined({}, {})", self.first.name(), self.second.name())
    }

    fn max_jobs(&self) -> u64 {
        self.first.max_jobs().saturating_add(self.second.max_jobs())
    }

    fn rescue_frequency(&self) -> f64 {
        self.first.rescue_frequency().min(self.second.rescue_frequency())
    }

    async fn issue_job(&self, job: JobSubmission) -> Result<JobId> {
        let route = self.route(&job);
        let inner = self.side(route).issue_job(job).await?;

        Ok(self.record(route, inner))
    }

    async fn issued_jobs(&self) -> Vec<JobId> {
        let jobs = lock(&self.jobs);
        let mut ids: Vec<JobId> = jobs
            .outer
            .keys()
            .copied()
            .chain(jobs.ready.iter().map(|update| update.job_id))
            .collect();
        ids.sort();
        ids
    }

    async fn updated_job(&self, max_wait: Duration) -> Option<JobUpdate> {
        let deadline = Instant::now() + max_wait;
        loop {
            if let Some(update) = lock(&self.jobs).ready.pop_front() {
                return Some(update);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            let (route, update) = tokio::select! {
                Some(update) = self.first.updated_job(remaining) => (Route::First, update),
                Some(update) = self.second.updated_job(remaining) => (Route::Second, update),
                else => return None,
            };

            let mut jobs = lock(&self.jobs);
            match jobs.inner.remove(&(route, update.job_id)) {
                Some(outer) => {
                    jobs.outer.remove(&outer);
                    return Some(JobUpdate {
                        job_id: outer,
                        exit_code: update.exit_code,
                    });
                }
                None => {
                    // Finished before `issue_job` recorded it; handed out by `record`.
                    jobs.early.insert((route, update.job_id), update.exit_code);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_three_and_four_field_forms() {
        let spec = HybridSpec::parse("singleMachine parasol 1e9").expect("three fields");
        assert_eq!(spec.first, BatchSystemKind::SingleMachine);
        assert_eq!(spec.second, BatchSystemKind::Parasol);
        assert_eq!(spec.memory_threshold, 1e9);
        assert_eq!(spec.max_jobs_first, None);

        let spec =
            HybridSpec::parse("  single_machine   gridEngine 1000000 5 ").expect("four fields");
        assert_eq!(spec.second, BatchSystemKind::GridEngine);
        assert_eq!(spec.max_jobs_first, Some(5));
    }

    #[test]
    fn infinite_threshold_routes_everything_first() {
        let spec = HybridSpec::parse("singleMachine parasol inf").expect("inf threshold");
        assert_eq!(spec.memory_threshold, f64::INFINITY);

        let predicate = RoutePredicate::MemoryAtMost(spec.memory_threshold);
        let job = JobSubmission::new("true", u64::MAX, 1);
        assert_eq!(predicate.route(&job), Route::First);
    }

    #[test]
    fn rejects_malformed_specs() {
        for spec in [
            "",
            "quantumCluster",
            "singleMachine parasol",
            "a b 100 x y",
            "a b notanumber",
            "singleMachine parasol notanumber",
            "singleMachine parasol nan",
            "singleMachine parasol 100 many",
            "singleMachine quantumCluster 100",
        ] {
            let err = HybridSpec::parse(spec).expect_err(spec);
            assert!(
                matches!(err, JobTreeError::UnrecognizedBackend { .. }),
                "{spec:?} gave {err}"
            );
        }
    }

    #[test]
    fn threshold_is_inclusive_to_first() {
        let predicate = RoutePredicate::MemoryAtMost(1_000_000.0);
        let route = |memory| predicate.route(&JobSubmission::new("true", memory, 1));

        assert_eq!(route(500_000), Route::First);
        assert_eq!(route(1_000_000), Route::First);
        assert_eq!(route(1_000_001), Route::Second);
        assert_eq!(route(2_000_000), Route::Second);
    }

    fn local_pair() -> CombinedBatchSystem {
        let mut config = crate::workspace::ResolveOptions::default()
            .draft_config(std::path::Path::new("/tmp/tree"));
        let side = |config: &mut crate::config::TreeConfig| {
            BatchSystemKind::SingleMachine
                .construct(config, None)
                .expect("local batch system")
        };
        let first = side(&mut config);
        let second = side(&mut config);
        CombinedBatchSystem::new(first, second, RoutePredicate::MemoryAtMost(1000.0))
    }

    #[tokio::test]
    async fn update_arriving_before_its_mapping_is_kept() {
        let combined = local_pair();

        // Issue on the inner side only, so the update lands before `record`.
        let inner = combined
            .first()
            .issue_job(JobSubmission::new("exit 7", 10, 1))
            .await
            .expect("issue");
        assert_eq!(combined.updated_job(Duration::from_secs(2)).await, None);

        let outer = combined.record(Route::First, inner);
        assert_eq!(combined.issued_jobs().await, vec![outer]);

        let update = combined
            .updated_job(Duration::from_millis(10))
            .await
            .expect("buffered update");
        assert_eq!(update, JobUpdate { job_id: outer, exit_code: 7 });
        assert!(combined.issued_jobs().await.is_empty());
    }
}
