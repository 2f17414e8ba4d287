//! Integration tests for issuing jobs through local and combined batch systems.

use std::collections::HashMap;
use std::time::Duration;

use jobtree_core::router::Route;
use jobtree_core::{
    BatchSystem, BatchSystemHandle, BatchSystemSpec, JobId, JobSubmission, JobTreeError,
    ResolveOptions, TreeConfig,
};

const WAIT: Duration = Duration::from_secs(10);

fn config() -> TreeConfig {
    ResolveOptions::default().draft_config(std::path::Path::new("/tmp/tree"))
}

fn build(spec: &str, config: &mut TreeConfig) -> BatchSystemHandle {
    BatchSystemSpec::parse(spec).unwrap().build(config).unwrap()
}

async fn drain(batch_system: &BatchSystemHandle, count: usize) -> HashMap<JobId, i32> {
    let mut finished = HashMap::new();
    while finished.len() < count {
        let update = batch_system.updated_job(WAIT).await.expect("job finished in time");
        finished.insert(update.job_id, update.exit_code);
    }
    finished
}

#[tokio::test]
async fn local_jobs_report_exit_codes() {
    let mut config = config();
    let batch_system = build("singleMachine", &mut config);

    let ok = batch_system.issue_job(JobSubmission::new("true", 1024, 1)).await.unwrap();
    let failed = batch_system.issue_job(JobSubmission::new("exit 3", 1024, 1)).await.unwrap();
    assert_eq!(batch_system.issued_jobs().await, vec![ok, failed]);

    let finished = drain(&batch_system, 2).await;
    assert_eq!(finished[&ok], 0);
    assert_eq!(finished[&failed], 3);
    assert!(batch_system.issued_jobs().await.is_empty());
}

#[tokio::test]
async fn no_update_when_nothing_is_issued() {
    let mut config = config();
    let batch_system = build("singleMachine", &mut config);

    assert_eq!(batch_system.updated_job(Duration::from_millis(50)).await, None);
}

#[tokio::test]
async fn local_batch_system_refuses_jobs_past_max_jobs() {
    let mut config = config();
    config.max_jobs = 1;
    let batch_system = build("singleMachine", &mut config);

    let first = batch_system.issue_job(JobSubmission::new("sleep 1", 1024, 1)).await.unwrap();
    let err = batch_system
        .issue_job(JobSubmission::new("true", 1024, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, JobTreeError::Saturated { limit: 1, .. }));

    let finished = drain(&batch_system, 1).await;
    assert_eq!(finished[&first], 0);
    batch_system.issue_job(JobSubmission::new("true", 1024, 1)).await.unwrap();
}

#[tokio::test]
async fn overlong_job_is_killed() {
    let mut config = config();
    config.max_job_duration = 0.2;
    let batch_system = build("singleMachine", &mut config);

    let job = batch_system.issue_job(JobSubmission::new("sleep 30", 1024, 1)).await.unwrap();
    let finished = drain(&batch_system, 1).await;
    assert_eq!(finished[&job], -1);
}

#[tokio::test]
async fn acid_test_jobs_either_finish_or_are_killed() {
    let mut config = config();
    let batch_system = build("acidTest", &mut config);
    assert_eq!(config.try_count, 32);

    let mut jobs = Vec::new();
    for _ in 0..8 {
        jobs.push(batch_system.issue_job(JobSubmission::new("true", 1024, 1)).await.unwrap());
    }
    let finished = drain(&batch_system, jobs.len()).await;
    for job in jobs {
        assert!(matches!(finished[&job], 0 | -1), "job {job} exited {}", finished[&job]);
    }
}

#[tokio::test]
async fn combined_batch_system_routes_by_memory() {
    let mut config = config();
    config.max_jobs = 100;
    let batch_system = build("singleMachine singleMachine 1000000 5", &mut config);
    assert_eq!(config.max_jobs, 100);

    let combined = batch_system.as_combined().unwrap();
    assert_eq!(combined.first().max_jobs(), 5);
    assert_eq!(combined.second().max_jobs(), 100);
    assert_eq!(batch_system.max_jobs(), 105);
    assert_eq!(batch_system.name(), "combined(singleMachine, singleMachine)");
    assert_eq!(combined.route(&JobSubmission::new("true", 1_000_000, 1)), Route::First);
    assert_eq!(combined.route(&JobSubmission::new("true", 1_000_001, 1)), Route::Second);

    let small = batch_system.issue_job(JobSubmission::new("exit 4", 500_000, 1)).await.unwrap();
    let large = batch_system.issue_job(JobSubmission::new("exit 5", 2_000_000, 1)).await.unwrap();
    assert_ne!(small, large);
    assert_eq!(batch_system.issued_jobs().await, vec![small, large]);

    let finished = drain(&batch_system, 2).await;
    assert_eq!(finished[&small], 4);
    assert_eq!(finished[&large], 5);
    assert!(batch_system.issued_jobs().await.is_empty());
}

#[tokio::test]
async fn combined_limit_saturates_first_side_only() {
    let mut config = config();
    let batch_system = build("singleMachine singleMachine 1000 1", &mut config);

    batch_system.issue_job(JobSubmission::new("sleep 1", 10, 1)).await.unwrap();
    let err = batch_system
        .issue_job(JobSubmission::new("true", 10, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, JobTreeError::Saturated { limit: 1, .. }));

    batch_system.issue_job(JobSubmission::new("true", 10_000, 1)).await.unwrap();
    drain(&batch_system, 2).await;
}

#[test]
fn failed_combined_construction_leaves_max_jobs_alone() {
    for spec in ["singleMachine drmaa 100 5", "drmaa singleMachine 100 5"] {
        let mut config = config();
        config.max_jobs = 100;
        let before = config.clone();

        let result = BatchSystemSpec::parse(spec).unwrap().build(&mut config);
        assert!(
            matches!(result, Err(JobTreeError::BackendUnavailable { .. })),
            "{spec:?} gave {result:?}"
        );
        assert_eq!(config.max_jobs, 100, "{spec}");
        assert_eq!(config, before, "{spec}");
    }
}
