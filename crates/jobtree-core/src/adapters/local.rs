//! Single machine adapter - runs jobs as local shell processes.

use std::collections::HashSet;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tokio::process::Command;
use tokio::sync::{mpsc, Semaphore};

use super::{lock, BatchSystemKind, JobId, JobSubmission, JobUpdate};
use crate::config::TreeConfig;
use crate::error::{JobTreeError, Result};

/// How a local job attempt is executed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Worker {
    /// Run the command with `sh -c`
    Shell,
    /// Run the command but kill the attempt with the given probability
    Faulty { kill_probability: f64 },
}

impl Worker {
    async fn run(self, job_id: JobId, command: &str, timeout: Option<Duration>) -> i32 {
        let mut child = match Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(err) => {
                tracing::warn!(job_id = %job_id, error = %err, "Failed to spawn job");
                return -1;
            }
        };

        let kill_after = match self {
            Self::Shell => None,
            Self::Faulty { kill_probability } => {
                let mut rng = rand::thread_rng();
                if rng.gen_bool(kill_probability) {
                    Some(Duration::from_millis(rng.gen_range(0..100)))
                } else {
                    None
                }
            }
        };
        let limit = match (kill_after, timeout) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        let status = match limit {
            Some(limit) => {
                let waited = tokio::time::timeout(limit, child.wait()).await;
                match waited {
                    Ok(status) => status,
                    Err(_) => {
                        tracing::debug!(job_id = %job_id, "Killing job");
                        let _ = child.kill().await;
                        return -1;
                    }
                }
            }
            None => child.wait().await,
        };

        match status {
            Ok(status) => status.code().unwrap_or(-1),
            Err(err) => {
                tracing::warn!(job_id = %job_id, error = %err, "Failed to wait for job");
                -1
            }
        }
    }
}

/// Runs jobs on this host, at most `max_threads` at a time.
pub struct LocalBatchSystem {
    kind: BatchSystemKind,
    max_jobs: u64,
    max_threads: usize,
    max_job_duration: Option<Duration>,
    worker: Worker,
    next_id: AtomicU64,
    issued: Mutex<HashSet<JobId>>,
    slots: Arc<Semaphore>,
    updates_tx: mpsc::UnboundedSender<JobUpdate>,
    updates_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<JobUpdate>>,
}

impl LocalBatchSystem {
    pub fn new(kind: BatchSystemKind, config: &TreeConfig, max_jobs: u64, worker: Worker) -> Self {
        let max_threads = (config.max_threads as usize).max(1);
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        Self {
            kind,
            max_jobs,
            max_threads,
            max_job_duration: Duration::try_from_secs_f64(config.max_job_duration).ok(),
            worker,
            next_id: AtomicU64::new(0),
            issued: Mutex::new(HashSet::new()),
            slots: Arc::new(Semaphore::new(max_threads)),
            updates_tx,
            updates_rx: tokio::sync::Mutex::new(updates_rx),
        }
    }

    pub fn kind(&self) -> BatchSystemKind {
        self.kind
    }

    pub fn max_jobs(&self) -> u64 {
        self.max_jobs
    }

    pub fn max_threads(&self) -> usize {
        self.max_threads
    }

    pub fn worker(&self) -> Worker {
        self.worker
    }

    pub async fn issue_job(&self, job: JobSubmission) -> Result<JobId> {
        let job_id = {
            let mut issued = lock(&self.issued);
            if issued.len() as u64 >= self.max_jobs {
                return Err(JobTreeError::Saturated {
                    backend: self.kind.name().to_string(),
                    limit: self.max_jobs,
                });
            }
            let job_id = JobId(self.next_id.fetch_add(1, Ordering::Relaxed));
            issued.insert(job_id);
            job_id
        };

        tracing::debug!(
            job_id = %job_id,
            memory = job.memory,
            cpu = job.cpu,
            command = %job.command,
            "Issued local job"
        );

        let slots = Arc::clone(&self.slots);
        let updates = self.updates_tx.clone();
        let worker = self.worker;
        let timeout = self.max_job_duration;
        tokio::spawn(async move {
            let exit_code = match slots.acquire_owned().await {
                Ok(_permit) => worker.run(job_id, &job.command, timeout).await,
                Err(_) => -1,
            };
            let _ = updates.send(JobUpdate { job_id, exit_code });
        });

        Ok(job_id)
    }

    pub async fn issued_jobs(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = lock(&self.issued).iter().copied().collect();
        ids.sort();
        ids
    }

    pub async fn updated_job(&self, max_wait: Duration) -> Option<JobUpdate> {
        let mut updates = self.updates_rx.lock().await;
        let update = tokio::time::timeout(max_wait, updates.recv()).await.ok().flatten()?;
        // No await past this point: the update must not be lost to cancellation.
        lock(&self.issued).remove(&update.job_id);
        Some(update)
    }
}
