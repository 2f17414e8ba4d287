//! Queue adapters - submit jobs through a cluster queue's own CLI.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Mutex;

use super::{BatchSystemKind, JobId, JobSubmission, JobUpdate};
use crate::config::TreeConfig;
use crate::error::{JobTreeError, Result};

/// A submission program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitInvocation {
    pub program: String,
    pub args: Vec<String>,
    /// Job script fed on stdin, for queues that read one
    pub stdin: Option<String>,
}

/// Hands jobs to parasol, grid engine or torque.
///
/// The queue owns execution; this handle only submits and remembers the
/// queue's job id. Finished queue jobs are found by the rescue poll.
pub struct ClusterBatchSystem {
    kind: BatchSystemKind,
    parasol_command: String,
    max_jobs: u64,
    next_id: AtomicU64,
    issued: Mutex<HashMap<JobId, String>>,
}

impl ClusterBatchSystem {
    pub fn new(kind: BatchSystemKind, config: &TreeConfig, max_jobs: u64) -> Self {
        Self {
            kind,
            parasol_command: config.parasol_command.clone(),
            max_jobs,
            next_id: AtomicU64::new(0),
            issued: Mutex::new(HashMap::new()),
        }
    }

    pub fn kind(&self) -> BatchSystemKind {
        self.kind
    }

    pub fn max_jobs(&self) -> u64 {
        self.max_jobs
    }

    /// Build the submission command for a job
    pub fn submit_invocation(&self, job: &JobSubmission) -> SubmitInvocation {
        match self.kind {
            BatchSystemKind::Parasol => SubmitInvocation {
                program: self.parasol_command.clone(),
                args: vec![
                    "-verbose".to_string(),
                    format!("-ram={}", job.memory),
                    format!("-cpu={}", job.cpu),
                    "add".to_string(),
                    "job".to_string(),
                    job.command.clone(),
                ],
                stdin: None,
            },
            BatchSystemKind::GridEngine => SubmitInvocation {
                program: "qsub".to_string(),
                args: vec![
                    "-b".to_string(),
                    "y".to_string(),
                    "-terse".to_string(),
                    "-V".to_string(),
                    "-l".to_string(),
                    format!("h_vmem={}", job.memory),
                    "-pe".to_string(),
                    "smp".to_string(),
                    job.cpu.to_string(),
                    "sh".to_string(),
                    "-c".to_string(),
                    job.command.clone(),
                ],
                stdin: None,
            },
            _ => SubmitInvocation {
                program: "qsub".to_string(),
                args: vec![
                    "-V".to_string(),
                    "-l".to_string(),
                    format!("mem={}b,nodes=1:ppn={}", job.memory, job.cpu),
                ],
                stdin: Some(format!("#!/bin/sh\n{}\n", job.command)),
            },
        }
    }

    pub async fn issue_job(&self, job: JobSubmission) -> Result<JobId> {
        let mut issued = self.issued.lock().await;
        if issued.len() as u64 >= self.max_jobs {
            return Err(JobTreeError::Saturated {
                backend: self.kind.name().to_string(),
                limit: self.max_jobs,
            });
        }

        let invocation = self.submit_invocation(&job);
        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let (Some(script), Some(mut stdin)) = (invocation.stdin.as_deref(), child.stdin.take()) {
            stdin.write_all(script.as_bytes()).await?;
        }

        let output = child.wait_with_output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            return Err(self.rejected(format!(
                "{} exited with {}: {}",
                invocation.program,
                output.status,
                stderr.trim()
            )));
        }
        let queue_id = parse_queue_id(&stdout)
            .ok_or_else(|| self.rejected(format!("no job id in output {:?}", stdout.trim())))?;

        let job_id = JobId(self.next_id.fetch_add(1, Ordering::Relaxed));
        tracing::info!(
            backend = self.kind.name(),
            job_id = %job_id,
            queue_id = %queue_id,
            "Submitted job to queue"
        );
        issued.insert(job_id, queue_id);
        Ok(job_id)
    }

    pub async fn issued_jobs(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self.issued.lock().await.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Queue id a job was submitted under
    pub async fn queue_id(&self, job_id: JobId) -> Option<String> {
        self.issued.lock().await.get(&job_id).cloned()
    }

    pub async fn updated_job(&self, max_wait: Duration) -> Option<JobUpdate> {
        tokio::time::sleep(max_wait).await;
        None
    }

    fn rejected(&self, message: String) -> JobTreeError {
        JobTreeError::Submission {
            backend: self.kind.name().to_string(),
            message,
        }
    }
}

/// Queue job id: the last token of the first non-empty output line.
fn parse_queue_id(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .and_then(|line| line.split_whitespace().last())
        .map(str::to_string)
}
