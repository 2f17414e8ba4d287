//! Job model - a single record in the job tree.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::persist::write_atomic;

/// A job record as stored under the job-records directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier, also the record's file stem
    pub id: String,

    /// Command line the job runs
    pub command: String,

    /// Memory request in bytes
    pub memory: u64,

    /// CPU request
    pub cpu: u32,

    /// Attempts left before the job is labelled failed
    pub try_count: u32,

    /// Directory holding this record
    pub job_dir: PathBuf,

    /// When the record was created
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(
        command: impl Into<String>,
        memory: u64,
        cpu: u32,
        try_count: u32,
        job_dir: &Path,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            command: command.into(),
            memory,
            cpu,
            try_count,
            job_dir: job_dir.to_path_buf(),
            created_at: Some(Utc::now()),
        }
    }

    /// Path of this job's record file
    pub fn path(&self) -> PathBuf {
        self.job_dir.join(format!("{}.json", self.id))
    }

    /// Write the record, replacing any earlier version of it
    pub fn write(&self) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        write_atomic(&self.path(), &json)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read(path)?;
        Ok(serde_json::from_slice(&content)?)
    }
}
