//! Create a fresh job tree or reload an existing one.

use std::path::{Path, PathBuf};

use crate::adapters::BatchSystem;
use crate::config::{LogLevel, TreeConfig};
use crate::environment::EnvironmentSnapshot;
use crate::error::{JobTreeError, Result};
use crate::router::{BatchSystemHandle, BatchSystemSpec};
use crate::state::{Job, JobStore};

use super::Workspace;

/// Caller-supplied options for [`resolve`].
///
/// Only `log_level` matters when the workspace already exists; everything
/// else describes a new job tree.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolveOptions {
    /// Command of the root job; required when creating
    pub command: Option<String>,
    pub log_level: LogLevel,
    pub batch_system: String,
    pub parasol_command: String,
    pub retry_count: u32,
    /// Overrides the batch system's preferred rescue interval
    pub rescue_jobs_frequency: Option<f64>,
    pub max_job_duration: f64,
    pub job_time: f64,
    pub max_log_file_size: u64,
    pub default_memory: u64,
    pub default_cpu: u32,
    pub max_jobs: u64,
    pub max_threads: u32,
    pub stats: bool,
    /// Memory of the root job; `default_memory` when unset
    pub first_job_memory: Option<u64>,
    /// CPU of the root job; `default_cpu` when unset
    pub first_job_cpu: Option<u32>,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            command: None,
            log_level: LogLevel::default(),
            batch_system: "singleMachine".to_string(),
            parasol_command: "parasol".to_string(),
            retry_count: 0,
            rescue_jobs_frequency: None,
            max_job_duration: f64::MAX,
            job_time: 30.0,
            max_log_file_size: 50_120,
            default_memory: 2_147_483_648,
            default_cpu: 1,
            max_jobs: u64::MAX,
            max_threads: 4,
            stats: false,
            first_job_memory: None,
            first_job_cpu: None,
        }
    }
}

impl ResolveOptions {
    /// Reject numeric options that cannot describe a job tree.
    pub fn validate(&self) -> Result<()> {
        if let Some(seconds) = self.rescue_jobs_frequency {
            if !seconds.is_finite() || seconds < 0.0 {
                return Err(usage(format!(
                    "rescue jobs frequency must be a non-negative number of seconds, got {seconds}"
                )));
            }
        }
        if !self.job_time.is_finite() || self.job_time < 0.0 {
            return Err(usage(format!(
                "job time must be a non-negative number of seconds, got {}",
                self.job_time
            )));
        }
        // Infinity is allowed and means no limit.
        if self.max_job_duration.is_nan() || self.max_job_duration < 0.0 {
            return Err(usage(format!(
                "max job duration must be a non-negative number of seconds, got {}",
                self.max_job_duration
            )));
        }
        Ok(())
    }

    /// Configuration for a new tree rooted at `root`, before a batch system
    /// has supplied its rescue interval.
    pub fn draft_config(&self, root: &Path) -> TreeConfig {
        TreeConfig {
            log_level: self.log_level,
            job_tree: root.to_path_buf(),
            parasol_command: self.parasol_command.clone(),
            try_count: self.retry_count.saturating_add(1),
            max_job_duration: self.max_job_duration,
            batch_system: self.batch_system.clone(),
            job_time: self.job_time,
            max_log_file_size: self.max_log_file_size,
            default_memory: self.default_memory,
            default_cpu: self.default_cpu,
            max_jobs: self.max_jobs,
            max_threads: self.max_threads,
            rescue_jobs_frequency: self.rescue_jobs_frequency.unwrap_or(0.0),
            stats: self.stats,
        }
    }
}

/// How [`resolve`] found the workspace.
#[derive(Debug)]
pub enum ResolveMode {
    Created { root_job: Job },
    Reloaded { pending_jobs: usize },
}

/// Everything the scheduling loop needs to take over.
#[derive(Debug)]
pub struct Resolved {
    pub workspace: Workspace,
    pub config: TreeConfig,
    pub batch_system: BatchSystemHandle,
    pub mode: ResolveMode,
}

/// Create the job tree at `path`, or reload it if it already exists.
///
/// Either way the current environment is snapshotted into the workspace
/// last. Callers must not resolve the same path concurrently.
pub fn resolve(path: &Path, options: &ResolveOptions) -> Result<Resolved> {
    let root: PathBuf = std::path::absolute(path)?;
    let workspace = Workspace::new(&root);

    let (config, batch_system, mode) = if root.is_dir() {
        reload(&workspace, options)?
    } else if root.exists() {
        return Err(JobTreeError::NotADirectory(root));
    } else {
        create(&workspace, options)?
    };

    EnvironmentSnapshot::capture(&workspace.environment_path())?;

    Ok(Resolved {
        workspace,
        config,
        batch_system,
        mode,
    })
}

fn create(
    workspace: &Workspace,
    options: &ResolveOptions,
) -> Result<(TreeConfig, BatchSystemHandle, ResolveMode)> {
    let command = options
        .command
        .as_deref()
        .filter(|command| !command.trim().is_empty())
        .ok_or_else(|| usage("a command is required to create a new job tree"))?;

    // Reject bad options and selectors before anything touches the disk.
    options.validate()?;
    let spec = BatchSystemSpec::parse(&options.batch_system)?;

    tracing::info!(
        path = %workspace.root().display(),
        "Starting to create the job tree setup for the first time"
    );
    std::fs::create_dir(workspace.root())?;
    std::fs::create_dir(workspace.jobs_dir())?;

    let mut config = options.draft_config(workspace.root());
    let batch_system = spec.build(&mut config)?;

    config.rescue_jobs_frequency = options
        .rescue_jobs_frequency
        .unwrap_or_else(|| batch_system.rescue_frequency());
    config.save(&workspace.config_path())?;

    let root_job = create_first_job(
        command,
        &config,
        options.first_job_memory,
        options.first_job_cpu,
    )?;

    tracing::info!(
        path = %workspace.root().display(),
        batch_system = %batch_system.name(),
        "Finished the job tree setup"
    );
    Ok((config, batch_system, ResolveMode::Created { root_job }))
}

fn reload(
    workspace: &Workspace,
    options: &ResolveOptions,
) -> Result<(TreeConfig, BatchSystemHandle, ResolveMode)> {
    tracing::info!(
        path = %workspace.root().display(),
        "The job tree appears to already exist, so we'll reload it"
    );
    workspace.validate()?;

    let mut config = TreeConfig::load(&workspace.config_path())?;
    if config.job_tree != workspace.root() {
        tracing::warn!(
            recorded = %config.job_tree.display(),
            path = %workspace.root().display(),
            "Job tree was created at a different path"
        );
    }

    config.log_level = options.log_level;
    config.save(&workspace.config_path())?;

    let batch_system = crate::router::construct(&mut config)?;
    let pending_jobs = JobStore::new(&workspace.jobs_dir()).record_paths()?.len();

    tracing::info!(pending_jobs, batch_system = %batch_system.name(), "Reloaded the jobtree");
    Ok((config, batch_system, ResolveMode::Reloaded { pending_jobs }))
}

/// Add the root job of a new tree.
///
/// Memory and CPU fall back to the configured defaults; the try count comes
/// from the configuration.
pub fn create_first_job(
    command: &str,
    config: &TreeConfig,
    memory: Option<u64>,
    cpu: Option<u32>,
) -> Result<Job> {
    let job = Job::new(
        command,
        memory.unwrap_or(config.default_memory),
        cpu.unwrap_or(config.default_cpu),
        config.try_count,
        &Workspace::new(&config.job_tree).jobs_dir(),
    );
    job.write()?;
    tracing::info!(job_id = %job.id, command = %job.command, "Added the first job");
    Ok(job)
}

fn usage(message: impl Into<String>) -> JobTreeError {
    JobTreeError::Usage(message.into())
}
