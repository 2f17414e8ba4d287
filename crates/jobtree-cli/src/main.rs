//! Jobtree CLI - create or resume a job tree.
//!
//! `jobtree --job-tree <dir> --command <cmd>` creates a fresh workspace with
//! one root job. Pointing `--job-tree` at an existing workspace reloads it,
//! ignoring every option except the log level.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use jobtree_core::{resolve, BatchSystem, LogLevel, ResolveMode, ResolveOptions, Resolved};

#[derive(Parser)]
#[command(name = "jobtree")]
#[command(about = "Create or resume a job tree and hand it to the scheduling loop", version)]
struct Cli {
    /// Command of the root job (required when creating a job tree)
    #[arg(long)]
    command: Option<String>,

    /// Workspace directory of the job tree
    #[arg(long, alias = "jobTree")]
    job_tree: PathBuf,

    /// Batch system: a single name, or "nameA nameB memoryThreshold [maxJobsA]"
    #[arg(long, alias = "batchSystem", default_value = "singleMachine")]
    batch_system: String,

    /// Program used to talk to a parasol queue
    #[arg(long, alias = "parasolCommand", default_value = "parasol")]
    parasol_command: String,

    /// Times a failed job is retried
    #[arg(long, alias = "retryCount", default_value_t = 0)]
    retry_count: u32,

    /// Seconds between rescue polls; defaults to the batch system's preference
    #[arg(long, alias = "rescueJobsFrequency")]
    rescue_jobs_frequency: Option<f64>,

    /// Seconds before a running job is killed
    #[arg(long, alias = "maxJobDuration", default_value_t = f64::MAX)]
    max_job_duration: f64,

    /// Seconds of serial child work to batch before parallelising
    #[arg(long, alias = "jobTime", default_value_t = 30.0)]
    job_time: f64,

    /// Log files larger than this many bytes are truncated
    #[arg(long, alias = "maxLogFileSize", default_value_t = 50_120)]
    max_log_file_size: u64,

    /// Memory request in bytes for jobs that do not state one
    #[arg(long, alias = "defaultMemory", default_value_t = 2_147_483_648)]
    default_memory: u64,

    /// CPU request for jobs that do not state one
    #[arg(long, alias = "defaultCpu", default_value_t = 1)]
    default_cpu: u32,

    /// Maximum jobs issued to the batch system at once
    #[arg(long, alias = "maxJobs", default_value_t = u64::MAX)]
    max_jobs: u64,

    /// Maximum worker threads for the single machine batch system
    #[arg(long, alias = "maxThreads", default_value_t = 4)]
    max_threads: u32,

    /// Record statistics for later reporting
    #[arg(long)]
    stats: bool,

    /// CRITICAL, ERROR, WARNING, INFO, DEBUG or OFF
    #[arg(long, alias = "logLevel", default_value = "INFO")]
    log_level: LogLevel,

    /// Also write logs to this file
    #[arg(long, alias = "logFile")]
    log_file: Option<PathBuf>,
}

impl Cli {
    fn resolve_options(&self) -> ResolveOptions {
        ResolveOptions {
            command: self.command.clone(),
            log_level: self.log_level,
            batch_system: self.batch_system.clone(),
            parasol_command: self.parasol_command.clone(),
            retry_count: self.retry_count,
            rescue_jobs_frequency: self.rescue_jobs_frequency,
            max_job_duration: self.max_job_duration,
            job_time: self.job_time,
            max_log_file_size: self.max_log_file_size,
            default_memory: self.default_memory,
            default_cpu: self.default_cpu,
            max_jobs: self.max_jobs,
            max_threads: self.max_threads,
            stats: self.stats,
            ..ResolveOptions::default()
        }
    }
}

fn init_logging(cli: &Cli) -> Result<()> {
    let filter = EnvFilter::new(cli.log_level.filter_directive());

    match &cli.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    let options = cli.resolve_options();
    let resolved = resolve(&cli.job_tree, &options)
        .with_context(|| format!("failed to set up job tree {}", cli.job_tree.display()))?;

    hand_off(&resolved);
    Ok(())
}

/// Report what the scheduling loop picks up.
fn hand_off(resolved: &Resolved) {
    let (mode, pending) = match &resolved.mode {
        ResolveMode::Created { .. } => ("created", 1),
        ResolveMode::Reloaded { pending_jobs } => ("reloaded", *pending_jobs),
    };
    let batch_system = &resolved.batch_system;

    tracing::info!(
        mode,
        job_tree = %resolved.workspace.root().display(),
        batch_system = %batch_system.name(),
        max_jobs = batch_system.max_jobs(),
        rescue_jobs_frequency = resolved.config.rescue_jobs_frequency,
        try_count = resolved.config.try_count,
        pending_jobs = pending,
        "Handing job tree to the scheduling loop"
    );

    println!("Job tree {} ({mode})", resolved.workspace.root().display());
    println!("  batch system:    {}", batch_system.name());
    println!("  rescue interval: {}s", resolved.config.rescue_jobs_frequency);
    println!("  try count:       {}", resolved.config.try_count);
    println!("  pending jobs:    {pending}");
    if let ResolveMode::Created { root_job } = &resolved.mode {
        println!("  root job:        {} ({})", root_job.id, root_job.command);
    }
}
