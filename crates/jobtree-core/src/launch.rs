//! Launch a `jobtree` process from another program.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::LogLevel;
use crate::error::{JobTreeError, Result};

/// Command line for the `jobtree` binary.
#[derive(Debug, Clone, PartialEq)]
pub struct JobTreeCommand {
    program: PathBuf,
    command: String,
    job_tree: PathBuf,
    log_level: LogLevel,
    retry_count: u32,
    batch_system: String,
    rescue_jobs_frequency: Option<f64>,
}

impl JobTreeCommand {
    pub fn new(command: impl Into<String>, job_tree: &Path) -> Self {
        Self {
            program: PathBuf::from("jobtree"),
            command: command.into(),
            job_tree: job_tree.to_path_buf(),
            log_level: LogLevel::default(),
            retry_count: 0,
            batch_system: "singleMachine".to_string(),
            rescue_jobs_frequency: None,
        }
    }

    /// Binary to run instead of `jobtree` on the `PATH`
    pub fn program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn log_level(mut self, log_level: LogLevel) -> Self {
        self.log_level = log_level;
        self
    }

    pub fn retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn batch_system(mut self, batch_system: impl Into<String>) -> Self {
        self.batch_system = batch_system.into();
        self
    }

    pub fn rescue_jobs_frequency(mut self, seconds: f64) -> Self {
        self.rescue_jobs_frequency = Some(seconds);
        self
    }

    pub fn args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--command".into(),
            self.command.as_str().into(),
            "--job-tree".into(),
            self.job_tree.as_os_str().to_owned(),
            "--log-level".into(),
            self.log_level.as_str().into(),
            "--retry-count".into(),
            self.retry_count.to_string().into(),
            "--batch-system".into(),
            self.batch_system.as_str().into(),
        ];
        if let Some(seconds) = self.rescue_jobs_frequency {
            args.push("--rescue-jobs-frequency".into());
            args.push(seconds.to_string().into());
        }
        args
    }

    /// Run to completion, failing on a non-zero exit.
    pub fn run(&self) -> Result<()> {
        tracing::info!(
            program = %self.program.display(),
            job_tree = %self.job_tree.display(),
            "Running the job tree"
        );
        let status = Command::new(&self.program).args(self.args()).status()?;
        if !status.success() {
            return Err(JobTreeError::LaunchFailed { status });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_flags_in_order() {
        let args = JobTreeCommand::new("echo hi", Path::new("/tmp/tree"))
            .log_level(LogLevel::Debug)
            .retry_count(2)
            .batch_system("parasol")
            .rescue_jobs_frequency(60.0)
            .args();

        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            [
                "--command",
                "echo hi",
                "--job-tree",
                "/tmp/tree",
                "--log-level",
                "DEBUG",
                "--retry-count",
                "2",
                "--batch-system",
                "parasol",
                "--rescue-jobs-frequency",
                "60",
            ]
        );
    }

    #[test]
    fn rescue_frequency_is_optional() {
        let args = JobTreeCommand::new("true", Path::new("tree")).args();
        assert!(!args.iter().any(|a| a == "--rescue-jobs-frequency"));
        assert_eq!(args.len(), 10);
    }

    #[test]
    fn non_zero_exit_is_launch_failure() {
        let err = JobTreeCommand::new("true", Path::new("tree"))
            .program("false")
            .run()
            .expect_err("false exits non-zero");
        assert!(matches!(err, JobTreeError::LaunchFailed { .. }));
    }
}
