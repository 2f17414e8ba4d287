//! Job tree configuration record, persisted as `<root>/config.yaml`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::persist::write_atomic;

/// Tunables for one job tree.
///
/// Written once when the workspace is created and afterwards only touched on
/// reload (the log level). Every other field describes the original run.
/// Unknown attributes are ignored so records from newer releases still load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeConfig {
    /// Log level of the most recent resolve
    pub log_level: LogLevel,

    /// Absolute path of the workspace root
    pub job_tree: PathBuf,

    /// Program used to talk to a parasol queue
    pub parasol_command: String,

    /// Attempts per job (retry count + 1)
    pub try_count: u32,

    /// Seconds before a running job is killed
    pub max_job_duration: f64,

    /// Backend selector: a single name or "nameA nameB memory [maxJobsA]"
    pub batch_system: String,

    /// Seconds of serial child work to batch before parallelising
    pub job_time: f64,

    /// Log files larger than this many bytes are truncated
    pub max_log_file_size: u64,

    /// Memory request in bytes for jobs that do not state one
    pub default_memory: u64,

    /// CPU request for jobs that do not state one
    pub default_cpu: u32,

    /// Maximum jobs issued to the batch system at once
    pub max_jobs: u64,

    /// Maximum worker threads for the single machine backend
    pub max_threads: u32,

    /// Seconds between checks for missing or overlong jobs
    pub rescue_jobs_frequency: f64,

    /// Record statistics for later reporting
    #[serde(default)]
    pub stats: bool,
}

impl TreeConfig {
    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Persist configuration, replacing any previous file atomically
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        write_atomic(path, content.as_bytes())?;
        tracing::debug!(path = %path.display(), "Written the config file");
        Ok(())
    }
}

/// Verbosity recorded in the configuration and used for the subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Critical,
    Error,
    #[serde(alias = "WARN")]
    Warning,
    #[default]
    Info,
    Debug,
    Off,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "CRITICAL",
            Self::Error => "ERROR",
            Self::Warning => "WARNING",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
            Self::Off => "OFF",
        }
    }

    /// `EnvFilter` directive for this level. `tracing` has no level above
    /// error, so CRITICAL shares it.
    pub fn filter_directive(&self) -> &'static str {
        match self {
            Self::Critical | Self::Error => "error",
            Self::Warning => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Off => "off",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "CRITICAL" => Ok(Self::Critical),
            "ERROR" => Ok(Self::Error),
            "WARNING" | "WARN" => Ok(Self::Warning),
            "INFO" => Ok(Self::Info),
            "DEBUG" => Ok(Self::Debug),
            "OFF" => Ok(Self::Off),
            other => Err(format!("unknown log level {other:?}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TreeConfig {
        TreeConfig {
            log_level: LogLevel::Debug,
            job_tree: PathBuf::from("/tmp/jobTree"),
            parasol_command: "parasol".to_string(),
            try_count: 3,
            max_job_duration: f64::MAX,
            batch_system: "singleMachine parasol 1e9 5".to_string(),
            job_time: 30.0,
            max_log_file_size: 50_120,
            default_memory: 2_147_483_648,
            default_cpu: 1,
            max_jobs: u64::MAX,
            max_threads: 4,
            rescue_jobs_frequency: 0.25,
            stats: true,
        }
    }

    #[test]
    fn roundtrip_preserves_every_field() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.yaml");
        let config = sample();

        config.save(&path).expect("save");
        let loaded = TreeConfig::load(&path).expect("load");

        assert_eq!(loaded, config);
    }

    #[test]
    fn file_is_named_attributes() {
        let yaml = serde_yaml::to_string(&sample()).expect("serialize");
        assert!(yaml.contains("log_level: DEBUG"));
        assert!(yaml.contains("try_count: 3"));
        assert!(yaml.contains("default_memory: 2147483648"));
    }

    #[test]
    fn missing_stats_defaults_off_and_unknown_fields_load() {
        let mut yaml = serde_yaml::to_string(&sample()).expect("serialize");
        yaml = yaml.replace("stats: true\n", "");
        yaml.push_str("added_by_newer_release: 7\n");

        let loaded: TreeConfig = serde_yaml::from_str(&yaml).expect("parse");
        assert!(!loaded.stats);
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let yaml = serde_yaml::to_string(&sample()).expect("serialize");
        let yaml: String = yaml
            .lines()
            .filter(|line| !line.starts_with("try_count"))
            .map(|line| format!("{line}\n"))
            .collect();

        assert!(serde_yaml::from_str::<TreeConfig>(&yaml).is_err());
    }

    #[test]
    fn log_level_parses_case_insensitively() {
        assert_eq!("debug".parse::<LogLevel>(), Ok(LogLevel::Debug));
        assert_eq!("Warn".parse::<LogLevel>(), Ok(LogLevel::Warning));
        assert!("loud".parse::<LogLevel>().is_err());
    }
}
