//! Job store - the job-records directory of a workspace.

use std::path::{Path, PathBuf};

use crate::error::Result;

use super::job::Job;

/// Read access to the records under a workspace's job-records directory.
pub struct JobStore {
    dir: PathBuf,
}

impl JobStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Paths of every record file, sorted for stable iteration
    pub fn record_paths(&self) -> Result<Vec<PathBuf>> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(&self.dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// Load every record in the directory
    pub fn load_all(&self) -> Result<Vec<Job>> {
        self.record_paths()?
            .iter()
            .map(|path| Job::load(path))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_only_json_records() {
        let dir = tempfile::tempdir().expect("tempdir");
        let job = Job::new("echo hi", 1024, 2, 3, dir.path());
        job.write().expect("write");
        std::fs::write(dir.path().join("notes.txt"), "ignored").expect("seed");
        std::fs::create_dir(dir.path().join("nested.json")).expect("seed dir");

        let store = JobStore::new(dir.path());
        assert_eq!(store.record_paths().expect("list"), vec![job.path()]);
        assert_eq!(store.load_all().expect("load"), vec![job]);
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(JobStore::new(&dir.path().join("jobs")).record_paths().is_err());
    }
}
