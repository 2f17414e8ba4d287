//! Environment snapshot so remote jobs can reproduce the submitting process.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::persist::write_atomic;

/// Name to value mapping of the process environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    pub vars: BTreeMap<String, String>,
}

impl EnvironmentSnapshot {
    /// Snapshot the current process environment.
    ///
    /// Names or values that are not valid UTF-8 cannot be stored faithfully
    /// and are left out.
    pub fn current() -> Self {
        Self::from_vars(std::env::vars_os())
    }

    fn from_vars(vars: impl IntoIterator<Item = (OsString, OsString)>) -> Self {
        let vars = vars
            .into_iter()
            .filter_map(|(name, value)| match (name.into_string(), value.into_string()) {
                (Ok(name), Ok(value)) => Some((name, value)),
                (name, _) => {
                    let name = match name {
                        Ok(name) => name,
                        Err(name) => name.to_string_lossy().into_owned(),
                    };
                    tracing::warn!(name = %name, "Skipping environment variable that is not UTF-8");
                    None
                }
            })
            .collect();
        Self { vars }
    }

    /// Snapshot the current environment into `dest`, replacing any previous
    /// snapshot.
    pub fn capture(dest: &Path) -> Result<Self> {
        let snapshot = Self::current();
        snapshot.write(dest)?;
        tracing::info!(
            path = %dest.display(),
            vars = snapshot.vars.len(),
            "Written the environment for the jobs to the environment file"
        );
        Ok(snapshot)
    }

    pub fn write(&self, dest: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        write_atomic(dest, &json)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read(path)?;
        Ok(serde_json::from_slice(&content)?)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_replaces_previous_snapshot() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("environ.json");
        let mut stale = EnvironmentSnapshot::default();
        stale.vars.insert("STALE".to_string(), "1".to_string());
        stale.write(&path).expect("write");

        let captured = EnvironmentSnapshot::capture(&path).expect("capture");
        let loaded = EnvironmentSnapshot::load(&path).expect("load");

        assert_eq!(loaded, captured);
        assert_eq!(loaded.get("STALE"), None);
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_entries_are_skipped() {
        use std::os::unix::ffi::OsStringExt;

        let snapshot = EnvironmentSnapshot::from_vars([
            (OsString::from("HOME"), OsString::from("/home/jobs")),
            (OsString::from("BAD_VALUE"), OsString::from_vec(vec![0x66, 0xff])),
            (OsString::from_vec(vec![0xfe, 0x41]), OsString::from("1")),
        ]);

        assert_eq!(snapshot.vars.len(), 1);
        assert_eq!(snapshot.get("HOME"), Some("/home/jobs"));
        assert_eq!(snapshot.get("BAD_VALUE"), None);
    }
}
