//! Human-readable JSON documents persisted to a directory, each written
//! atomically (write-temp-then-rename) per spec §6.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum StateFileError {
    #[error("io error on {path}: {source}")]
    Io { path: PathBuf, #[source] source: std::io::Error },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, Serialize, serde::Deserialize)]
pub struct ShutdownMarker {
    pub clean_shutdown: bool,
    pub last_shutdown: Option<DateTime<Utc>>,
    pub last_startup: Option<DateTime<Utc>>,
}

pub struct StateDirectory {
    root: PathBuf,
}

impl StateDirectory {
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.json"))
    }

    pub fn load<T: DeserializeOwned + Default>(&self, name: &str) -> T {
        let path = self.path_for(name);
        match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_default(),
            Err(_) => T::default(),
        }
    }

    /// Write-temp-then-rename: never leaves a partially-written document
    /// behind if the process is killed mid-write.
    pub fn save<T: Serialize>(&self, name: &str, value: &T) -> Result<(), StateFileError> {
        let path = self.path_for(name);
        let tmp_path = self.root.join(format!("{name}.json.tmp"));
        let serialized = serde_json::to_string_pretty(value)?;
        fs::write(&tmp_path, serialized).map_err(|source| StateFileError::Io { path: tmp_path.clone(), source })?;
        fs::rename(&tmp_path, &path).map_err(|source| StateFileError::Io { path, source })?;
        Ok(())
    }

    pub fn shutdown_marker(&self) -> ShutdownMarker {
        self.load("shutdown_marker")
    }

    pub fn save_shutdown_marker(&self, marker: &ShutdownMarker) -> Result<(), StateFileError> {
        self.save("shutdown_marker", marker)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_shutdown_marker() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateDirectory::new(dir.path()).unwrap();

        let marker = ShutdownMarker {
            clean_shutdown: true,
            last_shutdown: Some(Utc::now()),
            last_startup: None,
        };
        state.save_shutdown_marker(&marker).unwrap();

        let loaded = state.shutdown_marker();
        assert!(loaded.clean_shutdown);
    }

    #[test]
    fn missing_file_loads_default() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateDirectory::new(dir.path()).unwrap();
        let marker = state.shutdown_marker();
        assert!(!marker.clean_shutdown);
    }
}
