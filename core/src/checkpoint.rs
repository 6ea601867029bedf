//! Durable resume state: which targets were attempted and what was found.

use crate::error::SweepError;
use crate::ScanRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointState {
    pub processed: BTreeSet<String>,
    pub results: Vec<ScanRecord>,
    pub completed_count: u64,
    pub total_count: u64,
    pub updated_at: Option<String>,
}

impl CheckpointState {
    pub fn is_processed(&self, identity: &str) -> bool {
        self.processed.contains(identity)
    }

    pub(crate) fn stamp(&mut self) {
        self.updated_at = OffsetDateTime::now_utc().format(&Rfc3339).ok();
    }
}

/// JSON file holding a [`CheckpointState`]. Not synchronized: the result sink
/// is its only writer.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        CheckpointStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Prior state, or an empty one when there is none or it cannot be read.
    pub fn load(&self) -> CheckpointState {
        let text = match fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no checkpoint, starting fresh");
                return CheckpointState::default();
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "checkpoint unreadable, starting fresh");
                return CheckpointState::default();
            }
        };
        match serde_json::from_str(&text) {
            Ok(state) => state,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "checkpoint corrupt, starting fresh");
                CheckpointState::default()
            }
        }
    }

    /// Write to a sibling temp file, sync, then rename over the checkpoint.
    pub fn save(&self, state: &CheckpointState) -> Result<(), SweepError> {
        self.write_atomic(state)
            .map_err(|source| SweepError::CheckpointWrite { path: self.path.clone(), source })
    }

    fn write_atomic(&self, state: &CheckpointState) -> io::Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let tmp = self.tmp_path();
        let file = File::create(&tmp)?;
        let mut w = BufWriter::new(file);
        serde_json::to_writer(&mut w, state)?;
        w.write_all(b"\n")?;
        let file = w.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        fs::rename(&tmp, &self.path)
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_or_corrupt_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("state.json"));
        assert_eq!(store.load(), CheckpointState::default());

        fs::write(store.path(), "{\"processed\": [\"10.0.0.1\"").unwrap();
        assert_eq!(store.load(), CheckpointState::default());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("nested").join("state.json"));
        let mut state = CheckpointState::default();
        state.processed.insert("10.0.0.1".into());
        state.processed.insert("10.0.0.2".into());
        state.results.push(ScanRecord::new("10.0.0.1".parse().unwrap(), [11434]));
        state.completed_count = 2;
        state.total_count = 4;
        state.stamp();
        store.save(&state).unwrap();

        assert_eq!(store.load(), state);
        assert!(!store.tmp_path().exists());
    }

    #[test]
    fn partial_documents_fill_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("state.json"));
        fs::write(store.path(), r#"{"processed":["10.0.0.9"]}"#).unwrap();
        let state = store.load();
        assert!(state.is_processed("10.0.0.9"));
        assert_eq!(state.completed_count, 0);
    }

    #[test]
    fn save_into_unwritable_location_fails() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "x").unwrap();
        let store = CheckpointStore::new(blocker.join("state.json"));
        assert!(matches!(store.save(&CheckpointState::default()), Err(SweepError::CheckpointWrite { .. })));
    }
}
