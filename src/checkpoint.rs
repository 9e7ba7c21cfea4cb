//! Emergency snapshots written when a run hits a critical error.

use crate::phase::Phase;
use crate::state::ProcessState;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencySnapshot {
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub current_phase: Phase,
    pub completed_phases: Vec<Phase>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub retry_attempts: BTreeMap<Phase, u32>,
    pub last_error_phase: Option<Phase>,
    #[serde(default)]
    pub document_version: String,
}

impl EmergencySnapshot {
    pub fn capture(state: &ProcessState) -> Self {
        Self {
            run_id: state.run_id(),
            timestamp: Utc::now(),
            current_phase: state.current_phase(),
            completed_phases: state.completed_phases().to_vec(),
            errors: state.errors().to_vec(),
            warnings: state.warnings().to_vec(),
            retry_attempts: state.retry_attempts().clone(),
            last_error_phase: state.last_error_phase(),
            document_version: state.document_version().to_string(),
        }
    }
}

/// Durable destination for emergency snapshots.
pub trait CheckpointStore: Send + Sync {
    fn save(&self, snapshot: &EmergencySnapshot) -> Result<()>;

    /// All stored snapshots, oldest first.
    fn entries(&self) -> Result<Vec<EmergencySnapshot>>;

    fn latest(&self) -> Result<Option<EmergencySnapshot>> {
        Ok(self.entries()?.pop())
    }
}

/// Append-only JSON-lines file, one snapshot per line.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn reset(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path).context("Failed to remove checkpoint file")?;
        }
        Ok(())
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn save(&self, snapshot: &EmergencySnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create checkpoint directory: {}", parent.display())
            })?;
        }

        let mut line = serde_json::to_string(snapshot).context("Failed to encode snapshot")?;
        line.push('\n');

        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .context("Failed to open checkpoint file")?
            .write_all(line.as_bytes())
            .context("Failed to write checkpoint entry")?;

        Ok(())
    }

    fn entries(&self) -> Result<Vec<EmergencySnapshot>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.path).context("Failed to read checkpoint file")?;

        // Torn or foreign lines are skipped rather than failing the whole read.
        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }
}

#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    snapshots: Mutex<Vec<EmergencySnapshot>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn save(&self, snapshot: &EmergencySnapshot) -> Result<()> {
        self.snapshots
            .lock()
            .map_err(|e| anyhow::anyhow!("Checkpoint lock poisoned: {}", e))?
            .push(snapshot.clone());
        Ok(())
    }

    fn entries(&self) -> Result<Vec<EmergencySnapshot>> {
        Ok(self
            .snapshots
            .lock()
            .map_err(|e| anyhow::anyhow!("Checkpoint lock poisoned: {}", e))?
            .clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn snapshot_at(phase: Phase) -> EmergencySnapshot {
        let mut state = ProcessState::new();
        state.set_current_phase(phase);
        state.record_error("boom");
        state.set_retry_count(phase, 2);
        state.set_last_error_phase(Some(phase));
        EmergencySnapshot::capture(&state)
    }

    #[test]
    fn test_capture_copies_error_fields() {
        let snap = snapshot_at(Phase::DataArchitecture);
        assert_eq!(snap.current_phase, Phase::DataArchitecture);
        assert_eq!(snap.errors.len(), 1);
        assert_eq!(snap.retry_attempts[&Phase::DataArchitecture], 2);
        assert_eq!(snap.last_error_phase, Some(Phase::DataArchitecture));
        assert_eq!(snap.document_version, "1.0");
    }

    #[test]
    fn test_file_store_empty() {
        let dir = tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("checkpoints.jsonl"));
        assert!(store.entries().unwrap().is_empty());
        assert!(store.latest().unwrap().is_none());
    }

    #[test]
    fn test_file_store_appends_and_survives_restart() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("checkpoints.jsonl");

        {
            let store = FileCheckpointStore::new(path.clone());
            store.save(&snapshot_at(Phase::SystemAnalysis)).unwrap();
            store.save(&snapshot_at(Phase::SolutionArchitecture)).unwrap();
        }

        let store = FileCheckpointStore::new(path);
        let entries = store.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].current_phase, Phase::SystemAnalysis);
        assert_eq!(
            store.latest().unwrap().unwrap().current_phase,
            Phase::SolutionArchitecture
        );
    }

    #[test]
    fn test_file_store_skips_garbage_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkpoints.jsonl");
        let store = FileCheckpointStore::new(path.clone());
        store.save(&snapshot_at(Phase::Integration)).unwrap();
        let mut f = fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"{truncated\n").unwrap();
        assert_eq!(store.entries().unwrap().len(), 1);
    }

    #[test]
    fn test_file_store_reset() {
        let dir = tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("checkpoints.jsonl"));
        store.save(&snapshot_at(Phase::Integration)).unwrap();
        store.reset().unwrap();
        assert!(store.entries().unwrap().is_empty());
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryCheckpointStore::new();
        store.save(&snapshot_at(Phase::FunctionalRequirements)).unwrap();
        assert_eq!(store.entries().unwrap().len(), 1);
    }
}
