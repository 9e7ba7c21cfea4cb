//! Final destination of a completed run.

use crate::phase::Phase;
use crate::state::{ProcessState, VersionEntry};
use crate::worker::{DomainInput, WorkerOutput};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

/// Everything a renderer needs to produce the final documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessArtifact {
    pub run_id: Uuid,
    pub project_name: String,
    pub document_version: String,
    pub version_history: Vec<VersionEntry>,
    pub completed_phases: Vec<Phase>,
    /// Deliverables merged by key across all outputs, later outputs winning.
    pub consolidated: BTreeMap<String, serde_json::Value>,
    pub worker_outputs: Vec<WorkerOutput>,
    pub warnings: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

impl ProcessArtifact {
    pub fn from_state(state: &ProcessState, input: &DomainInput) -> Self {
        Self {
            run_id: state.run_id(),
            project_name: input.project_name.clone(),
            document_version: state.document_version().to_string(),
            version_history: state.version_history().to_vec(),
            completed_phases: state.completed_phases().to_vec(),
            consolidated: state.consolidated().clone(),
            worker_outputs: state.worker_outputs().to_vec(),
            warnings: state.warnings().to_vec(),
            generated_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait ArtifactSink: Send + Sync {
    async fn deliver(&self, artifact: &ProcessArtifact) -> Result<()>;
}

/// Writes `process_artifact_<timestamp>.json` into a directory.
#[derive(Debug, Clone)]
pub struct JsonArtifactSink {
    dir: PathBuf,
}

impl JsonArtifactSink {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_name(artifact: &ProcessArtifact) -> String {
        format!(
            "process_artifact_{}.json",
            artifact.generated_at.format("%Y%m%d_%H%M%S")
        )
    }
}

#[async_trait]
impl ArtifactSink for JsonArtifactSink {
    async fn deliver(&self, artifact: &ProcessArtifact) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create artifact directory: {}", self.dir.display()))?;

        let path = self.dir.join(Self::file_name(artifact));
        let json = serde_json::to_string_pretty(artifact).context("Failed to encode artifact")?;
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write artifact: {}", path.display()))?;

        tracing::info!(path = %path.display(), "artifact written");
        Ok(())
    }
}

/// Keeps delivered artifacts in memory.
#[derive(Debug, Default)]
pub struct MemoryArtifactSink {
    delivered: Mutex<Vec<ProcessArtifact>>,
}

impl MemoryArtifactSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> Vec<ProcessArtifact> {
        self.delivered.lock().map(|d| d.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ArtifactSink for MemoryArtifactSink {
    async fn deliver(&self, artifact: &ProcessArtifact) -> Result<()> {
        self.delivered
            .lock()
            .map_err(|e| anyhow::anyhow!("Artifact lock poisoned: {}", e))?
            .push(artifact.clone());
        Ok(())
    }
}
