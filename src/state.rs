//! The mutable aggregate threaded through one run.
//!
//! All fields are private; the orchestrator, retry handler and review gate
//! mutate it only through the methods below, which keep the append-only and
//! monotonic invariants in one place.

use crate::phase::Phase;
use crate::recovery::increment_version;
use crate::review::PhaseReview;
use crate::worker::WorkerOutput;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub const INITIAL_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionEntry {
    pub version: String,
    pub note: String,
    pub timestamp: DateTime<Utc>,
}

impl std::fmt::Display for VersionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} - {}", self.version, self.note)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessState {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    current_phase: Phase,
    completed_phases: Vec<Phase>,
    worker_outputs: Vec<WorkerOutput>,
    retry_attempts: BTreeMap<Phase, u32>,
    errors: Vec<String>,
    warnings: Vec<String>,
    document_version: String,
    version_history: Vec<VersionEntry>,
    pending_review: Option<PhaseReview>,
    phase_reviews: Vec<PhaseReview>,
    last_error_phase: Option<Phase>,
    revision_count: u32,
    consolidated: BTreeMap<String, serde_json::Value>,
}

impl Default for ProcessState {
    fn default() -> Self {
        Self::new()
    }
}

fn timestamped(message: &str) -> String {
    format!("{}: {}", Utc::now().to_rfc3339(), message)
}

impl ProcessState {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            current_phase: Phase::Initialization,
            completed_phases: Vec::new(),
            worker_outputs: Vec::new(),
            retry_attempts: BTreeMap::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            document_version: INITIAL_VERSION.to_string(),
            version_history: Vec::new(),
            pending_review: None,
            phase_reviews: Vec::new(),
            last_error_phase: None,
            revision_count: 0,
            consolidated: BTreeMap::new(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn current_phase(&self) -> Phase {
        self.current_phase
    }

    pub fn set_current_phase(&mut self, phase: Phase) {
        self.current_phase = phase;
    }

    pub fn completed_phases(&self) -> &[Phase] {
        &self.completed_phases
    }

    pub fn is_completed(&self, phase: Phase) -> bool {
        self.completed_phases.contains(&phase)
    }

    /// Append `phase` unless it is already recorded; order of first completion wins.
    pub fn mark_completed(&mut self, phase: Phase) {
        if !self.is_completed(phase) {
            self.completed_phases.push(phase);
        }
    }

    pub fn worker_outputs(&self) -> &[WorkerOutput] {
        &self.worker_outputs
    }

    pub fn outputs_for(&self, phase: Phase) -> impl Iterator<Item = &WorkerOutput> {
        self.worker_outputs.iter().filter(move |o| o.phase == phase)
    }

    /// The newest output per `(phase, role)`, in order of first appearance.
    /// Outputs superseded by a revision or retry are skipped.
    pub fn latest_outputs(&self) -> Vec<&WorkerOutput> {
        let mut latest: Vec<&WorkerOutput> = Vec::new();
        for output in &self.worker_outputs {
            match latest
                .iter_mut()
                .find(|o| o.phase == output.phase && o.role == output.role)
            {
                Some(slot) => *slot = output,
                None => latest.push(output),
            }
        }
        latest
    }

    pub fn append_outputs(&mut self, outputs: impl IntoIterator<Item = WorkerOutput>) {
        self.worker_outputs.extend(outputs);
    }

    pub fn retry_attempts(&self) -> &BTreeMap<Phase, u32> {
        &self.retry_attempts
    }

    pub fn retry_count(&self, phase: Phase) -> u32 {
        self.retry_attempts.get(&phase).copied().unwrap_or(0)
    }

    pub fn set_retry_count(&mut self, phase: Phase, count: u32) {
        self.retry_attempts.insert(phase, count);
    }

    pub fn total_retries(&self) -> u32 {
        self.retry_attempts.values().sum()
    }

    /// Zero one phase's counter, or every counter when `phase` is `None`.
    pub fn clear_retries(&mut self, phase: Option<Phase>) {
        match phase {
            Some(p) => {
                self.retry_attempts.insert(p, 0);
            }
            None => self.retry_attempts.clear(),
        }
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn record_error(&mut self, message: &str) {
        self.errors.push(timestamped(message));
    }

    pub fn clear_errors(&mut self) {
        self.errors.clear();
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn record_warning(&mut self, message: &str) {
        self.warnings.push(timestamped(message));
    }

    pub fn clear_warnings(&mut self) {
        self.warnings.clear();
    }

    pub fn last_error_phase(&self) -> Option<Phase> {
        self.last_error_phase
    }

    pub fn set_last_error_phase(&mut self, phase: Option<Phase>) {
        self.last_error_phase = phase;
    }

    pub fn document_version(&self) -> &str {
        &self.document_version
    }

    pub fn version_history(&self) -> &[VersionEntry] {
        &self.version_history
    }

    /// Reset the document to its first version. History is left untouched.
    pub fn initialize_version(&mut self) {
        if self.version_history.is_empty() {
            self.document_version = INITIAL_VERSION.to_string();
        }
    }

    /// Advance the minor version for a revision of `phase` and record it.
    pub fn bump_version(&mut self, phase: Phase) -> &str {
        let next = increment_version(&self.document_version);
        self.version_history.push(VersionEntry {
            version: next.clone(),
            note: format!("{phase} revision"),
            timestamp: Utc::now(),
        });
        self.document_version = next;
        self.revision_count += 1;
        &self.document_version
    }

    pub fn revision_count(&self) -> u32 {
        self.revision_count
    }

    pub fn pending_review(&self) -> Option<&PhaseReview> {
        self.pending_review.as_ref()
    }

    pub fn set_pending_review(&mut self, review: PhaseReview) {
        self.pending_review = Some(review);
    }

    pub fn take_pending_review(&mut self) -> Option<PhaseReview> {
        self.pending_review.take()
    }

    /// Every decided review, in decision order.
    pub fn phase_reviews(&self) -> &[PhaseReview] {
        &self.phase_reviews
    }

    pub fn record_review(&mut self, review: PhaseReview) {
        self.phase_reviews.push(review);
    }

    pub fn consolidated(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.consolidated
    }

    pub fn set_consolidated(&mut self, consolidated: BTreeMap<String, serde_json::Value>) {
        self.consolidated = consolidated;
    }
}
