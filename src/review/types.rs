//! Review records exchanged between the gate and the orchestrator.

use crate::phase::Phase;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    Approved,
    RevisionRequested,
    /// The reviewed phase is being re-run after a revision request.
    InRevision,
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::Approved => "approved",
            ReviewStatus::RevisionRequested => "revision_requested",
            ReviewStatus::InRevision => "in_revision",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approve,
    RequestRevision,
    Reject,
}

impl std::fmt::Display for ReviewDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReviewDecision::Approve => "approve",
            ReviewDecision::RequestRevision => "request_revision",
            ReviewDecision::Reject => "reject",
        };
        f.write_str(s)
    }
}

/// Parsed reviewer response. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewFeedback {
    pub phase: Phase,
    pub decision: ReviewDecision,
    pub comments: Vec<String>,
    /// `item -> comment` pairs given as `item: comment` lines.
    pub specific_feedback: BTreeMap<String, String>,
    pub approved_items: Vec<String>,
    pub revision_items: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Review record for one gated phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseReview {
    /// The work phase under review.
    pub phase: Phase,
    pub status: ReviewStatus,
    pub content_summary: String,
    pub feedback: Option<ReviewFeedback>,
    /// Revisions already spent on the phase when the review was opened.
    pub retry_count: u32,
    pub last_updated: DateTime<Utc>,
}

/// What a worker re-run should focus on after a revision request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RevisionInstructions {
    pub general_comments: Vec<String>,
    /// `"item: comment"` strings.
    pub specific_revisions: Vec<String>,
    pub focus_areas: Vec<String>,
}

impl RevisionInstructions {
    pub fn is_empty(&self) -> bool {
        self.general_comments.is_empty()
            && self.specific_revisions.is_empty()
            && self.focus_areas.is_empty()
    }
}
