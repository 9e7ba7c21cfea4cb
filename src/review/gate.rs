//! Approve / revise protocol for gated phases.

use crate::phase::Phase;
use crate::review::types::{
    PhaseReview, ReviewDecision, ReviewFeedback, ReviewStatus, RevisionInstructions,
};
use crate::worker::WorkerOutput;
use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Write as _;

// ASCII stems of five letters or more match inflections ("changes",
// "revision"); shorter tokens match whole words only.
const REJECT_KEYWORDS: &[&str] = &["reject", "却下"];
const APPROVE_KEYWORDS: &[&str] = &["approv", "ok", "yes", "lgtm", "承認", "良い"];
const REVISE_KEYWORDS: &[&str] = &["revis", "chang", "no", "修正", "変更"];
const STEM_MIN_LEN: usize = 5;

const RULE: &str = "============================================================";

/// Stateless review gate. Every operation is a pure function of its inputs
/// apart from timestamps.
#[derive(Debug, Clone, Default)]
pub struct ReviewGate;

impl ReviewGate {
    pub fn new() -> Self {
        Self
    }

    /// Open a pending review for `phase` over the outputs it produced.
    pub fn create_phase_review(
        &self,
        phase: Phase,
        content: &[WorkerOutput],
        summary: Option<&str>,
    ) -> PhaseReview {
        let content_summary = match summary {
            Some(s) => s.to_string(),
            None => default_summary(phase, content),
        };
        PhaseReview {
            phase,
            status: ReviewStatus::Pending,
            content_summary,
            feedback: None,
            retry_count: 0,
            last_updated: Utc::now(),
        }
    }

    /// Render a review for a human. Performs no I/O.
    pub fn present_for_review(&self, review: &PhaseReview, content: &[WorkerOutput]) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{RULE}");
        let _ = writeln!(out, "REVIEW GATE: {}", review.phase.display_name());
        let _ = writeln!(out, "{RULE}");
        let _ = writeln!(out);
        let _ = writeln!(out, "Phase:  {}", review.phase);
        let _ = writeln!(out, "Status: {}", review.status);
        if review.retry_count > 0 {
            let _ = writeln!(out, "Revisions so far: {}", review.retry_count);
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "{}", review.content_summary);
        let _ = writeln!(out);
        out.push_str(&format_content(review.phase, content));
        let _ = writeln!(out);
        let _ = writeln!(out, "{RULE}");
        let _ = writeln!(out, "Approve this content?");
        let _ = writeln!(out, "  approve             continue to the next phase");
        let _ = writeln!(out, "  revise              re-run the phase; add `item: comment` lines");
        let _ = writeln!(out, "  reject              stop the run");
        out
    }

    /// Turn raw reviewer input into feedback.
    ///
    /// With `auto_approve` the input is ignored. Otherwise reject keywords win,
    /// then approve, then revise; input matching nothing is an approval.
    pub fn decide(&self, input: &str, auto_approve: bool, phase: Phase) -> ReviewFeedback {
        if auto_approve {
            return ReviewFeedback {
                phase,
                decision: ReviewDecision::Approve,
                comments: vec!["Approved automatically (auto-approve mode)".to_string()],
                specific_feedback: BTreeMap::new(),
                approved_items: vec!["all items".to_string()],
                revision_items: Vec::new(),
                created_at: Utc::now(),
            };
        }

        let decision = parse_decision(input);
        let (comments, specific_feedback) = split_feedback(input);

        let approved_items = match decision {
            ReviewDecision::Approve => vec!["all items".to_string()],
            _ => Vec::new(),
        };
        let revision_items = match decision {
            ReviewDecision::RequestRevision if specific_feedback.is_empty() => {
                vec!["user-specified items".to_string()]
            }
            ReviewDecision::RequestRevision => specific_feedback.keys().cloned().collect(),
            _ => Vec::new(),
        };

        tracing::debug!(%phase, %decision, items = specific_feedback.len(), "parsed review input");

        ReviewFeedback {
            phase,
            decision,
            comments,
            specific_feedback,
            approved_items,
            revision_items,
            created_at: Utc::now(),
        }
    }

    /// Apply feedback to a review: Approved iff the decision approves.
    pub fn update_phase_review(&self, mut review: PhaseReview, feedback: ReviewFeedback) -> PhaseReview {
        review.status = match feedback.decision {
            ReviewDecision::Approve => ReviewStatus::Approved,
            _ => ReviewStatus::RevisionRequested,
        };
        review.feedback = Some(feedback);
        review.last_updated = Utc::now();
        tracing::info!(phase = %review.phase, status = %review.status, "review updated");
        review
    }

    pub fn should_proceed(&self, review: &PhaseReview) -> bool {
        review.status == ReviewStatus::Approved
    }

    pub fn generate_revision_instructions(&self, feedback: &ReviewFeedback) -> RevisionInstructions {
        RevisionInstructions {
            general_comments: feedback.comments.clone(),
            specific_revisions: feedback
                .specific_feedback
                .iter()
                .map(|(item, comment)| format!("{item}: {comment}"))
                .collect(),
            focus_areas: feedback.revision_items.clone(),
        }
    }
}

fn default_summary(phase: Phase, content: &[WorkerOutput]) -> String {
    match phase {
        Phase::FunctionalRequirements => {
            "Functional requirements and user stories have been defined".to_string()
        }
        Phase::NonFunctionalRequirements => {
            "Non-functional requirements and test methods have been defined".to_string()
        }
        Phase::SolutionArchitecture => {
            "System architecture and technology stack have been proposed".to_string()
        }
        _ => format!(
            "Deliverables for {} were generated by {} worker(s)",
            phase,
            content.len()
        ),
    }
}

fn word_matches(word: &str, keyword: &str) -> bool {
    if keyword.len() >= STEM_MIN_LEN {
        word.starts_with(keyword)
    } else {
        word == keyword
    }
}

/// Whether `keyword` appears in `lowered`: CJK keywords as substrings,
/// ASCII keywords as word stems or whole words.
fn contains_keyword(lowered: &str, keyword: &str) -> bool {
    if !keyword.is_ascii() {
        return lowered.contains(keyword);
    }
    lowered
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|word| word_matches(word, keyword))
}

fn parse_decision(input: &str) -> ReviewDecision {
    let lowered = input.trim().to_lowercase();
    let matches = |keywords: &[&str]| keywords.iter().any(|k| contains_keyword(&lowered, k));

    if matches(REJECT_KEYWORDS) {
        ReviewDecision::Reject
    } else if matches(APPROVE_KEYWORDS) {
        ReviewDecision::Approve
    } else if matches(REVISE_KEYWORDS) {
        ReviewDecision::RequestRevision
    } else {
        ReviewDecision::Approve
    }
}

fn is_keyword(word: &str) -> bool {
    let lowered = word.to_lowercase();
    REJECT_KEYWORDS
        .iter()
        .chain(APPROVE_KEYWORDS)
        .chain(REVISE_KEYWORDS)
        .any(|k| if k.is_ascii() { word_matches(&lowered, k) } else { *k == lowered })
}

/// Split input into free comments and `item: comment` pairs.
/// Lines and `;` both separate entries.
fn split_feedback(input: &str) -> (Vec<String>, BTreeMap<String, String>) {
    let mut comments = Vec::new();
    let mut specific = BTreeMap::new();

    for entry in input.split(['\n', ';']).map(str::trim).filter(|e| !e.is_empty()) {
        let pair = entry
            .split_once(':')
            .or_else(|| entry.split_once('：'))
            .map(|(k, v)| (k.trim(), v.trim()));
        match pair {
            Some((item, comment)) if !item.is_empty() && !comment.is_empty() && !is_keyword(item) => {
                specific.insert(item.to_string(), comment.to_string());
            }
            _ => comments.push(entry.to_string()),
        }
    }

    (comments, specific)
}

fn deliverable_items<'a>(content: &'a [WorkerOutput], key: &str) -> Vec<&'a Value> {
    content
        .iter()
        .filter_map(|o| o.deliverables.get(key))
        .flat_map(|v| match v {
            Value::Array(items) => items.iter().collect::<Vec<_>>(),
            other => vec![other],
        })
        .collect()
}

fn text<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or("-")
}

fn format_content(phase: Phase, content: &[WorkerOutput]) -> String {
    let mut out = String::new();
    match phase {
        Phase::FunctionalRequirements => {
            let reqs = deliverable_items(content, "functional_requirements");
            if reqs.is_empty() {
                return "No functional requirements were generated.\n".to_string();
            }
            let _ = writeln!(out, "Functional requirements:\n");
            for (i, req) in reqs.iter().enumerate() {
                let _ = writeln!(out, "{}. {}", i + 1, text(req, "user_story"));
                let _ = writeln!(
                    out,
                    "   priority: {} | complexity: {}",
                    text(req, "priority"),
                    text(req, "complexity")
                );
            }
        }
        Phase::NonFunctionalRequirements => {
            let reqs = deliverable_items(content, "non_functional_requirements");
            if reqs.is_empty() {
                return "No non-functional requirements were generated.\n".to_string();
            }
            let mut by_category: BTreeMap<&str, Vec<&Value>> = BTreeMap::new();
            for req in reqs {
                by_category.entry(text(req, "category")).or_default().push(req);
            }
            let _ = writeln!(out, "Non-functional requirements:\n");
            for (category, reqs) in by_category {
                let _ = writeln!(out, "* {category}");
                for req in reqs.iter().take(3) {
                    let _ = writeln!(
                        out,
                        "  - {} (target: {})",
                        text(req, "requirement"),
                        text(req, "target_value")
                    );
                }
            }
        }
        Phase::SolutionArchitecture => {
            let Some(arch) = deliverable_items(content, "system_architecture").into_iter().next()
            else {
                return "No system architecture was generated.\n".to_string();
            };
            let _ = writeln!(out, "Architecture type: {}", text(arch, "architecture_type"));
            if let Some(components) = arch.get("components").and_then(Value::as_array) {
                let _ = writeln!(out, "Components:");
                for comp in components.iter().take(5) {
                    let _ = writeln!(out, "  - {}", comp.as_str().unwrap_or_default());
                }
            }
            if let Some(stack) = arch.get("technology_stack").and_then(Value::as_object) {
                let _ = writeln!(out, "Technology stack:");
                for (key, value) in stack.iter().take(5) {
                    let _ = writeln!(out, "  - {key}: {}", value.as_str().unwrap_or_default());
                }
            }
            let _ = writeln!(out, "Deployment: {}", text(arch, "deployment_strategy"));
        }
        _ => {
            for output in content {
                let keys: Vec<&str> = output.deliverables.keys().map(String::as_str).collect();
                let _ = writeln!(out, "- {}: {}", output.role, keys.join(", "));
            }
        }
    }
    out
}
