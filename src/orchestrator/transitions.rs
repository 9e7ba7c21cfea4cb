//! Enum-keyed phase transition table.
//!
//! The table maps `(Phase, Outcome)` to the next phase. It is checked for
//! completeness when built, so the orchestrator never meets a missing edge at
//! runtime for an outcome a phase can produce.

use crate::errors::ProcessError;
use crate::phase::Phase;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// What a phase step produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Completed,
    Approved,
    RevisionRequested,
    Rejected,
    Failed,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Outcome::Completed => "completed",
            Outcome::Approved => "approved",
            Outcome::RevisionRequested => "revision_requested",
            Outcome::Rejected => "rejected",
            Outcome::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl Outcome {
    /// Outcomes a phase can produce, and therefore must have edges for.
    pub fn expected_for(phase: Phase) -> &'static [Outcome] {
        if phase.is_terminal() {
            &[]
        } else if phase.is_review() {
            &[
                Outcome::Approved,
                Outcome::RevisionRequested,
                Outcome::Rejected,
                Outcome::Failed,
            ]
        } else {
            &[Outcome::Completed, Outcome::Failed]
        }
    }
}

/// Whether gateable phases stop for human review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Linear,
    Gated,
}

impl Mode {
    /// Phases that exist in this mode, in order.
    pub fn phases(&self) -> Vec<Phase> {
        Phase::ALL
            .into_iter()
            .filter(|p| *self == Mode::Gated || !p.is_review())
            .collect()
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Linear => f.write_str("linear"),
            Mode::Gated => f.write_str("gated"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Phase {phase} has no transition for outcome {outcome}")]
    MissingEdge { phase: Phase, outcome: Outcome },

    #[error("Phase {phase} cannot produce outcome {outcome}")]
    UnexpectedOutcome { phase: Phase, outcome: Outcome },

    #[error("Phase {phase} is not part of {mode} mode")]
    PhaseNotInMode { phase: Phase, mode: Mode },
}

#[derive(Debug, Clone)]
pub struct TransitionTable {
    mode: Mode,
    edges: BTreeMap<(Phase, Outcome), Phase>,
}

impl TransitionTable {
    /// The built-in table for `mode`.
    pub fn new(mode: Mode) -> Result<Self, TransitionError> {
        Self::from_edges(mode, default_edges(mode))
    }

    /// Build and validate a table from explicit edges.
    pub fn from_edges(
        mode: Mode,
        edges: impl IntoIterator<Item = ((Phase, Outcome), Phase)>,
    ) -> Result<Self, TransitionError> {
        let table = Self {
            mode,
            edges: edges.into_iter().collect(),
        };
        table.validate()?;
        Ok(table)
    }

    fn validate(&self) -> Result<(), TransitionError> {
        let phases = self.mode.phases();

        for (&(phase, outcome), &to) in &self.edges {
            for p in [phase, to] {
                if !phases.contains(&p) {
                    return Err(TransitionError::PhaseNotInMode { phase: p, mode: self.mode });
                }
            }
            if !Outcome::expected_for(phase).contains(&outcome) {
                return Err(TransitionError::UnexpectedOutcome { phase, outcome });
            }
        }

        for phase in phases {
            for &outcome in Outcome::expected_for(phase) {
                if !self.edges.contains_key(&(phase, outcome)) {
                    return Err(TransitionError::MissingEdge { phase, outcome });
                }
            }
        }

        Ok(())
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn next(&self, phase: Phase, outcome: Outcome) -> Result<Phase, ProcessError> {
        self.edges
            .get(&(phase, outcome))
            .copied()
            .ok_or(ProcessError::InvalidTransition { phase, outcome })
    }

    /// The happy path from `Initialization` to `Complete`.
    pub fn plan(&self) -> Vec<Phase> {
        let mut plan = vec![Phase::Initialization];
        let mut current = Phase::Initialization;
        while !current.is_terminal() {
            let next = self
                .edges
                .get(&(current, Outcome::Completed))
                .or_else(|| self.edges.get(&(current, Outcome::Approved)));
            match next {
                Some(&next) if !plan.contains(&next) => {
                    plan.push(next);
                    current = next;
                }
                _ => break,
            }
        }
        plan
    }
}

fn default_edges(mode: Mode) -> Vec<((Phase, Outcome), Phase)> {
    use Outcome::*;

    let gated = mode == Mode::Gated;
    let mut edges = Vec::new();

    let after = |phase: Phase, next: Phase| {
        if gated {
            phase.review_phase().unwrap_or(next)
        } else {
            next
        }
    };

    let chain = [
        (Phase::Initialization, Phase::SystemAnalysis),
        (Phase::SystemAnalysis, Phase::FunctionalRequirements),
        (Phase::FunctionalRequirements, Phase::NonFunctionalRequirements),
        (Phase::NonFunctionalRequirements, Phase::DataArchitecture),
        (Phase::DataArchitecture, Phase::SolutionArchitecture),
        (Phase::SolutionArchitecture, Phase::Integration),
        (Phase::Integration, Phase::Complete),
    ];

    for (phase, next) in chain {
        edges.push(((phase, Completed), after(phase, next)));
        edges.push(((phase, Failed), Phase::Failed));

        if gated && let Some(review) = phase.review_phase() {
            edges.push(((review, Approved), next));
            edges.push(((review, RevisionRequested), phase));
            edges.push(((review, Rejected), Phase::Failed));
            edges.push(((review, Failed), Phase::Failed));
        }
    }

    edges
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_tables_validate() {
        assert!(TransitionTable::new(Mode::Linear).is_ok());
        assert!(TransitionTable::new(Mode::Gated).is_ok());
    }

    #[test]
    fn test_linear_plan_skips_reviews() {
        let table = TransitionTable::new(Mode::Linear).unwrap();
        let plan = table.plan();
        assert_eq!(plan.first(), Some(&Phase::Initialization));
        assert_eq!(plan.last(), Some(&Phase::Complete));
        assert!(plan.iter().all(|p| !p.is_review()));
        assert_eq!(plan.len(), 8);
    }

    #[test]
    fn test_gated_plan_includes_reviews() {
        let table = TransitionTable::new(Mode::Gated).unwrap();
        let plan = table.plan();
        assert_eq!(plan.len(), 11);
        let fr = plan.iter().position(|p| *p == Phase::FunctionalRequirements).unwrap();
        assert_eq!(plan[fr + 1], Phase::FunctionalReview);
    }

    #[test]
    fn test_revision_loops_back_to_reviewed_phase() {
        let table = TransitionTable::new(Mode::Gated).unwrap();
        assert_eq!(
            table.next(Phase::SolutionReview, Outcome::RevisionRequested).unwrap(),
            Phase::SolutionArchitecture
        );
        assert_eq!(
            table.next(Phase::FunctionalReview, Outcome::Rejected).unwrap(),
            Phase::Failed
        );
    }

    #[test]
    fn test_terminal_phases_have_no_edges() {
        let table = TransitionTable::new(Mode::Gated).unwrap();
        for outcome in [Outcome::Completed, Outcome::Failed, Outcome::Approved] {
            assert!(table.next(Phase::Complete, outcome).is_err());
            assert!(table.next(Phase::Failed, outcome).is_err());
        }
    }

    #[test]
    fn test_missing_failure_edge_is_rejected() {
        let edges: Vec<_> = default_edges(Mode::Linear)
            .into_iter()
            .filter(|((phase, outcome), _)| {
                !(*phase == Phase::DataArchitecture && *outcome == Outcome::Failed)
            })
            .collect();
        let err = TransitionTable::from_edges(Mode::Linear, edges).unwrap_err();
        assert_eq!(
            err,
            TransitionError::MissingEdge {
                phase: Phase::DataArchitecture,
                outcome: Outcome::Failed
            }
        );
    }

    #[test]
    fn test_review_edge_rejected_in_linear_mode() {
        let mut edges = default_edges(Mode::Linear);
        edges.push(((Phase::FunctionalReview, Outcome::Approved), Phase::Integration));
        let err = TransitionTable::from_edges(Mode::Linear, edges).unwrap_err();
        assert!(matches!(err, TransitionError::PhaseNotInMode { .. }));
    }

    #[test]
    fn test_edge_out_of_terminal_is_rejected() {
        let mut edges = default_edges(Mode::Linear);
        edges.push(((Phase::Complete, Outcome::Completed), Phase::Initialization));
        let err = TransitionTable::from_edges(Mode::Linear, edges).unwrap_err();
        assert!(matches!(
            err,
            TransitionError::UnexpectedOutcome { phase: Phase::Complete, .. }
        ));
    }
}
