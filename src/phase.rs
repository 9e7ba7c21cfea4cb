//! Phase definitions for the requirement process.
//!
//! The workflow is a fixed, ordered set of stages. Work phases run workers,
//! review phases gate a work phase behind a human decision (gated mode only),
//! and `Complete`/`Failed` are terminal.

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// A stage of the requirement process.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Initialization,
    SystemAnalysis,
    FunctionalRequirements,
    FunctionalReview,
    NonFunctionalRequirements,
    NonFunctionalReview,
    DataArchitecture,
    SolutionArchitecture,
    SolutionReview,
    Integration,
    Complete,
    Failed,
}

impl Phase {
    /// Every phase in declaration order.
    pub const ALL: [Phase; 12] = [
        Phase::Initialization,
        Phase::SystemAnalysis,
        Phase::FunctionalRequirements,
        Phase::FunctionalReview,
        Phase::NonFunctionalRequirements,
        Phase::NonFunctionalReview,
        Phase::DataArchitecture,
        Phase::SolutionArchitecture,
        Phase::SolutionReview,
        Phase::Integration,
        Phase::Complete,
        Phase::Failed,
    ];

    /// Phases that run registered workers.
    pub const WORK_PHASES: [Phase; 5] = [
        Phase::SystemAnalysis,
        Phase::FunctionalRequirements,
        Phase::NonFunctionalRequirements,
        Phase::DataArchitecture,
        Phase::SolutionArchitecture,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Initialization => "initialization",
            Phase::SystemAnalysis => "system_analysis",
            Phase::FunctionalRequirements => "functional_requirements",
            Phase::FunctionalReview => "functional_review",
            Phase::NonFunctionalRequirements => "non_functional_requirements",
            Phase::NonFunctionalReview => "non_functional_review",
            Phase::DataArchitecture => "data_architecture",
            Phase::SolutionArchitecture => "solution_architecture",
            Phase::SolutionReview => "solution_review",
            Phase::Integration => "integration",
            Phase::Complete => "complete",
            Phase::Failed => "failed",
        }
    }

    /// Human-readable name for terminal output.
    pub fn display_name(&self) -> &'static str {
        match self {
            Phase::Initialization => "Initialization",
            Phase::SystemAnalysis => "System analysis",
            Phase::FunctionalRequirements => "Functional requirements",
            Phase::FunctionalReview => "Functional review",
            Phase::NonFunctionalRequirements => "Non-functional requirements",
            Phase::NonFunctionalReview => "Non-functional review",
            Phase::DataArchitecture => "Data architecture",
            Phase::SolutionArchitecture => "Solution architecture",
            Phase::SolutionReview => "Solution review",
            Phase::Integration => "Integration",
            Phase::Complete => "Complete",
            Phase::Failed => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Complete | Phase::Failed)
    }

    pub fn is_review(&self) -> bool {
        matches!(
            self,
            Phase::FunctionalReview | Phase::NonFunctionalReview | Phase::SolutionReview
        )
    }

    pub fn is_work_phase(&self) -> bool {
        Self::WORK_PHASES.contains(self)
    }

    /// The review phase that gates this phase in gated mode.
    pub fn review_phase(&self) -> Option<Phase> {
        match self {
            Phase::FunctionalRequirements => Some(Phase::FunctionalReview),
            Phase::NonFunctionalRequirements => Some(Phase::NonFunctionalReview),
            Phase::SolutionArchitecture => Some(Phase::SolutionReview),
            _ => None,
        }
    }

    /// For a review phase, the work phase it reviews.
    pub fn reviewed_phase(&self) -> Option<Phase> {
        match self {
            Phase::FunctionalReview => Some(Phase::FunctionalRequirements),
            Phase::NonFunctionalReview => Some(Phase::NonFunctionalRequirements),
            Phase::SolutionReview => Some(Phase::SolutionArchitecture),
            _ => None,
        }
    }

    pub fn is_gateable(&self) -> bool {
        self.review_phase().is_some()
    }

    /// Upstream phases whose outputs this phase consumes.
    pub fn requires(&self) -> &'static [Phase] {
        match self {
            Phase::FunctionalRequirements => &[Phase::SystemAnalysis],
            Phase::NonFunctionalRequirements => &[Phase::FunctionalRequirements],
            Phase::DataArchitecture => &[Phase::FunctionalRequirements],
            Phase::SolutionArchitecture => {
                &[Phase::NonFunctionalRequirements, Phase::DataArchitecture]
            }
            Phase::Integration => &[Phase::SolutionArchitecture],
            _ => &[],
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Phase {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        Phase::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == normalized)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Invalid phase '{}'. Valid values: {}",
                    s,
                    Phase::ALL
                        .iter()
                        .map(|p| p.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            })
    }
}
