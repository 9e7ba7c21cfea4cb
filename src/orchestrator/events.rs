use crate::orchestrator::transitions::{Mode, Outcome};
use crate::phase::Phase;
use crate::review::ReviewDecision;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Progress events emitted while a run advances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProcessEvent {
    RunStarted {
        run_id: Uuid,
        mode: Mode,
        phase: Phase,
    },
    PhaseStarted {
        phase: Phase,
    },
    PhaseCompleted {
        phase: Phase,
        outputs: usize,
    },
    /// A phase found an upstream phase missing and was routed back to it.
    DependencyMissing {
        phase: Phase,
        missing: Phase,
    },
    ReviewRequested {
        phase: Phase,
        version: String,
    },
    ReviewDecided {
        phase: Phase,
        decision: ReviewDecision,
    },
    VersionBumped {
        version: String,
        phase: Phase,
    },
    Transition {
        from: Phase,
        outcome: Outcome,
        to: Phase,
    },
    RunFinished {
        phase: Phase,
        success: bool,
        errors: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_are_tagged() {
        let event = ProcessEvent::Transition {
            from: Phase::FunctionalReview,
            outcome: Outcome::RevisionRequested,
            to: Phase::FunctionalRequirements,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "transition");
        assert_eq!(json["outcome"], "revision_requested");
        assert_eq!(json["to"], "functional_requirements");
    }
}
