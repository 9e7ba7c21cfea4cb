//! Typed error hierarchy for the reqflow engine.
//!
//! Two top-level enums cover the two layers of failure:
//! - `WorkerError`: a single worker call failed; transient and retried locally
//! - `ProcessError`: a run-level failure that forces the run into `Phase::Failed`
//!   (or, for `Cancelled`, stops it cleanly between phases)

use crate::orchestrator::transitions::Outcome;
use crate::phase::Phase;
use std::time::Duration;
use thiserror::Error;

/// Errors from one worker invocation.
///
/// These never reach the orchestrator directly: the retry handler absorbs them
/// until the phase's retry budget is spent.
#[derive(Debug, Clone, Error)]
pub enum WorkerError {
    #[error("Worker {role} failed: {message}")]
    Failed { role: String, message: String },

    #[error("Worker {role} timed out after {timeout:?}")]
    TimedOut { role: String, timeout: Duration },

    #[error("Worker task for {role} aborted: {message}")]
    Aborted { role: String, message: String },

    #[error("Worker invocation cancelled")]
    Cancelled,
}

impl WorkerError {
    /// Build a plain failure for the given worker role.
    pub fn failed(role: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            role: role.into(),
            message: message.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, WorkerError::Cancelled)
    }
}

/// Run-level errors raised by the orchestrator and the retry handler.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Phase {phase} exhausted its retry budget ({retry_count} retries): {source}")]
    RetriesExhausted {
        phase: Phase,
        retry_count: u32,
        #[source]
        source: WorkerError,
    },

    #[error("Phase {phase} exhausted its revision budget ({retry_count} revisions)")]
    RevisionsExhausted { phase: Phase, retry_count: u32 },

    #[error("Error threshold exceeded ({errors} errors, {retries} retries)")]
    ThresholdExceeded { errors: usize, retries: u32 },

    #[error("Review of phase {phase} was rejected")]
    ReviewRejected { phase: Phase },

    #[error("Phase {phase} requires {missing}, which has not completed")]
    DataIntegrity { phase: Phase, missing: Phase },

    #[error("Run cancelled before phase {phase}")]
    Cancelled { phase: Phase },

    #[error("No transition from {phase} on outcome {outcome}")]
    InvalidTransition { phase: Phase, outcome: Outcome },

    #[error("Review channel failed for phase {phase}: {message}")]
    ReviewChannel { phase: Phase, message: String },

    #[error("Artifact sink failed: {0}")]
    Sink(#[source] anyhow::Error),
}

impl ProcessError {
    /// The phase the error is attributed to, when there is one.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            ProcessError::RetriesExhausted { phase, .. }
            | ProcessError::RevisionsExhausted { phase, .. }
            | ProcessError::ReviewRejected { phase }
            | ProcessError::DataIntegrity { phase, .. }
            | ProcessError::Cancelled { phase }
            | ProcessError::InvalidTransition { phase, .. }
            | ProcessError::ReviewChannel { phase, .. } => Some(*phase),
            ProcessError::ThresholdExceeded { .. } | ProcessError::Sink(_) => None,
        }
    }

    /// Retry count carried by budget-exhaustion errors.
    pub fn retry_count(&self) -> Option<u32> {
        match self {
            ProcessError::RetriesExhausted { retry_count, .. }
            | ProcessError::RevisionsExhausted { retry_count, .. } => Some(*retry_count),
            _ => None,
        }
    }

    /// Whether the error moves the run into `Phase::Failed`.
    ///
    /// Cancellation leaves the state resumable; data-integrity errors are
    /// routed back to the missing phase instead.
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            ProcessError::Cancelled { .. } | ProcessError::DataIntegrity { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_error_failed_carries_role() {
        let err = WorkerError::failed("qa_engineer", "boom");
        match &err {
            WorkerError::Failed { role, message } => {
                assert_eq!(role, "qa_engineer");
                assert_eq!(message, "boom");
            }
            _ => panic!("Expected Failed variant"),
        }
        assert!(err.to_string().contains("qa_engineer"));
    }

    #[test]
    fn worker_error_timeout_is_not_cancellation() {
        let err = WorkerError::TimedOut {
            role: "ux_designer".into(),
            timeout: Duration::from_secs(5),
        };
        assert!(!err.is_cancelled());
        assert!(WorkerError::Cancelled.is_cancelled());
    }

    #[test]
    fn retries_exhausted_carries_phase_and_count() {
        let err = ProcessError::RetriesExhausted {
            phase: Phase::SystemAnalysis,
            retry_count: 2,
            source: WorkerError::failed("system_analyst", "down"),
        };
        assert_eq!(err.phase(), Some(Phase::SystemAnalysis));
        assert_eq!(err.retry_count(), Some(2));
        assert!(err.to_string().contains("system_analysis"));
        assert!(err.is_terminal());
    }

    #[test]
    fn threshold_exceeded_has_no_phase() {
        let err = ProcessError::ThresholdExceeded {
            errors: 11,
            retries: 3,
        };
        assert_eq!(err.phase(), None);
        assert!(err.to_string().contains("11 errors"));
    }

    #[test]
    fn cancellation_and_data_integrity_are_not_terminal() {
        let cancelled = ProcessError::Cancelled {
            phase: Phase::DataArchitecture,
        };
        let integrity = ProcessError::DataIntegrity {
            phase: Phase::SolutionArchitecture,
            missing: Phase::DataArchitecture,
        };
        assert!(!cancelled.is_terminal());
        assert!(!integrity.is_terminal());
        assert!(ProcessError::ReviewRejected {
            phase: Phase::FunctionalRequirements
        }
        .is_terminal());
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&WorkerError::Cancelled);
        assert_std_error(&ProcessError::Cancelled {
            phase: Phase::Initialization,
        });
    }
}
