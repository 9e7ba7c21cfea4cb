//! Review gates for phase outputs.
//!
//! In gated mode each gateable work phase is followed by a review phase. The
//! [`ReviewGate`] formats the phase's outputs for a human, classifies the
//! answer coming back through a [`ReviewChannel`], and tracks the review
//! record through `Pending -> Approved | RevisionRequested -> InRevision`.
//!
//! ## Example
//!
//! ```
//! use reqflow::phase::Phase;
//! use reqflow::review::{ReviewDecision, ReviewGate};
//!
//! let gate = ReviewGate::new();
//! let feedback = gate.decide("revise\npriority: login first", false, Phase::FunctionalRequirements);
//! assert_eq!(feedback.decision, ReviewDecision::RequestRevision);
//! assert_eq!(feedback.revision_items, vec!["priority"]);
//! ```

pub mod channel;
mod gate;
mod types;

pub use channel::{ConsoleReviewChannel, ReviewChannel, ScriptedReviewChannel};
pub use gate::ReviewGate;
pub use types::{
    PhaseReview, ReviewDecision, ReviewFeedback, ReviewStatus, RevisionInstructions,
};
