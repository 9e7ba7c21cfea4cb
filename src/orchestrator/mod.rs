//! Phase orchestration: the transition table, the run loop, and the events
//! it reports while advancing.

pub mod events;
mod runner;
pub mod transitions;

pub use events::ProcessEvent;
pub use runner::{PhaseOrchestrator, REVISION_INSTRUCTIONS_KEY, RunResult, consolidate};
pub use transitions::{Mode, Outcome, TransitionError, TransitionTable};
