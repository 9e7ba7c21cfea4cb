//! Phase orchestration for a multi-expert requirement process.
//!
//! A run walks a fixed phase graph. Work phases fan out to registered
//! [`worker::Worker`]s and merge their outputs; in gated mode, review phases
//! stop for a human decision and can send a phase back for revision. Retries,
//! revisions and errors are tracked per phase in [`state::ProcessState`].

pub mod checkpoint;
pub mod config;
pub mod errors;
pub mod logging;
pub mod orchestrator;
pub mod phase;
pub mod recovery;
pub mod review;
pub mod sink;
pub mod state;
pub mod ui;
pub mod worker;
