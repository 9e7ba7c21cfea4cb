//! Retry, backoff and run-wide error accounting.
//!
//! [`ErrorHandler::execute_with_retry`] wraps each phase's worker fan-out:
//! transient [`WorkerError`](crate::errors::WorkerError)s are recorded and
//! retried with exponential backoff until the phase's counter in
//! `retry_attempts` reaches `max_retry_count`. Revision cycles charge the
//! same counter through [`ErrorHandler::register_revision`].

mod handler;
mod report;

pub use handler::{ERROR_THRESHOLD, ErrorHandler, RETRY_THRESHOLD, increment_version};
