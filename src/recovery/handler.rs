use crate::checkpoint::{CheckpointStore, EmergencySnapshot};
use crate::errors::{ProcessError, WorkerError};
use crate::phase::Phase;
use crate::state::ProcessState;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// More errors than this fails the run.
pub const ERROR_THRESHOLD: usize = 10;
/// More retries than this (summed over phases) fails the run.
pub const RETRY_THRESHOLD: u32 = 15;

/// Bounded retry with exponential backoff, plus run-wide error bookkeeping.
#[derive(Clone)]
pub struct ErrorHandler {
    max_retry_count: u32,
    base_delay: Duration,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for ErrorHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorHandler")
            .field("max_retry_count", &self.max_retry_count)
            .field("base_delay", &self.base_delay)
            .field("checkpoints", &self.checkpoints.is_some())
            .finish()
    }
}

impl ErrorHandler {
    pub fn new(max_retry_count: u32, base_delay: Duration) -> Self {
        Self {
            max_retry_count,
            base_delay,
            checkpoints: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    /// Backoff sleeps end early when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn max_retry_count(&self) -> u32 {
        self.max_retry_count
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Delay before retry `k` (1-based): `base_delay * 2^(k-1)`.
    pub fn backoff(&self, k: u32) -> Duration {
        let exponent = k.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    /// Run `op` until it succeeds or the phase's retry budget is spent.
    ///
    /// The budget is `retry_attempts[phase]` against `max_retry_count`, so
    /// revisions already charged to the phase shrink it. On success the
    /// counter goes back to its value on entry.
    pub async fn execute_with_retry<T, F, Fut>(
        &self,
        phase: Phase,
        state: &mut ProcessState,
        mut op: F,
    ) -> Result<T, ProcessError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, WorkerError>>,
    {
        let baseline = state.retry_count(phase);

        loop {
            let attempt = state.retry_count(phase) - baseline + 1;
            tracing::info!(%phase, attempt, max_attempts = self.max_retry_count.saturating_sub(baseline) + 1, "executing phase");

            let err = match op().await {
                Ok(value) => {
                    state.set_retry_count(phase, baseline);
                    if attempt > 1 {
                        tracing::info!(%phase, attempt, "phase succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if err.is_cancelled() => {
                    return Err(ProcessError::Cancelled { phase });
                }
                Err(err) => err,
            };

            let count = state.retry_count(phase);
            state.set_last_error_phase(Some(phase));
            state.record_error(&format!("Phase {phase} failed: {err}"));
            tracing::error!(%phase, attempt, error = %err, "phase attempt failed");

            if count >= self.max_retry_count {
                let exhausted = ProcessError::RetriesExhausted {
                    phase,
                    retry_count: count,
                    source: err,
                };
                state.record_error(&exhausted.to_string());
                tracing::error!(%phase, retry_count = count, "retry budget exhausted");
                return Err(exhausted);
            }

            let k = count + 1;
            state.set_retry_count(phase, k);
            let delay = self.backoff(k);
            tracing::info!(%phase, retry = k, delay_ms = delay.as_millis() as u64, "retrying after backoff");

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(ProcessError::Cancelled { phase }),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Charge one revision of `phase` against its retry budget.
    pub fn register_revision(
        &self,
        phase: Phase,
        state: &mut ProcessState,
    ) -> Result<u32, ProcessError> {
        let count = state.retry_count(phase);
        if count >= self.max_retry_count {
            let err = ProcessError::RevisionsExhausted {
                phase,
                retry_count: count,
            };
            state.set_last_error_phase(Some(phase));
            state.record_error(&err.to_string());
            tracing::warn!(%phase, retry_count = count, "revision budget exhausted");
            return Err(err);
        }
        state.set_retry_count(phase, count + 1);
        Ok(count + 1)
    }

    /// Record a terminal error and write an emergency snapshot.
    ///
    /// A failing checkpoint store is logged and otherwise ignored.
    pub fn handle_critical_error(&self, err: &ProcessError, phase: Phase, state: &mut ProcessState) {
        let message = format!("Critical error in phase {phase}: {err}");
        tracing::error!(severity = "critical", %phase, error = %err, "critical error");

        state.record_error(&format!("CRITICAL - {message}"));
        state.set_last_error_phase(Some(phase));

        if let Some(ref store) = self.checkpoints {
            let snapshot = EmergencySnapshot::capture(state);
            match store.save(&snapshot) {
                Ok(()) => tracing::info!(run_id = %snapshot.run_id, "emergency snapshot saved"),
                Err(e) => tracing::error!(error = %e, "failed to save emergency snapshot"),
            }
        }
    }

    /// `false` once the run has accumulated too many errors or retries.
    pub fn check_error_threshold(&self, state: &ProcessState) -> bool {
        let errors = state.errors().len();
        let retries = state.total_retries();
        if errors > ERROR_THRESHOLD || retries > RETRY_THRESHOLD {
            tracing::warn!(errors, retries, "error threshold exceeded");
            return false;
        }
        true
    }

    /// Clear one phase's retry counter, or all error bookkeeping when `phase` is `None`.
    pub fn reset_error_state(&self, state: &mut ProcessState, phase: Option<Phase>) {
        match phase {
            Some(p) => {
                state.clear_retries(Some(p));
                tracing::info!(phase = %p, "reset phase error state");
            }
            None => {
                state.clear_retries(None);
                state.clear_errors();
                state.clear_warnings();
                state.set_last_error_phase(None);
                tracing::info!("reset run error state");
            }
        }
    }
}

/// `"major.minor"` to `"major.(minor+1)"`; anything unparseable restarts at `"1.1"`.
pub fn increment_version(version: &str) -> String {
    let parsed = version
        .split_once('.')
        .and_then(|(major, minor)| Some((major.parse::<u64>().ok()?, minor.parse::<u64>().ok()?)));
    match parsed {
        Some((major, minor)) => format!("{major}.{}", minor + 1),
        None => "1.1".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryCheckpointStore;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn handler(max: u32) -> ErrorHandler {
        ErrorHandler::new(max, Duration::from_secs(1))
    }

    #[test]
    fn test_backoff_doubles() {
        let h = handler(3);
        assert_eq!(h.backoff(1), Duration::from_secs(1));
        assert_eq!(h.backoff(2), Duration::from_secs(2));
        assert_eq!(h.backoff(3), Duration::from_secs(4));
    }

    #[test]
    fn test_increment_version() {
        assert_eq!(increment_version("1.0"), "1.1");
        assert_eq!(increment_version("2.9"), "2.10");
        assert_eq!(increment_version("garbage"), "1.1");
        assert_eq!(increment_version("1.x"), "1.1");
        assert_eq!(increment_version(""), "1.1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_does_not_retry_or_sleep() {
        let h = handler(3);
        let mut state = ProcessState::new();
        let start = Instant::now();
        let value = h
            .execute_with_retry(Phase::SystemAnalysis, &mut state, || async { Ok::<_, WorkerError>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(state.retry_count(Phase::SystemAnalysis), 0);
        assert!(state.errors().is_empty());
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_exhausts_after_max_plus_one_attempts() {
        let h = handler(2);
        let mut state = ProcessState::new();
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let err = h
            .execute_with_retry(Phase::DataArchitecture, &mut state, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(WorkerError::failed("data_architect", "down")) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(
            err,
            ProcessError::RetriesExhausted { phase: Phase::DataArchitecture, retry_count: 2, .. }
        ));
        // 1s + 2s of backoff
        assert_eq!(start.elapsed(), Duration::from_secs(3));
        assert_eq!(state.last_error_phase(), Some(Phase::DataArchitecture));
        assert_eq!(state.retry_count(Phase::DataArchitecture), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_then_success_restore_counter() {
        let h = handler(3);
        let mut state = ProcessState::new();
        let calls = AtomicU32::new(0);

        h.execute_with_retry(Phase::SystemAnalysis, &mut state, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(WorkerError::failed("system_analyst", "flaky"))
                } else {
                    Ok(())
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(state.retry_count(Phase::SystemAnalysis), 0);
        assert_eq!(state.errors().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_charged_revisions_shrink_retry_budget() {
        let h = handler(2);
        let mut state = ProcessState::new();
        h.register_revision(Phase::FunctionalRequirements, &mut state).unwrap();
        let calls = AtomicU32::new(0);

        let err = h
            .execute_with_retry(Phase::FunctionalRequirements, &mut state, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(WorkerError::failed("ux_designer", "down")) }
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(err.retry_count(), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_backoff() {
        let cancel = CancellationToken::new();
        let h = handler(3).with_cancellation(cancel.clone());
        let mut state = ProcessState::new();

        let trigger = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            cancel.cancel();
        });
        let err = h
            .execute_with_retry(Phase::SystemAnalysis, &mut state, || async {
                Err::<(), _>(WorkerError::failed("system_analyst", "down"))
            })
            .await
            .unwrap_err();
        trigger.await.unwrap();
        assert!(matches!(err, ProcessError::Cancelled { phase: Phase::SystemAnalysis }));
    }

    #[test]
    fn test_register_revision_until_exhausted() {
        let h = handler(2);
        let mut state = ProcessState::new();
        assert_eq!(h.register_revision(Phase::SolutionArchitecture, &mut state).unwrap(), 1);
        assert_eq!(h.register_revision(Phase::SolutionArchitecture, &mut state).unwrap(), 2);
        let err = h
            .register_revision(Phase::SolutionArchitecture, &mut state)
            .unwrap_err();
        assert!(matches!(err, ProcessError::RevisionsExhausted { retry_count: 2, .. }));
        assert_eq!(state.errors().len(), 1);
    }

    #[test]
    fn test_error_threshold() {
        let h = handler(3);
        let mut state = ProcessState::new();
        for i in 0..10 {
            state.record_error(&format!("error {i}"));
        }
        assert!(h.check_error_threshold(&state));
        state.record_error("one too many");
        assert!(!h.check_error_threshold(&state));

        let mut state = ProcessState::new();
        state.set_retry_count(Phase::SystemAnalysis, 8);
        state.set_retry_count(Phase::DataArchitecture, 8);
        assert!(!h.check_error_threshold(&state));
    }

    #[test]
    fn test_critical_error_writes_snapshot() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let h = handler(3).with_checkpoint_store(store.clone());
        let mut state = ProcessState::new();
        state.set_current_phase(Phase::Integration);

        let err = ProcessError::ReviewRejected {
            phase: Phase::SolutionArchitecture,
        };
        h.handle_critical_error(&err, Phase::SolutionReview, &mut state);

        assert!(state.errors()[0].contains("CRITICAL - "));
        assert_eq!(state.last_error_phase(), Some(Phase::SolutionReview));
        let snaps = store.entries().unwrap();
        assert_eq!(snaps.len(), 1);
        assert_eq!(snaps[0].current_phase, Phase::Integration);
        assert_eq!(snaps[0].errors.len(), 1);
    }

    #[test]
    fn test_reset_error_state() {
        let h = handler(3);
        let mut state = ProcessState::new();
        state.set_retry_count(Phase::SystemAnalysis, 2);
        state.set_retry_count(Phase::DataArchitecture, 1);
        state.record_error("x");
        state.set_last_error_phase(Some(Phase::SystemAnalysis));

        h.reset_error_state(&mut state, Some(Phase::SystemAnalysis));
        assert_eq!(state.retry_count(Phase::SystemAnalysis), 0);
        assert_eq!(state.retry_count(Phase::DataArchitecture), 1);
        assert_eq!(state.errors().len(), 1);

        h.reset_error_state(&mut state, None);
        assert_eq!(state.total_retries(), 0);
        assert!(state.errors().is_empty());
        assert_eq!(state.last_error_phase(), None);
    }
}
