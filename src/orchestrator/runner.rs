use crate::checkpoint::CheckpointStore;
use crate::config::ProcessConfig;
use crate::errors::ProcessError;
use crate::orchestrator::events::ProcessEvent;
use crate::orchestrator::transitions::{Outcome, TransitionError, TransitionTable};
use crate::phase::Phase;
use crate::recovery::ErrorHandler;
use crate::review::{
    ConsoleReviewChannel, PhaseReview, ReviewChannel, ReviewDecision, ReviewGate, ReviewStatus,
};
use crate::sink::{ArtifactSink, ProcessArtifact};
use crate::state::ProcessState;
use crate::worker::{DomainInput, FanOutOptions, WorkerOutput, WorkerRegistry, fan_out};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Key under which revision instructions reach workers in `DomainInput::attributes`.
pub const REVISION_INSTRUCTIONS_KEY: &str = "revision_instructions";

/// How a run ended.
#[derive(Debug)]
pub struct RunResult {
    pub state: ProcessState,
    /// Set when the run failed or was cancelled.
    pub failure: Option<ProcessError>,
    pub duration: Duration,
}

impl RunResult {
    pub fn is_complete(&self) -> bool {
        self.state.current_phase() == Phase::Complete
    }

    pub fn is_failed(&self) -> bool {
        self.state.current_phase() == Phase::Failed
    }

    /// Cancelled runs stop between phases and can be resumed.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.failure, Some(ProcessError::Cancelled { .. }))
    }
}

/// Drives a run through the phase state machine.
pub struct PhaseOrchestrator {
    config: ProcessConfig,
    registry: WorkerRegistry,
    transitions: TransitionTable,
    gate: ReviewGate,
    handler: ErrorHandler,
    review_channel: Arc<dyn ReviewChannel>,
    sink: Option<Arc<dyn ArtifactSink>>,
    cancel: CancellationToken,
    event_tx: Option<mpsc::Sender<ProcessEvent>>,
}

impl PhaseOrchestrator {
    pub fn new(config: ProcessConfig, registry: WorkerRegistry) -> Result<Self, TransitionError> {
        let transitions = TransitionTable::new(config.mode())?;
        let cancel = CancellationToken::new();
        let handler = ErrorHandler::new(config.max_retry_count, config.base_backoff_delay)
            .with_cancellation(cancel.clone());

        let misplaced = registry.misplaced_phases();
        if !misplaced.is_empty() {
            tracing::warn!(phases = ?misplaced, "workers registered on phases that never run them");
        }

        Ok(Self {
            config,
            registry,
            transitions,
            gate: ReviewGate::new(),
            handler,
            review_channel: Arc::new(ConsoleReviewChannel),
            sink: None,
            cancel,
            event_tx: None,
        })
    }

    pub fn with_review_channel(mut self, channel: Arc<dyn ReviewChannel>) -> Self {
        self.review_channel = channel;
        self
    }

    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.handler = self.handler.with_checkpoint_store(store);
        self
    }

    pub fn with_artifact_sink(mut self, sink: Arc<dyn ArtifactSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Cancelling `token` stops the run at the next suspension point.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.handler = self.handler.with_cancellation(token.clone());
        self.cancel = token;
        self
    }

    pub fn with_event_channel(mut self, tx: mpsc::Sender<ProcessEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }

    pub fn transitions(&self) -> &TransitionTable {
        &self.transitions
    }

    pub fn error_handler(&self) -> &ErrorHandler {
        &self.handler
    }

    /// Start a fresh run.
    pub async fn run(&self, input: DomainInput) -> RunResult {
        self.resume(ProcessState::new(), input).await
    }

    /// Continue a run from `state.current_phase()`.
    ///
    /// A pending review is re-presented rather than re-opened, so a run
    /// cancelled while waiting for a decision picks up where it stopped.
    pub async fn resume(&self, mut state: ProcessState, input: DomainInput) -> RunResult {
        let timer = Instant::now();
        let input = Arc::new(input);
        let mut failure = None;

        tracing::info!(
            run_id = %state.run_id(),
            mode = %self.transitions.mode(),
            phase = %state.current_phase(),
            "run started"
        );
        self.emit(ProcessEvent::RunStarted {
            run_id: state.run_id(),
            mode: self.transitions.mode(),
            phase: state.current_phase(),
        })
        .await;

        while !state.current_phase().is_terminal() {
            let phase = state.current_phase();

            if self.cancel.is_cancelled() {
                tracing::info!(%phase, "run cancelled between phases");
                failure = Some(ProcessError::Cancelled { phase });
                break;
            }

            self.emit(ProcessEvent::PhaseStarted { phase }).await;

            let outcome = match self.step(phase, &mut state, &input).await {
                Ok(Outcome::Rejected) => {
                    let err = ProcessError::ReviewRejected {
                        phase: phase.reviewed_phase().unwrap_or(phase),
                    };
                    self.fail(err, phase, &mut state, &mut failure);
                    Outcome::Rejected
                }
                Ok(outcome) => outcome,
                Err(ProcessError::DataIntegrity { missing, .. }) => {
                    match self.reroute(phase, missing, &mut state).await {
                        Ok(()) => continue,
                        Err(err) => {
                            self.fail(err, phase, &mut state, &mut failure);
                            Outcome::Failed
                        }
                    }
                }
                Err(err) if !err.is_terminal() => {
                    tracing::info!(%phase, error = %err, "run stopped");
                    failure = Some(err);
                    break;
                }
                Err(err) => {
                    self.fail(err, phase, &mut state, &mut failure);
                    Outcome::Failed
                }
            };

            let mut next = match self.transitions.next(phase, outcome) {
                Ok(next) => next,
                Err(err) => {
                    self.fail(err, phase, &mut state, &mut failure);
                    Phase::Failed
                }
            };

            if !next.is_terminal() && !self.handler.check_error_threshold(&state) {
                let err = ProcessError::ThresholdExceeded {
                    errors: state.errors().len(),
                    retries: state.total_retries(),
                };
                self.fail(err, phase, &mut state, &mut failure);
                next = Phase::Failed;
            }

            tracing::debug!(from = %phase, %outcome, to = %next, "transition");
            self.emit(ProcessEvent::Transition {
                from: phase,
                outcome,
                to: next,
            })
            .await;
            state.set_current_phase(next);
        }

        let final_phase = state.current_phase();
        tracing::info!(
            phase = %final_phase,
            errors = state.errors().len(),
            version = %state.document_version(),
            "run finished"
        );
        self.emit(ProcessEvent::RunFinished {
            phase: final_phase,
            success: final_phase == Phase::Complete,
            errors: state.errors().len(),
        })
        .await;

        RunResult {
            state,
            failure,
            duration: timer.elapsed(),
        }
    }

    async fn step(
        &self,
        phase: Phase,
        state: &mut ProcessState,
        input: &Arc<DomainInput>,
    ) -> Result<Outcome, ProcessError> {
        match phase {
            Phase::Initialization => {
                state.initialize_version();
                state.mark_completed(phase);
                Ok(Outcome::Completed)
            }
            Phase::Integration => self.integrate(state, input).await,
            p if p.is_work_phase() => self.run_work_phase(p, state, input).await,
            p if p.is_review() => self.run_review(p, state).await,
            // Terminal phases never reach here; the loop stops before them.
            _ => Err(ProcessError::InvalidTransition {
                phase,
                outcome: Outcome::Completed,
            }),
        }
    }

    fn check_dependencies(&self, phase: Phase, state: &ProcessState) -> Result<(), ProcessError> {
        match phase.requires().iter().find(|dep| !state.is_completed(**dep)) {
            Some(&missing) => Err(ProcessError::DataIntegrity { phase, missing }),
            None => Ok(()),
        }
    }

    /// Send the run back to a dependency that has not completed, charging
    /// the detour against that phase's budget.
    async fn reroute(
        &self,
        phase: Phase,
        missing: Phase,
        state: &mut ProcessState,
    ) -> Result<(), ProcessError> {
        let err = ProcessError::DataIntegrity { phase, missing };
        tracing::warn!(%phase, %missing, "dependency missing, rerouting");
        state.record_error(&err.to_string());
        state.set_last_error_phase(Some(phase));
        self.handler.register_revision(missing, state)?;

        self.emit(ProcessEvent::DependencyMissing { phase, missing }).await;
        state.set_current_phase(missing);
        Ok(())
    }

    async fn run_work_phase(
        &self,
        phase: Phase,
        state: &mut ProcessState,
        input: &Arc<DomainInput>,
    ) -> Result<Outcome, ProcessError> {
        self.check_dependencies(phase, state)?;

        let run_input = match self.revision_instructions(phase, state) {
            Some(instructions) => {
                let mut revised = (**input).clone();
                revised
                    .attributes
                    .insert(REVISION_INSTRUCTIONS_KEY.to_string(), instructions);
                Arc::new(revised)
            }
            None => Arc::clone(input),
        };

        let workers = self.registry.workers(phase);
        let prior = Arc::new(state.worker_outputs().to_vec());
        let options = FanOutOptions::default()
            .with_timeout(self.config.worker_timeout)
            .with_cancel(self.cancel.clone());
        let options = &options;

        let outputs = self
            .handler
            .execute_with_retry(phase, state, move || {
                fan_out(
                    phase,
                    workers,
                    Arc::clone(&run_input),
                    Arc::clone(&prior),
                    options,
                )
            })
            .await?;

        let count = outputs.len();
        state.append_outputs(outputs);
        state.mark_completed(phase);
        tracing::info!(%phase, outputs = count, "phase completed");
        self.emit(ProcessEvent::PhaseCompleted {
            phase,
            outputs: count,
        })
        .await;

        Ok(Outcome::Completed)
    }

    /// Instructions from the review that sent `phase` back for revision.
    fn revision_instructions(&self, phase: Phase, state: &ProcessState) -> Option<Value> {
        let review = state.pending_review()?;
        if review.phase != phase || review.status != ReviewStatus::InRevision {
            return None;
        }
        let feedback = review.feedback.as_ref()?;
        serde_json::to_value(self.gate.generate_revision_instructions(feedback)).ok()
    }

    async fn run_review(
        &self,
        review_phase: Phase,
        state: &mut ProcessState,
    ) -> Result<Outcome, ProcessError> {
        let reviewed = review_phase
            .reviewed_phase()
            .ok_or(ProcessError::InvalidTransition {
                phase: review_phase,
                outcome: Outcome::Approved,
            })?;

        let content: Vec<WorkerOutput> = state
            .latest_outputs()
            .into_iter()
            .filter(|o| o.phase == reviewed)
            .cloned()
            .collect();

        let mut review = match state.take_pending_review() {
            Some(existing) if existing.phase == reviewed => existing,
            _ => self.gate.create_phase_review(reviewed, &content, None),
        };
        review.status = ReviewStatus::Pending;
        review.retry_count = state.retry_count(reviewed);
        state.set_pending_review(review.clone());

        self.emit(ProcessEvent::ReviewRequested {
            phase: reviewed,
            version: state.document_version().to_string(),
        })
        .await;

        let raw = if self.config.auto_approve {
            String::new()
        } else {
            let presentation = self.gate.present_for_review(&review, &content);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Err(ProcessError::Cancelled { phase: review_phase });
                }
                answer = self.review_channel.request_decision(reviewed, &presentation) => {
                    answer.map_err(|e| ProcessError::ReviewChannel {
                        phase: reviewed,
                        message: format!("{e:#}"),
                    })?
                }
            }
        };

        let feedback = self.gate.decide(&raw, self.config.auto_approve, reviewed);
        let decision = feedback.decision;
        let review = self.gate.update_phase_review(review, feedback);
        state.take_pending_review();
        state.record_review(review.clone());

        self.emit(ProcessEvent::ReviewDecided {
            phase: reviewed,
            decision,
        })
        .await;

        match decision {
            ReviewDecision::Approve => Ok(Outcome::Approved),
            ReviewDecision::Reject => Ok(Outcome::Rejected),
            ReviewDecision::RequestRevision => {
                self.handler.register_revision(reviewed, state)?;
                let version = state.bump_version(reviewed).to_string();
                tracing::info!(phase = %reviewed, %version, "revision requested");
                self.emit(ProcessEvent::VersionBumped {
                    version,
                    phase: reviewed,
                })
                .await;

                state.set_pending_review(PhaseReview {
                    status: ReviewStatus::InRevision,
                    ..review
                });
                Ok(Outcome::RevisionRequested)
            }
        }
    }

    async fn integrate(
        &self,
        state: &mut ProcessState,
        input: &DomainInput,
    ) -> Result<Outcome, ProcessError> {
        self.check_dependencies(Phase::Integration, state)?;

        let consolidated = consolidate(state.latest_outputs());
        tracing::info!(deliverables = consolidated.len(), "consolidated deliverables");
        state.set_consolidated(consolidated);

        if let Some(ref sink) = self.sink {
            let artifact = ProcessArtifact::from_state(state, input);
            sink.deliver(&artifact).await.map_err(ProcessError::Sink)?;
        }

        state.mark_completed(Phase::Integration);
        self.emit(ProcessEvent::PhaseCompleted {
            phase: Phase::Integration,
            outputs: 0,
        })
        .await;
        Ok(Outcome::Completed)
    }

    /// Record a terminal failure against the phase that caused it: the
    /// error's own phase (the reviewed work phase for review outcomes),
    /// otherwise the phase that just ran.
    fn fail(
        &self,
        err: ProcessError,
        ran: Phase,
        state: &mut ProcessState,
        failure: &mut Option<ProcessError>,
    ) {
        let culprit = err.phase().unwrap_or(ran);
        self.handler.handle_critical_error(&err, culprit, state);
        *failure = Some(err);
    }

    async fn emit(&self, event: ProcessEvent) {
        if let Some(ref tx) = self.event_tx {
            tx.send(event).await.ok();
        }
    }
}

/// Merge deliverables by key in output order. Arrays under the same key are
/// concatenated; any other value is replaced by the later one.
pub fn consolidate<'a>(
    outputs: impl IntoIterator<Item = &'a WorkerOutput>,
) -> BTreeMap<String, Value> {
    let mut merged: BTreeMap<String, Value> = BTreeMap::new();
    for output in outputs {
        for (key, value) in &output.deliverables {
            match (merged.get_mut(key), value) {
                (Some(Value::Array(existing)), Value::Array(items)) => {
                    existing.extend(items.iter().cloned());
                }
                _ => {
                    merged.insert(key.clone(), value.clone());
                }
            }
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryCheckpointStore;
    use crate::errors::WorkerError;
    use crate::review::ScriptedReviewChannel;
    use crate::sink::MemoryArtifactSink;
    use crate::worker::Worker;
    use crate::worker::personas::default_registry;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails its first `failures` calls, then succeeds.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    impl Flaky {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Worker for Flaky {
        fn role(&self) -> &str {
            "flaky"
        }

        async fn execute(
            &self,
            _input: &DomainInput,
            _prior: &[WorkerOutput],
        ) -> Result<WorkerOutput, WorkerError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                return Err(WorkerError::failed("flaky", format!("boom #{call}")));
            }
            Ok(WorkerOutput::new("flaky").with_deliverable("calls", json!(call)))
        }
    }

    /// Records the revision instructions it was handed.
    struct Echo;

    #[async_trait]
    impl Worker for Echo {
        fn role(&self) -> &str {
            "echo"
        }

        async fn execute(
            &self,
            input: &DomainInput,
            _prior: &[WorkerOutput],
        ) -> Result<WorkerOutput, WorkerError> {
            let instructions = input
                .attributes
                .get(REVISION_INSTRUCTIONS_KEY)
                .cloned()
                .unwrap_or(Value::Null);
            Ok(WorkerOutput::new("echo").with_deliverable("instructions", instructions))
        }
    }

    /// Cancels the run while the reviewer is still thinking.
    struct WalkAway(CancellationToken);

    #[async_trait]
    impl ReviewChannel for WalkAway {
        async fn request_decision(&self, _phase: Phase, _presentation: &str) -> anyhow::Result<String> {
            self.0.cancel();
            std::future::pending().await
        }
    }

    fn linear() -> ProcessConfig {
        ProcessConfig::default()
            .with_interactive_mode(false)
            .with_base_backoff_delay(Duration::ZERO)
    }

    fn gated() -> ProcessConfig {
        ProcessConfig::default()
            .with_interactive_mode(true)
            .with_base_backoff_delay(Duration::ZERO)
    }

    fn input() -> DomainInput {
        DomainInput::new("Library")
            .with_description("Lending desk")
            .with_goal("Track loans")
            .with_stakeholder("Librarian")
    }

    fn scripted(answers: &[&str]) -> Arc<ScriptedReviewChannel> {
        Arc::new(ScriptedReviewChannel::new(answers.iter().copied()))
    }

    #[tokio::test]
    async fn test_linear_run_completes_and_delivers() {
        let sink = Arc::new(MemoryArtifactSink::new());
        let orchestrator = PhaseOrchestrator::new(linear(), default_registry())
            .unwrap()
            .with_artifact_sink(sink.clone());

        let result = orchestrator.run(input()).await;

        assert!(result.is_complete(), "failure: {:?}", result.failure);
        assert!(result.failure.is_none());
        assert_eq!(
            result.state.completed_phases(),
            &[
                Phase::Initialization,
                Phase::SystemAnalysis,
                Phase::FunctionalRequirements,
                Phase::NonFunctionalRequirements,
                Phase::DataArchitecture,
                Phase::SolutionArchitecture,
                Phase::Integration,
            ]
        );
        assert_eq!(result.state.document_version(), "1.0");
        assert!(result.state.consolidated().contains_key("functional_requirements"));

        let delivered = sink.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].project_name, "Library");
    }

    #[tokio::test]
    async fn test_gated_revisions_bump_version_before_approval() {
        let channel = scripted(&["revise", "change it", "approve", "ok", "lgtm"]);
        let mut registry = WorkerRegistry::new();
        registry.register(Phase::FunctionalRequirements, Echo);
        let orchestrator = PhaseOrchestrator::new(gated(), registry)
            .unwrap()
            .with_review_channel(channel.clone());

        let result = orchestrator.run(input()).await;

        assert!(result.is_complete(), "failure: {:?}", result.failure);
        assert_eq!(result.state.document_version(), "1.2");
        let history: Vec<String> = result
            .state
            .version_history()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            history,
            vec![
                "1.1 - functional_requirements revision",
                "1.2 - functional_requirements revision"
            ]
        );
        assert_eq!(result.state.retry_count(Phase::FunctionalRequirements), 2);
        assert_eq!(channel.remaining(), 0);

        // Three runs of the phase: the two re-runs saw revision instructions.
        let echoes: Vec<&WorkerOutput> = result
            .state
            .outputs_for(Phase::FunctionalRequirements)
            .collect();
        assert_eq!(echoes.len(), 3);
        assert_eq!(echoes[0].deliverables["instructions"], Value::Null);
        assert!(echoes[1].deliverables["instructions"].is_object());

        let decided: Vec<ReviewDecision> = result
            .state
            .phase_reviews()
            .iter()
            .filter_map(|r| r.feedback.as_ref().map(|f| f.decision))
            .collect();
        assert_eq!(decided.len(), 5);
        assert!(result.state.pending_review().is_none());
    }

    #[tokio::test]
    async fn test_never_approved_review_fails_the_run() {
        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        let orchestrator = PhaseOrchestrator::new(gated(), WorkerRegistry::new())
            .unwrap()
            .with_review_channel(Arc::new(ScriptedReviewChannel::repeating("revise")))
            .with_checkpoint_store(checkpoints.clone());

        let result = orchestrator.run(input()).await;

        assert!(result.is_failed());
        assert!(matches!(
            result.failure,
            Some(ProcessError::RevisionsExhausted {
                phase: Phase::FunctionalRequirements,
                retry_count: 3
            })
        ));
        assert_eq!(result.state.document_version(), "1.3");
        assert_eq!(
            result.state.last_error_phase(),
            Some(Phase::FunctionalRequirements)
        );
        assert!(result.state.errors().iter().any(|e| e.contains("CRITICAL")));
        assert_eq!(checkpoints.entries().unwrap().len(), 1);

        let report = orchestrator.error_handler().generate_error_report(&result.state);
        assert!(report.contains("functional_requirements: 3 retries"));
        assert!(report.contains("Last error phase: functional_requirements"));

        let suggestions = orchestrator.error_handler().suggest_recovery_action(&result.state);
        assert!(suggestions.contains_key("manual_intervention"));
        assert!(!suggestions.contains_key("retry"));
    }

    #[tokio::test]
    async fn test_rejection_is_attributed_to_reviewed_phase() {
        let orchestrator = PhaseOrchestrator::new(gated(), WorkerRegistry::new())
            .unwrap()
            .with_review_channel(scripted(&["approve", "reject"]));

        let result = orchestrator.run(input()).await;

        assert!(matches!(
            result.failure,
            Some(ProcessError::ReviewRejected {
                phase: Phase::NonFunctionalRequirements
            })
        ));
        assert_eq!(
            result.state.last_error_phase(),
            Some(Phase::NonFunctionalRequirements)
        );
    }

    #[tokio::test]
    async fn test_error_threshold_fails_the_run() {
        let mut registry = WorkerRegistry::new();
        registry.register(Phase::FunctionalRequirements, Flaky::new(4));
        registry.register(Phase::NonFunctionalRequirements, Flaky::new(4));
        registry.register(Phase::SystemAnalysis, Flaky::new(4));
        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        let orchestrator = PhaseOrchestrator::new(linear().with_max_retry_count(5), registry)
            .unwrap()
            .with_checkpoint_store(checkpoints.clone());

        let result = orchestrator.run(input()).await;

        assert!(result.is_failed());
        assert!(matches!(
            result.failure,
            Some(ProcessError::ThresholdExceeded {
                errors: 12,
                retries: 0
            })
        ));
        // Each phase recovered, so only the error count tripped the threshold.
        assert!(result.state.is_completed(Phase::NonFunctionalRequirements));
        assert!(!result.state.is_completed(Phase::DataArchitecture));
        assert_eq!(
            result.state.last_error_phase(),
            Some(Phase::NonFunctionalRequirements)
        );
        assert!(
            result
                .state
                .errors()
                .last()
                .is_some_and(|e| e.starts_with("CRITICAL"))
        );
        let snapshots = checkpoints.entries().unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].errors.len(), 13);
    }

    #[tokio::test]
    async fn test_rejection_is_terminal() {
        let orchestrator = PhaseOrchestrator::new(gated(), WorkerRegistry::new())
            .unwrap()
            .with_review_channel(scripted(&["reject"]));

        let result = orchestrator.run(input()).await;

        assert!(result.is_failed());
        assert!(matches!(
            result.failure,
            Some(ProcessError::ReviewRejected {
                phase: Phase::FunctionalRequirements
            })
        ));
        assert!(!result.state.is_completed(Phase::NonFunctionalRequirements));
    }

    #[tokio::test]
    async fn test_auto_approve_never_asks() {
        let channel = scripted(&[]);
        let orchestrator = PhaseOrchestrator::new(gated().with_auto_approve(true), default_registry())
            .unwrap()
            .with_review_channel(channel.clone());

        let result = orchestrator.run(input()).await;

        assert!(result.is_complete(), "failure: {:?}", result.failure);
        assert!(channel.seen().is_empty());
        assert_eq!(result.state.phase_reviews().len(), 3);
    }

    #[tokio::test]
    async fn test_review_channel_failure_fails_run() {
        let orchestrator = PhaseOrchestrator::new(gated(), WorkerRegistry::new())
            .unwrap()
            .with_review_channel(scripted(&[]));

        let result = orchestrator.run(input()).await;

        assert!(result.is_failed());
        assert!(matches!(
            result.failure,
            Some(ProcessError::ReviewChannel {
                phase: Phase::FunctionalRequirements,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let mut registry = WorkerRegistry::new();
        registry.register(Phase::DataArchitecture, Flaky::new(2));
        let orchestrator = PhaseOrchestrator::new(linear(), registry).unwrap();

        let result = orchestrator.run(input()).await;

        assert!(result.is_complete(), "failure: {:?}", result.failure);
        assert_eq!(result.state.retry_count(Phase::DataArchitecture), 0);
        assert_eq!(result.state.errors().len(), 2);
        let output = result.state.outputs_for(Phase::DataArchitecture).next().unwrap();
        assert_eq!(output.deliverables["calls"], json!(3));
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_the_run() {
        let mut registry = WorkerRegistry::new();
        registry.register(Phase::SystemAnalysis, Flaky::new(u32::MAX));
        let orchestrator =
            PhaseOrchestrator::new(linear().with_max_retry_count(2), registry).unwrap();

        let result = orchestrator.run(input()).await;

        assert!(result.is_failed());
        assert!(matches!(
            result.failure,
            Some(ProcessError::RetriesExhausted {
                phase: Phase::SystemAnalysis,
                retry_count: 2,
                ..
            })
        ));
        assert_eq!(result.state.retry_count(Phase::SystemAnalysis), 2);
        assert!(!result.state.is_completed(Phase::SystemAnalysis));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_is_resumable() {
        let token = CancellationToken::new();
        token.cancel();
        let orchestrator = PhaseOrchestrator::new(linear(), default_registry())
            .unwrap()
            .with_cancellation(token);

        let result = orchestrator.run(input()).await;

        assert!(result.is_cancelled());
        assert_eq!(result.state.current_phase(), Phase::Initialization);
        assert!(result.state.errors().is_empty());

        let orchestrator = PhaseOrchestrator::new(linear(), default_registry()).unwrap();
        let resumed = orchestrator.resume(result.state, input()).await;
        assert!(resumed.is_complete(), "failure: {:?}", resumed.failure);
    }

    #[tokio::test]
    async fn test_cancel_during_review_keeps_pending_review() {
        let token = CancellationToken::new();
        let orchestrator = PhaseOrchestrator::new(gated(), WorkerRegistry::new())
            .unwrap()
            .with_cancellation(token.clone())
            .with_review_channel(Arc::new(WalkAway(token)));

        let result = orchestrator.run(input()).await;

        assert!(result.is_cancelled());
        assert_eq!(result.state.current_phase(), Phase::FunctionalReview);
        let pending = result.state.pending_review().unwrap();
        assert_eq!(pending.phase, Phase::FunctionalRequirements);
        assert_eq!(pending.status, ReviewStatus::Pending);

        let channel = scripted(&["approve", "approve", "approve"]);
        let orchestrator = PhaseOrchestrator::new(gated(), WorkerRegistry::new())
            .unwrap()
            .with_review_channel(channel.clone());
        let resumed = orchestrator.resume(result.state, input()).await;

        assert!(resumed.is_complete(), "failure: {:?}", resumed.failure);
        assert_eq!(channel.seen()[0].0, Phase::FunctionalRequirements);
    }

    #[tokio::test]
    async fn test_missing_dependency_reroutes_upstream() {
        let mut state = ProcessState::new();
        state.set_current_phase(Phase::SolutionArchitecture);
        let orchestrator = PhaseOrchestrator::new(linear(), WorkerRegistry::new()).unwrap();

        let result = orchestrator.resume(state, input()).await;

        assert!(result.is_complete(), "failure: {:?}", result.failure);
        assert_eq!(
            &result.state.completed_phases()[..3],
            &[
                Phase::SystemAnalysis,
                Phase::FunctionalRequirements,
                Phase::NonFunctionalRequirements,
            ]
        );
        assert_eq!(result.state.errors().len(), 3);
        assert_eq!(result.state.retry_count(Phase::SystemAnalysis), 1);
    }

    #[tokio::test]
    async fn test_events_bracket_the_run() {
        let (tx, mut rx) = mpsc::channel(256);
        let orchestrator = PhaseOrchestrator::new(linear(), WorkerRegistry::new())
            .unwrap()
            .with_event_channel(tx);

        let result = orchestrator.run(input()).await;
        drop(orchestrator);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert!(matches!(events.first(), Some(ProcessEvent::RunStarted { .. })));
        assert_eq!(
            events.last(),
            Some(&ProcessEvent::RunFinished {
                phase: Phase::Complete,
                success: true,
                errors: 0
            })
        );
        let transitions = events
            .iter()
            .filter(|e| matches!(e, ProcessEvent::Transition { .. }))
            .count();
        assert_eq!(transitions, 7);
        assert!(result.is_complete());
    }

    #[test]
    fn test_consolidate_concatenates_arrays() {
        let outputs = [
            WorkerOutput::new("infrastructure_engineer")
                .with_deliverable("nfr", json!([{"category": "performance"}]))
                .with_deliverable("owner", json!("ops")),
            WorkerOutput::new("security_specialist")
                .with_deliverable("nfr", json!([{"category": "security"}]))
                .with_deliverable("owner", json!("sec")),
        ];
        let merged = consolidate(&outputs);
        assert_eq!(merged["nfr"].as_array().unwrap().len(), 2);
        assert_eq!(merged["owner"], json!("sec"));
    }
}
