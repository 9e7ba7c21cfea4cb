//! Worker capability and registration.
//!
//! A worker is a pluggable expert that turns the project brief plus every
//! prior output into one [`WorkerOutput`]. Phases register one or more
//! workers in a [`WorkerRegistry`]; [`fan_out`] runs them concurrently and
//! merges results in registration order.
//!
//! ## Example
//!
//! ```no_run
//! use reqflow::phase::Phase;
//! use reqflow::worker::{WorkerRegistry, personas::PersonaWorker, personas::PersonaRole};
//!
//! let mut registry = WorkerRegistry::new();
//! registry.register(Phase::FunctionalRequirements, PersonaWorker::new(PersonaRole::UxDesigner));
//! registry.register(Phase::FunctionalRequirements, PersonaWorker::new(PersonaRole::QaEngineer));
//! assert_eq!(registry.roles(Phase::FunctionalRequirements), vec!["ux_designer", "qa_engineer"]);
//! ```

pub mod command;
mod fanout;
pub mod personas;

pub use command::{CommandWorker, CommandWorkerConfig};
pub use fanout::{FanOutOptions, fan_out};

use crate::errors::WorkerError;
use crate::phase::Phase;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

/// The business brief every worker receives.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomainInput {
    pub project_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub background: String,
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub stakeholders: Vec<String>,
    #[serde(default)]
    pub scope: Vec<String>,
    /// Anything else the brief carries; passed through untouched.
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl DomainInput {
    pub fn new(project_name: &str) -> Self {
        Self {
            project_name: project_name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_goal(mut self, goal: &str) -> Self {
        self.goals.push(goal.to_string());
        self
    }

    pub fn with_stakeholder(mut self, stakeholder: &str) -> Self {
        self.stakeholders.push(stakeholder.to_string());
        self
    }

    /// Load a brief from a `.json`, `.yaml` or `.yml` file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read input file: {}", path.display()))?;

        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));

        if is_yaml {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse input YAML: {}", path.display()))
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse input JSON: {}", path.display()))
        }
    }
}

/// Immutable result of one worker call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerOutput {
    pub role: String,
    /// Phase that produced the output; stamped by the fan-out.
    #[serde(default)]
    pub phase: Phase,
    #[serde(default)]
    pub deliverables: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub concerns: Vec<String>,
}

impl WorkerOutput {
    pub fn new(role: &str) -> Self {
        Self {
            role: role.to_string(),
            phase: Phase::default(),
            deliverables: BTreeMap::new(),
            recommendations: Vec::new(),
            concerns: Vec::new(),
        }
    }

    pub fn with_deliverable(mut self, key: &str, value: serde_json::Value) -> Self {
        self.deliverables.insert(key.to_string(), value);
        self
    }

    pub fn with_recommendation(mut self, text: &str) -> Self {
        self.recommendations.push(text.to_string());
        self
    }

    pub fn with_concern(mut self, text: &str) -> Self {
        self.concerns.push(text.to_string());
        self
    }

    pub(crate) fn stamped(mut self, phase: Phase) -> Self {
        self.phase = phase;
        self
    }

    /// Deliverables of the most recent prior output with the given role.
    pub fn find_deliverables<'a>(
        prior: &'a [WorkerOutput],
        role: &str,
    ) -> Option<&'a BTreeMap<String, serde_json::Value>> {
        prior.iter().rfind(|o| o.role == role).map(|o| &o.deliverables)
    }
}

/// A pluggable expert.
///
/// Implementations must tolerate being called more than once for the same
/// input: retries and revision cycles re-invoke them.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Stable role name, used for ordering diagnostics and output attribution.
    fn role(&self) -> &str;

    async fn execute(
        &self,
        input: &DomainInput,
        prior: &[WorkerOutput],
    ) -> Result<WorkerOutput, WorkerError>;
}

/// Workers registered per phase, in registration order.
#[derive(Clone, Default)]
pub struct WorkerRegistry {
    by_phase: BTreeMap<Phase, Vec<Arc<dyn Worker>>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker for a phase. Order of calls is the merge order.
    pub fn register(&mut self, phase: Phase, worker: impl Worker + 'static) -> &mut Self {
        self.register_arc(phase, Arc::new(worker))
    }

    pub fn register_arc(&mut self, phase: Phase, worker: Arc<dyn Worker>) -> &mut Self {
        self.by_phase.entry(phase).or_default().push(worker);
        self
    }

    pub fn workers(&self, phase: Phase) -> &[Arc<dyn Worker>] {
        self.by_phase.get(&phase).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn roles(&self, phase: Phase) -> Vec<&str> {
        self.workers(phase).iter().map(|w| w.role()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.by_phase.values().all(Vec::is_empty)
    }

    /// Phases that have at least one registered worker.
    pub fn phases(&self) -> Vec<Phase> {
        self.by_phase
            .iter()
            .filter(|(_, workers)| !workers.is_empty())
            .map(|(phase, _)| *phase)
            .collect()
    }

    /// Phases that carry workers but never run any (review and terminal phases).
    pub fn misplaced_phases(&self) -> Vec<Phase> {
        self.phases()
            .into_iter()
            .filter(|p| !p.is_work_phase())
            .collect()
    }
}

impl std::fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (phase, workers) in &self.by_phase {
            map.entry(
                phase,
                &workers.iter().map(|w| w.role().to_string()).collect::<Vec<_>>(),
            );
        }
        map.finish()
    }
}
