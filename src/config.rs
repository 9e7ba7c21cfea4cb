//! Configuration read from `.reqflow/reqflow.toml`.
//!
//! Settings are layered file -> environment -> CLI. The file is optional;
//! every field has a default.
//!
//! # Configuration File Format
//!
//! ```toml
//! [process]
//! interactive_mode = true
//! auto_approve = false
//! max_retry_count = 3
//! base_backoff_delay = 1.0
//! worker_timeout_secs = 300
//! builtin_workers = true
//!
//! [output]
//! artifact_dir = "outputs"
//! checkpoint_file = ".reqflow/checkpoints.jsonl"
//!
//! [[workers]]
//! phase = "data_architecture"
//! role = "schema_reviewer"
//! command = "claude"
//! args = ["--print", "--output-format", "text"]
//! timeout_secs = 600
//! ```

use crate::orchestrator::Mode;
use crate::phase::Phase;
use crate::recovery::RETRY_THRESHOLD;
use crate::worker::{CommandWorker, CommandWorkerConfig, WorkerRegistry, personas};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_DIR: &str = ".reqflow";
pub const CONFIG_FILE: &str = "reqflow.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSection {
    /// Stop for human review after gateable phases.
    #[serde(default = "default_true")]
    pub interactive_mode: bool,
    #[serde(default)]
    pub auto_approve: bool,
    #[serde(default = "default_max_retry_count")]
    pub max_retry_count: u32,
    /// Seconds; doubled on each retry.
    #[serde(default = "default_base_backoff_delay")]
    pub base_backoff_delay: f64,
    #[serde(default)]
    pub worker_timeout_secs: Option<u64>,
    /// Register the built-in persona workers before `[[workers]]`.
    #[serde(default = "default_true")]
    pub builtin_workers: bool,
}

fn default_true() -> bool {
    true
}

fn default_max_retry_count() -> u32 {
    3
}

fn default_base_backoff_delay() -> f64 {
    1.0
}

impl Default for ProcessSection {
    fn default() -> Self {
        Self {
            interactive_mode: default_true(),
            auto_approve: false,
            max_retry_count: default_max_retry_count(),
            base_backoff_delay: default_base_backoff_delay(),
            worker_timeout_secs: None,
            builtin_workers: default_true(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSection {
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,
    #[serde(default = "default_checkpoint_file")]
    pub checkpoint_file: PathBuf,
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from("outputs")
}

fn default_checkpoint_file() -> PathBuf {
    Path::new(CONFIG_DIR).join("checkpoints.jsonl")
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            artifact_dir: default_artifact_dir(),
            checkpoint_file: default_checkpoint_file(),
        }
    }
}

/// An external command worker attached to a phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerEntry {
    pub phase: Phase,
    #[serde(flatten)]
    pub command: CommandWorkerConfig,
}

/// The complete reqflow.toml structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReqflowToml {
    #[serde(default)]
    pub process: ProcessSection,
    #[serde(default)]
    pub output: OutputSection,
    #[serde(default)]
    pub workers: Vec<WorkerEntry>,
}

impl ReqflowToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse reqflow.toml")
    }

    /// Load `<project_dir>/.reqflow/reqflow.toml`, or defaults if it doesn't exist.
    pub fn load_or_default(project_dir: &Path) -> Result<Self> {
        let config_path = config_path(project_dir);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize reqflow.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let process = &self.process;

        if process.max_retry_count == 0 {
            warnings.push("max_retry_count = 0: failed phases will not be retried".to_string());
        }
        if process.max_retry_count > RETRY_THRESHOLD {
            warnings.push(format!(
                "max_retry_count {} exceeds the run-wide retry threshold ({})",
                process.max_retry_count, RETRY_THRESHOLD
            ));
        }
        if !process.base_backoff_delay.is_finite() || process.base_backoff_delay < 0.0 {
            warnings.push(format!(
                "Invalid base_backoff_delay {}: should be a non-negative number of seconds",
                process.base_backoff_delay
            ));
        }
        if process.worker_timeout_secs == Some(0) {
            warnings.push("worker_timeout_secs = 0 fails every worker call".to_string());
        }
        if !process.interactive_mode && process.auto_approve {
            warnings.push("auto_approve has no effect when interactive_mode = false".to_string());
        }

        let mut seen = HashSet::new();
        for entry in &self.workers {
            let role = &entry.command.role;
            if !entry.phase.is_work_phase() {
                warnings.push(format!(
                    "Worker '{}' is attached to {}, which does not run workers",
                    role, entry.phase
                ));
            }
            if entry.command.command.trim().is_empty() {
                warnings.push(format!("Worker '{}' has an empty command", role));
            }
            if !seen.insert((entry.phase, role.clone())) {
                warnings.push(format!(
                    "Worker '{}' is registered twice for {}",
                    role, entry.phase
                ));
            }
        }

        warnings
    }

    /// Workers for a run: built-in personas (unless disabled) then `[[workers]]`.
    pub fn build_registry(&self) -> WorkerRegistry {
        let mut registry = if self.process.builtin_workers {
            personas::default_registry()
        } else {
            WorkerRegistry::new()
        };
        for entry in &self.workers {
            registry.register(entry.phase, CommandWorker::new(entry.command.clone()));
        }
        registry
    }
}

pub fn config_path(project_dir: &Path) -> PathBuf {
    project_dir.join(CONFIG_DIR).join(CONFIG_FILE)
}

/// Resolved process-control settings handed to the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessConfig {
    pub interactive_mode: bool,
    pub auto_approve: bool,
    pub max_retry_count: u32,
    pub base_backoff_delay: Duration,
    pub worker_timeout: Option<Duration>,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self::from_section(&ProcessSection::default())
    }
}

impl ProcessConfig {
    pub fn from_section(section: &ProcessSection) -> Self {
        Self {
            interactive_mode: section.interactive_mode,
            auto_approve: section.auto_approve,
            max_retry_count: section.max_retry_count,
            base_backoff_delay: Duration::try_from_secs_f64(section.base_backoff_delay)
                .unwrap_or(Duration::from_secs(1)),
            worker_timeout: section.worker_timeout_secs.map(Duration::from_secs),
        }
    }

    /// Apply `REQFLOW_AUTO_APPROVE`, `REQFLOW_MAX_RETRIES` and `REQFLOW_INTERACTIVE`.
    pub fn with_env(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(value) = lookup("REQFLOW_AUTO_APPROVE") {
            self.auto_approve = parse_flag(&value);
        }
        if let Some(value) = lookup("REQFLOW_INTERACTIVE") {
            self.interactive_mode = parse_flag(&value);
        }
        if let Some(value) = lookup("REQFLOW_MAX_RETRIES") {
            match value.trim().parse() {
                Ok(n) => self.max_retry_count = n,
                Err(_) => tracing::warn!(value = %value, "ignoring invalid REQFLOW_MAX_RETRIES"),
            }
        }
        self
    }

    pub fn with_auto_approve(mut self, auto_approve: bool) -> Self {
        self.auto_approve = auto_approve;
        self
    }

    pub fn with_interactive_mode(mut self, interactive: bool) -> Self {
        self.interactive_mode = interactive;
        self
    }

    pub fn with_max_retry_count(mut self, max: u32) -> Self {
        self.max_retry_count = max;
        self
    }

    pub fn with_base_backoff_delay(mut self, delay: Duration) -> Self {
        self.base_backoff_delay = delay;
        self
    }

    pub fn with_worker_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.worker_timeout = timeout;
        self
    }

    pub fn mode(&self) -> Mode {
        if self.interactive_mode {
            Mode::Gated
        } else {
            Mode::Linear
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
