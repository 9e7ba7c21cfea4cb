//! Worker backed by an external command.
//!
//! The command receives a JSON request on stdin and must print a
//! [`WorkerOutput`] as JSON on stdout, either raw or inside a fenced code block.

use crate::errors::WorkerError;
use crate::worker::{DomainInput, Worker, WorkerOutput};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandWorkerConfig {
    pub role: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Kill the process after this many seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl CommandWorkerConfig {
    pub fn new(role: &str, command: &str) -> Self {
        Self {
            role: role.to_string(),
            command: command.to_string(),
            args: Vec::new(),
            working_dir: None,
            timeout_secs: None,
        }
    }

    pub fn with_args(mut self, args: &[&str]) -> Self {
        self.args = args.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = Some(dir);
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }
}

#[derive(Serialize)]
struct WorkerRequest<'a> {
    role: &'a str,
    input: &'a DomainInput,
    prior: &'a [WorkerOutput],
}

#[derive(Debug, Clone)]
pub struct CommandWorker {
    config: CommandWorkerConfig,
}

impl CommandWorker {
    pub fn new(config: CommandWorkerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CommandWorkerConfig {
        &self.config
    }

    fn fail(&self, message: impl Into<String>) -> WorkerError {
        WorkerError::failed(&self.config.role, message)
    }

    /// Run the process to completion. The request is fed from its own task
    /// while stdout and stderr drain together, so neither side of the pipe
    /// can stall the other.
    async fn run_process(&self, request: Vec<u8>) -> Result<String, WorkerError> {
        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref dir) = self.config.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| self.fail(format!("failed to spawn {}: {e}", self.config.command)))?;

        let writer = child.stdin.take().map(|mut stdin| {
            let role = self.config.role.clone();
            tokio::spawn(async move {
                // A child that exits without reading stdin closes the pipe early.
                if let Err(e) = stdin.write_all(&request).await {
                    tracing::debug!(%role, error = %e, "worker closed stdin before reading the request");
                    return;
                }
                stdin.shutdown().await.ok();
            })
        });

        let output = child.wait_with_output().await;
        if let Some(writer) = writer {
            writer.abort();
        }
        let output =
            output.map_err(|e| self.fail(format!("failed to wait for process: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(self.fail(format!(
                "process exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        String::from_utf8(output.stdout)
            .map_err(|e| self.fail(format!("worker output is not UTF-8: {e}")))
    }
}

#[async_trait]
impl Worker for CommandWorker {
    fn role(&self) -> &str {
        &self.config.role
    }

    async fn execute(
        &self,
        input: &DomainInput,
        prior: &[WorkerOutput],
    ) -> Result<WorkerOutput, WorkerError> {
        let request = serde_json::to_vec(&WorkerRequest {
            role: &self.config.role,
            input,
            prior,
        })
        .map_err(|e| self.fail(format!("failed to encode request: {e}")))?;

        tracing::debug!(role = %self.config.role, command = %self.config.command, "spawning worker process");

        let stdout = match self.config.timeout_secs {
            Some(secs) => {
                let limit = Duration::from_secs(secs);
                tokio::time::timeout(limit, self.run_process(request))
                    .await
                    .map_err(|_| WorkerError::TimedOut {
                        role: self.config.role.clone(),
                        timeout: limit,
                    })??
            }
            None => self.run_process(request).await?,
        };

        let json = extract_json(&stdout)
            .ok_or_else(|| self.fail("no JSON object found in worker output"))?;
        let mut output: WorkerOutput = serde_json::from_str(&json)
            .map_err(|e| self.fail(format!("malformed worker output: {e}")))?;
        if output.role.is_empty() {
            output.role = self.config.role.clone();
        }
        Ok(output)
    }
}

/// Pull the first JSON object out of free-form process output.
fn extract_json(output: &str) -> Option<String> {
    if let Some(start) = output.find("```json") {
        let after_marker = &output[start + 7..];
        if let Some(end) = after_marker.find("```") {
            return Some(after_marker[..end].trim().to_string());
        }
    }

    if let Some(start) = output.find("```") {
        let after_marker = &output[start + 3..];
        if let Some(end) = after_marker.find("```")
            && let Some(json_start) = after_marker[..end].find('{')
        {
            return Some(after_marker[json_start..end].trim().to_string());
        }
    }

    let start = output.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in output[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(output[start..start + i + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}
