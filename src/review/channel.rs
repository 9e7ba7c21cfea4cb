//! Where raw reviewer input comes from.

use crate::phase::Phase;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use dialoguer::{Input, theme::ColorfulTheme};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;

/// Supplies the human half of a review gate.
///
/// The orchestrator awaits this between phases; the run's state is consistent
/// (with `pending_review` set) for as long as the call is outstanding.
#[async_trait]
pub trait ReviewChannel: Send + Sync {
    async fn request_decision(&self, phase: Phase, presentation: &str) -> Result<String>;
}

/// Prints the presentation and prompts on the terminal.
#[derive(Debug, Clone, Default)]
pub struct ConsoleReviewChannel;

#[async_trait]
impl ReviewChannel for ConsoleReviewChannel {
    async fn request_decision(&self, phase: Phase, presentation: &str) -> Result<String> {
        println!("{presentation}");
        let prompt = format!("Decision for {}", phase.display_name());
        tokio::task::spawn_blocking(move || {
            Input::<String>::with_theme(&ColorfulTheme::default())
                .with_prompt(prompt)
                .allow_empty(true)
                .interact_text()
                .context("Failed to read review decision")
        })
        .await
        .context("Review prompt task panicked")?
    }
}

/// Replays canned answers in order. Used for non-interactive runs and tests.
#[derive(Debug, Default)]
pub struct ScriptedReviewChannel {
    answers: Mutex<VecDeque<String>>,
    repeat_last: bool,
    seen: Mutex<Vec<(Phase, String)>>,
}

impl ScriptedReviewChannel {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            repeat_last: false,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// A channel that gives the same answer forever.
    pub fn repeating(answer: &str) -> Self {
        Self {
            repeat_last: true,
            ..Self::new([answer])
        }
    }

    /// One answer per non-empty line; `;` separates `item: comment` entries
    /// within an answer.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read answers file: {}", path.display()))?;
        Ok(Self::new(
            content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string),
        ))
    }

    /// Phases asked so far, with the presentation shown for each.
    pub fn seen(&self) -> Vec<(Phase, String)> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.answers.lock().map(|a| a.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ReviewChannel for ScriptedReviewChannel {
    async fn request_decision(&self, phase: Phase, presentation: &str) -> Result<String> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push((phase, presentation.to_string()));
        }
        let mut answers = self
            .answers
            .lock()
            .map_err(|e| anyhow::anyhow!("Answer queue lock poisoned: {}", e))?;

        let answer = if self.repeat_last && answers.len() == 1 {
            answers.front().cloned()
        } else {
            answers.pop_front()
        };
        match answer {
            Some(a) => Ok(a),
            None => bail!("No scripted answer left for {}", phase),
        }
    }
}
