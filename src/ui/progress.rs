use crate::orchestrator::{Outcome, ProcessEvent, RunResult};
use crate::phase::Phase;
use crate::review::ReviewDecision;
use crate::ui::icons::{BLOCKER, CHECK, CLOCK, CROSS, PIVOT, REVIEW, RUNNING, SPARKLE, STOP};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Terminal UI for a run, rendered via `indicatif` progress bars.
///
/// Two bars are stacked vertically:
/// - Phase bar, counting phases that completed
/// - Status bar, a spinner naming what the run is doing right now
pub struct RunUI {
    multi: MultiProgress,
    phase_bar: ProgressBar,
    status_bar: ProgressBar,
    verbose: bool,
}

impl RunUI {
    /// Create the UI sized for `total_phases` on the happy path.
    pub fn new(total_phases: u64, verbose: bool) -> Self {
        let multi = MultiProgress::new();

        let phase_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓▒░");

        let phase_bar = multi.add(ProgressBar::new(total_phases));
        phase_bar.set_style(phase_style);
        phase_bar.set_prefix("Phases");

        let status_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());

        let status_bar = multi.add(ProgressBar::new_spinner());
        status_bar.set_style(status_style);
        status_bar.set_prefix("Status");

        Self {
            multi,
            phase_bar,
            status_bar,
            verbose,
        }
    }

    /// Print a line above the bars, falling back to stderr when the terminal is gone.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    /// Consume events until the sender side closes.
    pub fn spawn(self, mut rx: mpsc::Receiver<ProcessEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                self.handle(&event);
            }
        })
    }

    pub fn handle(&self, event: &ProcessEvent) {
        match event {
            ProcessEvent::RunStarted { run_id, mode, phase } => {
                self.print_line(format!(
                    "{} Run {} ({} mode) starting at {}",
                    RUNNING,
                    style(run_id).dim(),
                    style(mode).cyan(),
                    style(phase.display_name()).yellow()
                ));
            }
            ProcessEvent::PhaseStarted { phase } => {
                self.phase_bar
                    .set_message(style(phase.display_name()).yellow().to_string());
                self.status_bar
                    .set_message(format!("Running {}", style(phase).cyan()));
                self.status_bar.enable_steady_tick(Duration::from_millis(100));
            }
            ProcessEvent::PhaseCompleted { phase, outputs } => {
                self.phase_bar.inc(1);
                self.print_line(format!(
                    "{} {} ({} outputs)",
                    CHECK,
                    style(phase.display_name()).green(),
                    outputs
                ));
            }
            ProcessEvent::DependencyMissing { phase, missing } => {
                self.print_line(format!(
                    "{} {} needs {}, going back",
                    BLOCKER,
                    style(phase).yellow(),
                    style(missing).yellow().bold()
                ));
            }
            ProcessEvent::ReviewRequested { phase, version } => {
                // The review channel owns the terminal until a decision arrives.
                self.status_bar.disable_steady_tick();
                self.status_bar.set_message(format!(
                    "{}Waiting for review of {} (v{})",
                    REVIEW,
                    style(phase.display_name()).cyan(),
                    version
                ));
            }
            ProcessEvent::ReviewDecided { phase, decision } => {
                let label = match decision {
                    ReviewDecision::Approve => style("approved").green(),
                    ReviewDecision::RequestRevision => style("revision requested").yellow(),
                    ReviewDecision::Reject => style("rejected").red(),
                };
                self.phase_bar.inc(1);
                self.print_line(format!("{}{}: {}", REVIEW, phase.display_name(), label));
            }
            ProcessEvent::VersionBumped { version, phase } => {
                self.print_line(format!(
                    "{}Document v{} after {} revision",
                    PIVOT,
                    style(version).bold(),
                    phase
                ));
            }
            ProcessEvent::Transition { from, outcome, to } => {
                if *outcome == Outcome::RevisionRequested {
                    // The reviewed phase and its review run again.
                    self.phase_bar.set_length(self.phase_bar.length().unwrap_or(0) + 2);
                }
                if self.verbose {
                    self.print_line(format!(
                        "    {} {} --{}--> {}",
                        style("→").dim(),
                        style(from).dim(),
                        style(outcome).dim(),
                        style(to).dim()
                    ));
                }
            }
            ProcessEvent::RunFinished { phase, success, errors } => {
                if *success {
                    self.phase_bar.finish_with_message(style("done").green().to_string());
                    self.status_bar.finish_and_clear();
                } else {
                    self.phase_bar.abandon();
                    self.status_bar.abandon_with_message(format!(
                        "Stopped at {} with {} errors",
                        style(phase).red(),
                        errors
                    ));
                }
            }
        }
    }
}

/// Print the closing summary for a finished run.
pub fn print_summary(result: &RunResult) {
    let state = &result.state;
    println!();
    match state.current_phase() {
        Phase::Complete => println!(
            "{}{}",
            SPARKLE,
            style("Requirement definition complete!").green().bold()
        ),
        Phase::Failed => println!("{}{}", CROSS, style("Run failed").red().bold()),
        phase => println!(
            "{}{} at {}",
            STOP,
            style("Run stopped").yellow().bold(),
            phase
        ),
    }
    if let Some(ref failure) = result.failure {
        println!("  {} {}", style("Reason:").dim(), failure);
    }
    println!("  {} {}", style("Run:").dim(), state.run_id());
    println!(
        "  {} v{} ({} revisions)",
        style("Version:").dim(),
        state.document_version(),
        state.revision_count()
    );
    for entry in state.version_history() {
        println!("    {}", entry);
    }
    println!(
        "  {} {}/{}",
        style("Phases:").dim(),
        state.completed_phases().len(),
        Phase::WORK_PHASES.len() + 2
    );
    println!(
        "  {}{:.1}s",
        CLOCK,
        result.duration.as_secs_f64()
    );
}
