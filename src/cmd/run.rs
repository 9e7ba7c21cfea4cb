//! Run the requirement process: `reqflow run`.

use anyhow::{Context, Result, bail};
use console::style;
use reqflow::checkpoint::FileCheckpointStore;
use reqflow::config::{ProcessConfig, ReqflowToml};
use reqflow::orchestrator::{PhaseOrchestrator, TransitionTable};
use reqflow::review::{ConsoleReviewChannel, ReviewChannel, ScriptedReviewChannel};
use reqflow::sink::JsonArtifactSink;
use reqflow::ui::{RunUI, print_summary};
use reqflow::worker::DomainInput;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::super::{Cli, RunArgs};

/// Layer CLI flags over the file and environment settings.
pub fn resolve_config(toml: &ReqflowToml, args: &RunArgs) -> Result<ProcessConfig> {
    let mut config = ProcessConfig::from_section(&toml.process).with_env();

    if args.linear {
        config = config.with_interactive_mode(false);
    }
    if args.auto_approve {
        config = config.with_auto_approve(true);
    }
    if let Some(max) = args.max_retries {
        config = config.with_max_retry_count(max);
    }
    if let Some(secs) = args.backoff {
        let delay = Duration::try_from_secs_f64(secs)
            .with_context(|| format!("Invalid --backoff {}: expected non-negative seconds", secs))?;
        config = config.with_base_backoff_delay(delay);
    }
    if let Some(secs) = args.worker_timeout {
        config = config.with_worker_timeout(Some(Duration::from_secs(secs)));
    }

    Ok(config)
}

pub async fn cmd_run(cli: &Cli, project_dir: &Path, args: &RunArgs) -> Result<()> {
    let toml = ReqflowToml::load_or_default(project_dir)?;
    for warning in toml.validate() {
        tracing::warn!(%warning, "configuration warning");
    }

    let config = resolve_config(&toml, args)?;
    let input = DomainInput::load(&args.input)?;
    let registry = toml.build_registry();
    if registry.is_empty() {
        println!(
            "{} no workers registered; phases will complete without outputs",
            style("warning:").yellow()
        );
    }

    let review_channel: Arc<dyn ReviewChannel> = match args.answers {
        Some(ref path) => Arc::new(ScriptedReviewChannel::from_file(path)?),
        None => Arc::new(ConsoleReviewChannel),
    };

    let artifact_dir = match args.output {
        Some(ref dir) => dir.clone(),
        None => project_dir.join(&toml.output.artifact_dir),
    };
    let checkpoints = FileCheckpointStore::new(project_dir.join(&toml.output.checkpoint_file));

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, stopping after the current step");
                cancel.cancel();
            }
        })
    };

    let plan_len = TransitionTable::new(config.mode())?.plan().len().saturating_sub(1);
    let (tx, rx) = mpsc::channel(64);
    let ui = RunUI::new(plan_len as u64, cli.verbose).spawn(rx);

    let orchestrator = PhaseOrchestrator::new(config, registry)?
        .with_review_channel(review_channel)
        .with_checkpoint_store(Arc::new(checkpoints))
        .with_artifact_sink(Arc::new(JsonArtifactSink::new(artifact_dir.clone())))
        .with_cancellation(cancel)
        .with_event_channel(tx);

    let result = orchestrator.run(input).await;
    let report = orchestrator.error_handler().generate_error_report(&result.state);
    let suggestions = orchestrator.error_handler().suggest_recovery_action(&result.state);
    // Closes the event channel so the UI task drains and exits.
    drop(orchestrator);
    ui.await.ok();
    ctrl_c.abort();

    print_summary(&result);

    if result.is_complete() {
        println!(
            "  {} {}",
            style("Artifact:").dim(),
            artifact_dir.display()
        );
        println!();
        return Ok(());
    }

    if result.is_failed() {
        println!();
        println!("{}", report);
        if !suggestions.is_empty() {
            println!("Suggested recovery:");
            for (key, action) in &suggestions {
                println!("  {}: {}", style(key).bold(), action);
            }
        }
        println!();
    }

    match result.failure {
        Some(err) => Err(err).context("Requirement process did not complete"),
        None => bail!(
            "Requirement process stopped at {}",
            result.state.current_phase()
        ),
    }
}
