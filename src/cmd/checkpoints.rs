//! Emergency snapshot listing: `reqflow checkpoints`.

use anyhow::Result;
use console::style;
use reqflow::checkpoint::{CheckpointStore, FileCheckpointStore};
use reqflow::config::ReqflowToml;
use std::path::Path;

pub fn cmd_checkpoints(project_dir: &Path, clear: bool) -> Result<()> {
    let toml = ReqflowToml::load_or_default(project_dir)?;
    let store = FileCheckpointStore::new(project_dir.join(&toml.output.checkpoint_file));

    if clear {
        store.reset()?;
        println!("Cleared checkpoints at {}", store.path().display());
        return Ok(());
    }

    let entries = store.entries()?;
    if entries.is_empty() {
        println!("No checkpoints recorded.");
        return Ok(());
    }

    println!();
    for snapshot in &entries {
        println!(
            "{} run {} at {} (v{})",
            style(snapshot.timestamp.format("%Y-%m-%d %H:%M:%S")).dim(),
            snapshot.run_id,
            style(snapshot.current_phase).yellow(),
            snapshot.document_version
        );
        if let Some(phase) = snapshot.last_error_phase {
            println!("    last error phase: {}", phase);
        }
        if let Some(last) = snapshot.errors.last() {
            println!("    {}", style(last).red());
        }
        let retries: Vec<String> = snapshot
            .retry_attempts
            .iter()
            .filter(|(_, n)| **n > 0)
            .map(|(phase, n)| format!("{phase}={n}"))
            .collect();
        if !retries.is_empty() {
            println!("    retries: {}", retries.join(", "));
        }
    }
    println!();
    println!("{} checkpoint(s) in {}", entries.len(), store.path().display());

    Ok(())
}
