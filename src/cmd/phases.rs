//! Phase plan listing: `reqflow phases`.

use anyhow::Result;
use console::style;
use reqflow::config::ReqflowToml;
use reqflow::orchestrator::{Mode, Outcome, TransitionTable};
use std::path::Path;

pub fn cmd_phases(project_dir: &Path, linear: bool) -> Result<()> {
    let toml = ReqflowToml::load_or_default(project_dir)?;
    let mode = if linear || !toml.process.interactive_mode {
        Mode::Linear
    } else {
        Mode::Gated
    };
    let table = TransitionTable::new(mode)?;
    let registry = toml.build_registry();

    println!();
    println!("Phase plan ({} mode)", style(mode).cyan());
    println!();

    for (index, phase) in table.plan().into_iter().enumerate() {
        let workers = registry.roles(phase);
        let detail = if phase.is_review() {
            let back = table.next(phase, Outcome::RevisionRequested)?;
            format!("revise -> {}", back)
        } else if workers.is_empty() {
            String::new()
        } else {
            workers.join(", ")
        };

        println!(
            "  {:>2}. {:<30} {}",
            index + 1,
            style(phase.as_str()).yellow(),
            style(detail).dim()
        );
    }
    println!();

    Ok(())
}
