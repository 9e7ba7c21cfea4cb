//! Configuration view and validation commands: `reqflow config`.

use anyhow::{Context, Result};
use reqflow::config::{CONFIG_DIR, ProcessConfig, ReqflowToml, config_path};
use std::path::Path;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &Path, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = config_path(project_dir);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Reqflow Configuration");
            println!("=====================");
            println!();

            let toml = if config_path.exists() {
                println!("Config file: {}", config_path.display());
                ReqflowToml::load(&config_path)?
            } else {
                println!("No reqflow.toml found at {}", config_path.display());
                println!("Using default configuration.");
                ReqflowToml::default()
            };
            println!();

            let process = &toml.process;
            println!("[process]");
            println!("  interactive_mode = {}", process.interactive_mode);
            println!("  auto_approve = {}", process.auto_approve);
            println!("  max_retry_count = {}", process.max_retry_count);
            println!("  base_backoff_delay = {}", process.base_backoff_delay);
            if let Some(secs) = process.worker_timeout_secs {
                println!("  worker_timeout_secs = {}", secs);
            }
            println!("  builtin_workers = {}", process.builtin_workers);
            println!();

            println!("[output]");
            println!("  artifact_dir = \"{}\"", toml.output.artifact_dir.display());
            println!(
                "  checkpoint_file = \"{}\"",
                toml.output.checkpoint_file.display()
            );
            println!();

            for entry in &toml.workers {
                println!("[[workers]]");
                println!("  phase = \"{}\"", entry.phase);
                println!("  role = \"{}\"", entry.command.role);
                println!("  command = \"{}\"", entry.command.command);
                if !entry.command.args.is_empty() {
                    println!("  args = {:?}", entry.command.args);
                }
                println!();
            }

            // Effective values after env overrides
            let effective = ProcessConfig::from_section(&toml.process).with_env();
            println!("Effective values (with env overrides):");
            println!("  mode = {}", effective.mode());
            println!("  auto_approve = {}", effective.auto_approve);
            println!("  max_retry_count = {}", effective.max_retry_count);
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No reqflow.toml found. Using defaults (valid).");
                return Ok(());
            }

            let toml = ReqflowToml::load(&config_path)?;
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("reqflow.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            let dir = project_dir.join(CONFIG_DIR);
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;

            ReqflowToml::default().save(&config_path)?;

            println!("Created reqflow.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [process] interactive_mode, auto_approve, max_retry_count");
            println!("  - [output] artifact_dir, checkpoint_file");
            println!("  - [[workers]] external commands attached to phases");
            println!();
        }
    }

    Ok(())
}
