use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use reqflow::logging::{LogFormat, init_tracing};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "reqflow")]
#[command(version, about = "Drive expert workers through gated, versioned requirement phases")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log line format written to stderr (or --log-file)
    #[arg(long, value_enum, default_value_t = LogFormat::Compact, global = true)]
    pub log_format: LogFormat,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the requirement process for a project brief
    Run(RunArgs),
    /// Print the phase plan and the workers attached to each phase
    Phases {
        /// Show the plan without review gates
        #[arg(long)]
        linear: bool,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// List emergency snapshots written by failed runs
    Checkpoints {
        /// Delete all stored snapshots
        #[arg(long)]
        clear: bool,
    },
}

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Project brief (.json, .yaml or .yml)
    #[arg(short, long)]
    pub input: PathBuf,

    /// Skip review gates
    #[arg(long)]
    pub linear: bool,

    /// Approve every review without asking
    #[arg(long)]
    pub auto_approve: bool,

    /// Retry and revision budget per phase
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Base backoff delay in seconds, doubled on each retry
    #[arg(long)]
    pub backoff: Option<f64>,

    /// Per-worker timeout in seconds
    #[arg(long)]
    pub worker_timeout: Option<u64>,

    /// Read review answers from this file, one per line, instead of prompting
    #[arg(long)]
    pub answers: Option<PathBuf>,

    /// Directory for the final artifact (overrides [output] artifact_dir)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default reqflow.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.verbose, cli.log_format, cli.log_file.as_deref())?;

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Run(args) => cmd::cmd_run(&cli, &project_dir, args).await?,
        Commands::Phases { linear } => cmd::cmd_phases(&project_dir, *linear)?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
        Commands::Checkpoints { clear } => cmd::cmd_checkpoints(&project_dir, *clear)?,
    }

    Ok(())
}
