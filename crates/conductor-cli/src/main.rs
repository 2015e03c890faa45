mod agents_cmd;
mod config;
mod run_cmd;
mod validate_cmd;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "conductor", about = "Runs declarative plans of LLM coding tasks with QC review")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a plan: waves, QC review, retries, final report
    Run {
        /// Path to the plan file (.md, .yaml, or .yml)
        plan: PathBuf,
        /// Per-wave concurrency cap (0 = unlimited)
        #[arg(long)]
        max_concurrency: Option<usize>,
        /// Directory scanned for agent definitions
        #[arg(long)]
        agents_dir: Option<PathBuf>,
        /// Executor binary name or path
        #[arg(long)]
        executor: Option<String>,
        /// Wall-time limit per task invocation, in seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Directory receiving run logs
        #[arg(long)]
        log_dir: Option<PathBuf>,
        /// Skip the QC review stage entirely
        #[arg(long)]
        no_qc: bool,
        /// Suppress per-event console output (file logs still written)
        #[arg(long)]
        quiet: bool,
    },
    /// Parse and validate a plan without spawning anything
    Validate {
        /// Path to the plan file
        plan: PathBuf,
        /// Directory scanned for agent definitions
        #[arg(long)]
        agents_dir: Option<PathBuf>,
    },
    /// List discovered agent definitions
    Agents {
        /// Directory scanned for agent definitions
        #[arg(long)]
        agents_dir: Option<PathBuf>,
    },
    /// Write a default config file at ~/.config/conductor/config.toml
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            plan,
            max_concurrency,
            agents_dir,
            executor,
            timeout,
            log_dir,
            no_qc,
            quiet,
        } => {
            let overrides = config::Overrides {
                executor_binary: executor,
                timeout_secs: timeout,
                max_concurrency,
                agents_dir,
                log_dir,
            };
            run_cmd::run(&plan, overrides, no_qc, quiet).await
        }
        Commands::Validate { plan, agents_dir } => validate_cmd::run(&plan, agents_dir),
        Commands::Agents { agents_dir } => agents_cmd::run(agents_dir),
        Commands::Init { force } => {
            let path = config::write_default_config(force)?;
            println!("Wrote {}", path.display());
            Ok(())
        }
    }
}
