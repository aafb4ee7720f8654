//! CronBot CLI: the main entry point.
//!
//! Commands:
//! - `init`        write the default config and create the workspace
//! - `daemon`      run the worker loop (plus the operator interface)
//! - `status`      show the persisted worker state
//! - `checkpoints` list or restore checkpoints
//! - `approvals`   review parked tool calls on a running daemon

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "cronbot",
    about = "CronBot: autonomous software development worker",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "CRONBOT_JSON_LOGS")]
    json_logs: bool,

    /// Config file (defaults to ~/.cronbot/config.toml)
    #[arg(short, long, global = true, env = "CRONBOT_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default config and create the workspace
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Run the worker until interrupted
    Daemon,

    /// Show the persisted worker state
    Status {
        /// Journal entries to show
        #[arg(short = 'n', long, default_value_t = 10)]
        journal: usize,
    },

    /// Inspect or restore checkpoints
    Checkpoints {
        #[command(subcommand)]
        action: commands::checkpoints::Action,
    },

    /// Review approvals on a running daemon
    Approvals {
        #[command(subcommand)]
        action: commands::approvals::Action,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_current_span(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Init { force } => commands::init::run(config_path, force).await?,
        Commands::Daemon => commands::daemon::run(config_path).await?,
        Commands::Status { journal } => commands::status::run(config_path, journal).await?,
        Commands::Checkpoints { action } => commands::checkpoints::run(config_path, action).await?,
        Commands::Approvals { action } => commands::approvals::run(config_path, action).await?,
    }

    Ok(())
}
