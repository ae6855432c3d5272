//! taskpod CLI - Main entry point

mod cli;

use clap::{Parser, Subcommand};
use std::sync::Arc;
use taskpod_foundation::TaskpodConfig;
use taskpod_task::{JsonTaskRepository, LocalExecutor, SandboxExecutor, TaskOrchestrator};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// taskpod - register shell tasks and run them on the host or in a cluster pod
#[derive(Parser, Debug)]
#[command(name = "taskpod")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List every task
    List,
    /// Show one task with its execution history
    Get { id: String },
    /// Search tasks by name or owner (case-insensitive substring)
    Search {
        #[arg(long, conflicts_with = "owner", required_unless_present = "owner")]
        name: Option<String>,

        #[arg(long)]
        owner: Option<String>,
    },
    /// Create or replace a task
    Save {
        /// Task id; generated when omitted
        #[arg(long)]
        id: Option<String>,

        #[arg(long)]
        name: String,

        #[arg(long)]
        owner: String,

        /// Shell command to run
        #[arg(long)]
        command: String,
    },
    /// Delete a task
    Delete { id: String },
    /// Run a task's command and record the execution
    Execute { id: String },
    /// Load sample tasks into an empty store
    Seed,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging (stderr, stdout carries JSON)
    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = TaskpodConfig::load()?;
    let repository = Arc::new(JsonTaskRepository::open(config.data_store()?)?);

    // Only execution needs a cluster connection
    let sandbox = if matches!(args.command, Command::Execute { .. }) {
        SandboxExecutor::connect(&config.sandbox).await
    } else {
        SandboxExecutor::disabled(&config.sandbox, "not needed for this command")
    };

    let orchestrator = TaskOrchestrator::new(
        repository,
        Arc::new(sandbox),
        Arc::new(LocalExecutor::new()),
    );

    cli::run(&orchestrator, args.command).await
}
