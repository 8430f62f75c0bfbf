//! # outbox
//!
//! CLI tool for inspecting and draining an offline outbox.
//!
//! ## Commands
//!
//! - `enqueue`: Queue a chat message or control command
//! - `sync`: Drain the queue once
//! - `status`: Show queue and capability stats
//! - `retry-failed`: Give failed messages a fresh set of attempts
//! - `clear`: Discard every queued message
//!
//! ## Example
//!
//! ```bash
//! # Queue while offline
//! outbox --offline enqueue "agendar revisão"
//!
//! # Deliver against the configured endpoint
//! outbox sync
//!
//! # Inspect
//! outbox status --json
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{clear, enqueue, retry, status, sync};
use config::CliOptions;

/// CLI tool for inspecting and draining an offline outbox.
#[derive(Parser, Debug)]
#[command(name = "outbox")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (TOML); defaults to outbox.toml in the data directory
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory holding the outbox store
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Use mock transport that acknowledges everything (for testing/demo)
    #[arg(long, global = true)]
    mock: bool,

    /// Behave as if the network were down
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Queue a message for delivery
    Enqueue {
        /// Message text (or command name with --command)
        text: String,

        /// Message id (generated if omitted)
        #[arg(long)]
        id: Option<String>,

        /// Queue a control command instead of a chat message
        #[arg(long)]
        command: bool,
    },

    /// Drain the queue once and print the summary
    Sync,

    /// Show queue and capability stats
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Reset failed messages and drain
    RetryFailed,

    /// Discard every queued message
    Clear {
        /// Confirm discarding
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let options = CliOptions {
        config: cli.config,
        data_dir: cli.data_dir,
        mock: cli.mock,
        offline: cli.offline,
    };
    let context = config::open_context(&options).await?;

    let result = match cli.command {
        Commands::Enqueue { text, id, command } => {
            enqueue::run(&context, &text, id.as_deref(), command).await
        }
        Commands::Sync => sync::run(&context).await,
        Commands::Status { json } => status::run(&context, json).await,
        Commands::RetryFailed => retry::run(&context).await,
        Commands::Clear { yes } => clear::run(&context, yes).await,
    };

    context.stop().await;
    result
}
