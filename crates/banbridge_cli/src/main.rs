//! BanBridge CLI
//!
//! Operator tools for a server connected to the BanBridge backend.
//!
//! # Commands
//!
//! - `health` - Probe the backend once
//! - `sync-bans` - Fetch and apply one ban change feed
//! - `inspect` - Display the persisted ban cache
//! - `run` - Drive the bridge headless until Ctrl-C

mod commands;

use banbridge_engine::BridgeConfig;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// BanBridge command-line tools.
#[derive(Parser)]
#[command(name = "banbridge")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(global = true, short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe the backend health endpoint
    Health,

    /// Fetch one ban change feed, apply it and save the cache
    SyncBans,

    /// Display the persisted ban cache
    Inspect {
        /// Show every cached ban
        #[arg(short, long)]
        entries: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Run all periodic triggers against a headless host until Ctrl-C
    Run {
        /// Player capacity reported in metrics
        #[arg(long, default_value = "0")]
        max_players: i64,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match &cli.config {
        Some(path) => BridgeConfig::from_json_file(path)?,
        None => BridgeConfig::default().normalized(),
    };

    match cli.command {
        Commands::Health => commands::health::run(&config).await?,
        Commands::SyncBans => commands::sync_bans::run(config).await?,
        Commands::Inspect { entries, format } => {
            commands::inspect::run(&config.ban_cache_path(), entries, &format)?
        }
        Commands::Run { max_players } => commands::run::run(config, max_players).await?,
        Commands::Version => {
            println!("BanBridge CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
