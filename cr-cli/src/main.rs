//! Tracking monitor - command-line client for the Chaos Route tracking stream.
//!
//! Connects to the backend's push endpoint and prints live GPS updates, stop
//! events and alerts as they arrive. Useful for debugging a deployment
//! without the web supervisor UI.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;

use cr_core::config::AppConfig;
use cr_core::constants::{APP_NAME, APP_VERSION};
use cr_core::error::CrResult;
use cr_core::logging;

/// Chaos Route tracking monitor.
#[derive(Parser)]
#[command(
    name = "tracking-monitor",
    version,
    about = "Watch the Chaos Route live tracking stream",
    long_about = "A command-line client for the Chaos Route tracking endpoint.\n\
                  Connects with a bearer token and prints every pushed event."
)]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (text, json).
    #[arg(short = 'f', long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    Text,
    /// One JSON object per line, for scripting.
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and print tracking events until Ctrl+C.
    Watch {
        /// Backend address (overrides config).
        #[arg(short, long)]
        address: Option<String>,
        /// Bearer token (overrides CHAOS_ROUTE_TOKEN and config).
        #[arg(short, long)]
        token: Option<String>,
        /// Only print these event types (repeatable). Defaults to all.
        #[arg(short, long = "event")]
        events: Vec<String>,
        /// Save the address to the config file once connected.
        #[arg(long)]
        save: bool,
    },
    /// Print the resolved tracking endpoint.
    Endpoint {
        /// Backend address (overrides config).
        #[arg(short, long)]
        address: Option<String>,
    },
}

#[tokio::main]
async fn main() -> CrResult<()> {
    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => AppConfig::default_config_path()?,
    };
    let config = AppConfig::load_or_default(&config_path)?;

    let log_dir = config
        .effective_log_dir()
        .unwrap_or_else(|_| PathBuf::from("logs"));
    let level_override = cli.verbose.then_some("debug");
    let _guard = logging::init_from_config(&config.logging, &log_dir, level_override)?;

    info!("{} v{}", APP_NAME, APP_VERSION);

    match cli.command {
        Commands::Watch { address, token, events, save } => {
            let options = commands::watch::WatchOptions {
                address,
                token,
                events,
                save: save.then_some(config_path),
            };
            commands::watch::run(config, options, cli.format).await
        }
        Commands::Endpoint { address } => commands::endpoint::run(&config, address, cli.format),
    }
}
