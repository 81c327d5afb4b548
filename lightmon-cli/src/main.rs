//! # lightmon
//!
//! Distributed light-integrity tester.
//!
//! ## Commands
//!
//! - `init`: Write a starting `lightmon.toml`
//! - `node`: Run a sensor node
//! - `coordinator`: Run the coordinator with an interactive console
//!
//! ## Example
//!
//! ```bash
//! # On each sensor device
//! lightmon init --address 5
//! lightmon node
//!
//! # On the coordinator
//! lightmon init --address 1
//! lightmon coordinator
//! > add-node 5
//! > start 60
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{coordinator, init, node};
use config::{Config, CONFIG_FILE_NAME};

/// Distributed light-integrity tester.
#[derive(Parser, Debug)]
#[command(name = "lightmon")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Data directory for the config and the result log
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Config file (default: <data-dir>/lightmon.toml)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a starting config file
    Init {
        /// Mesh address of this device
        #[arg(long, short)]
        address: Option<u16>,

        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// Run a sensor node until Ctrl+C
    Node,

    /// Run the coordinator, reading commands from stdin
    Coordinator {
        /// Print reports as JSON lines
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };
    let config_path = cli
        .config
        .unwrap_or_else(|| data_dir.join(CONFIG_FILE_NAME));

    match cli.command {
        Commands::Init { address, force } => {
            init::run(&config_path, address, force).await?;
        }
        Commands::Node => {
            let config = load_config(&config_path)?;
            let data_dir = config.node.data_dir.clone().unwrap_or(data_dir);
            node::run(&config, &data_dir).await?;
        }
        Commands::Coordinator { json } => {
            let config = load_config(&config_path)?;
            coordinator::run(&config, json).await?;
        }
    }

    Ok(())
}

/// Configure the global subscriber.
///
/// `RUST_LOG` is only consulted without `-v`.
fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Load the config, falling back to defaults when the file is absent.
fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        tracing::warn!(path = %path.display(), "no config file, using defaults");
        return Ok(Config::default());
    }
    Config::from_file(path).context("Failed to load config")
}

/// Get the default data directory for lightmon.
fn default_data_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("io", "ydun", "lightmon")
        .context("Could not determine home directory")?;
    Ok(dirs.data_dir().to_path_buf())
}
