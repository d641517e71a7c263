//! dirwatch - watch directories and print change events

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

mod cmd;
mod output;

/// dirwatch - Directory change notifications, normalized
#[derive(Parser)]
#[command(name = "dirwatch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch one or more directories until Ctrl-C
    Watch {
        /// Directories to watch
        #[arg(required = true)]
        paths: Vec<String>,

        /// Session id of the first directory; later ones count up from it
        #[arg(long, default_value = "1")]
        id: i32,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,

        /// Configuration file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the effective configuration
    Config {
        /// Configuration file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_file.as_deref())?;

    match cli.command {
        Commands::Watch { paths, id, json, config } => {
            cmd::watch::run(&paths, id, json, config.as_deref()).await
        }
        Commands::Config { config } => cmd::config::run(config.as_deref()),
    }
}

/// Install the subscriber; the guard flushes file logs when dropped
fn init_tracing(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            Ok(None)
        }
    }
}
