//! Watch directories until interrupted

use crate::output::ConsoleHandler;
use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use watcher::{EventHandler, WatchManager, WatchStatus};

pub async fn run(paths: &[String], first_id: i32, json: bool, config: Option<&Path>) -> Result<()> {
    let config = super::load_config(config)?;
    let manager = WatchManager::new(config);
    let handler: Arc<dyn EventHandler> = Arc::new(ConsoleHandler::new(json));

    for (offset, path) in paths.iter().enumerate() {
        let id = first_id
            .checked_add(offset as i32)
            .context("Session id out of range")?;
        manager
            .start(id, path, handler.clone())
            .with_context(|| format!("Failed to watch {}", path))?;
        if !json {
            eprintln!("{} {} {}", "Watching".green(), path, format!("(session {})", id).dimmed());
        }
    }

    // Sessions end on their own when their directory becomes unreadable
    let mut liveness = tokio::time::interval(Duration::from_millis(500));
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
            info!("Interrupted, stopping all sessions");
        }
        _ = async {
            loop {
                liveness.tick().await;
                if !manager.is_active() {
                    break;
                }
            }
        } => {
            warn!("All sessions have ended");
        }
    }

    // Final counters include whatever the sessions delivered while stopping
    let statuses = tokio::task::spawn_blocking(move || manager.stop_all())
        .await
        .context("Stop task failed")?;

    if !json {
        for status in statuses {
            print_summary(&status);
        }
    }

    Ok(())
}

fn print_summary(status: &WatchStatus) {
    let stats = &status.stats;
    eprintln!(
        "{} {}: {} delivered, {} skipped, {} ignored, {} overflows",
        "Session".bold(),
        status.session_id,
        stats.delivered,
        stats.skipped,
        stats.ignored,
        stats.overflows
    );
    if let Some(err) = &status.last_error {
        eprintln!("  {} {}", "ended with:".red(), err);
    }
}
