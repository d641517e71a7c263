//! Event printing

use owo_colors::OwoColorize;
use std::io::Write;
use watcher::{ActionTag, EventHandler, NormalizedEvent};

/// Prints each event to stdout, as a colored line or a JSON line
pub struct ConsoleHandler {
    json: bool,
}

impl ConsoleHandler {
    pub fn new(json: bool) -> Self {
        Self { json }
    }
}

impl EventHandler for ConsoleHandler {
    fn on_event(&self, event: &NormalizedEvent) -> anyhow::Result<()> {
        let line = if self.json {
            serde_json::to_string(event)?
        } else {
            format_line(event)
        };

        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", line)?;
        stdout.flush()?;
        Ok(())
    }
}

fn format_line(event: &NormalizedEvent) -> String {
    let tag = format!("{:<10}", event.action.as_str());
    let tag = match event.action {
        ActionTag::Create => tag.green().to_string(),
        ActionTag::Modify => tag.yellow().to_string(),
        ActionTag::Delete => tag.red().to_string(),
        ActionTag::Rename | ActionTag::RenameOld | ActionTag::RenameNew => tag.cyan().to_string(),
        ActionTag::Unknown => tag.dimmed().to_string(),
    };

    let mut line = format!(
        "{} {} {} {}",
        event.timestamp.dimmed(),
        format!("[{}]", event.session_id).dimmed(),
        tag,
        event.path
    );
    if let Some(old_path) = &event.old_path {
        line.push_str(&format!(" {} {}", "<-".dimmed(), old_path));
    }
    if event.size > 0 {
        line.push_str(&format!(" {}", format!("({} bytes)", event.size).dimmed()));
    }
    line
}
