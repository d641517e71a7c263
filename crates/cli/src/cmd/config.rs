//! Print the effective watch configuration

use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use std::path::Path;

pub fn run(path: Option<&Path>) -> Result<()> {
    let config = super::load_config(path)?;
    let rendered = toml::to_string_pretty(&config).context("Failed to render configuration")?;

    match path {
        Some(path) => eprintln!("{}: {}", "Source".dimmed(), path.display().dimmed()),
        None => eprintln!("{}", "Source: built-in defaults".dimmed()),
    }
    print!("{}", rendered);

    Ok(())
}
