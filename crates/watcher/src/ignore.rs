//! Ignore rules for watched entries
//!
//! Sources, all optional:
//! 1. Built-in temporary-file patterns (`skip_temporary`)
//! 2. `.dwignore` at the watched root (gitignore syntax)
//! 3. Config-based patterns (gitignore syntax)
//!
//! Names are matched relative to the watched root. Directories are matched
//! by their current state on disk, so a deleted directory is matched as a
//! file.

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the per-directory ignore file
pub const IGNORE_FILE: &str = ".dwignore";

/// Ignore rule set for one watched root
#[derive(Debug)]
pub struct IgnoreRules {
    /// Watched root directory
    root: PathBuf,

    /// `.dwignore` patterns
    ignore_file: Option<Gitignore>,

    /// Patterns from config
    patterns: Option<Gitignore>,

    /// Configuration
    config: IgnoreConfig,
}

impl IgnoreRules {
    /// Load ignore rules for a watched root
    pub fn load(root: &Path, config: IgnoreConfig) -> anyhow::Result<Self> {
        let mut rules = Self {
            root: root.to_path_buf(),
            ignore_file: None,
            patterns: None,
            config,
        };

        rules.reload()?;
        Ok(rules)
    }

    /// Rebuild both pattern sets from disk and config
    pub fn reload(&mut self) -> anyhow::Result<()> {
        self.ignore_file = None;
        if self.config.use_ignore_file {
            let path = self.root.join(IGNORE_FILE);
            if path.exists() {
                let mut builder = GitignoreBuilder::new(&self.root);
                if let Some(err) = builder.add(&path) {
                    return Err(err.into());
                }
                self.ignore_file = Some(builder.build()?);
            }
        }

        self.patterns = None;
        if !self.config.patterns.is_empty() {
            let mut builder = GitignoreBuilder::new(&self.root);
            for pattern in &self.config.patterns {
                builder.add_line(None, pattern)?;
            }
            self.patterns = Some(builder.build()?);
        }

        Ok(())
    }

    /// Whether nothing can ever match
    pub fn is_empty(&self) -> bool {
        !self.config.skip_temporary && self.ignore_file.is_none() && self.patterns.is_none()
    }

    /// Check whether a root-relative name should be ignored
    pub fn should_ignore(&self, name: &str) -> bool {
        if self.config.skip_temporary && is_temporary(name) {
            return true;
        }

        if self.ignore_file.is_none() && self.patterns.is_none() {
            return false;
        }

        let relative = Path::new(name);
        let is_dir = self.root.join(relative).is_dir();

        for set in [&self.ignore_file, &self.patterns].into_iter().flatten() {
            if set.matched_path_or_any_parents(relative, is_dir).is_ignore() {
                return true;
            }
        }

        false
    }

    /// Get number of active ignore sources
    pub fn active_sources(&self) -> usize {
        usize::from(self.config.skip_temporary)
            + usize::from(self.ignore_file.is_some())
            + usize::from(self.patterns.is_some())
    }
}

/// Temporary and system files skipped by `skip_temporary`
///
/// Covers office lock files, editor swap/backup files and shell metadata
fn is_temporary(name: &str) -> bool {
    let filename = name
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or(name);

    filename.starts_with('~')
        || filename.ends_with('~')
        || filename.ends_with(".tmp")
        || filename.ends_with(".temp")
        || filename.ends_with(".swp")
        || filename.ends_with(".swo")
        || filename.starts_with(".#")
        || (filename.len() > 1 && filename.starts_with('#') && filename.ends_with('#'))
        || filename == "Thumbs.db"
        || filename == "desktop.ini"
        || filename == ".DS_Store"
}

/// Ignore configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnoreConfig {
    /// Read `.dwignore` at the watched root (default: true)
    #[serde(default = "default_true")]
    pub use_ignore_file: bool,

    /// Skip well-known temporary files (default: false)
    #[serde(default)]
    pub skip_temporary: bool,

    /// Additional gitignore-style patterns
    #[serde(default)]
    pub patterns: Vec<String>,
}

impl Default for IgnoreConfig {
    fn default() -> Self {
        Self {
            use_ignore_file: true,
            skip_temporary: false,
            patterns: vec![],
        }
    }
}

fn default_true() -> bool {
    true
}
