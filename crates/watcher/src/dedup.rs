//! Duplicate event suppression
//!
//! Editors and sync clients often produce bursts of identical notifications
//! for one logical change. A repeat of the same (name, action) inside the
//! window is dropped.

use crate::event::ActionTag;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Entries older than this many windows are pruned on insert
const PRUNE_AFTER_WINDOWS: u32 = 4;

/// Sliding-window duplicate filter, owned by one watch thread
#[derive(Debug)]
pub struct Deduper {
    window: Duration,
    last_seen: HashMap<(String, ActionTag), Instant>,
    last_prune: Instant,
}

impl Deduper {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_seen: HashMap::new(),
            last_prune: Instant::now(),
        }
    }

    /// Returns true if this event repeats one seen within the window
    pub fn is_duplicate(&mut self, name: &str, action: ActionTag) -> bool {
        self.is_duplicate_at(name, action, Instant::now())
    }

    fn is_duplicate_at(&mut self, name: &str, action: ActionTag, now: Instant) -> bool {
        self.prune(now);

        let key = (name.to_string(), action);
        match self.last_seen.get(&key) {
            Some(prev) if now.saturating_duration_since(*prev) < self.window => true,
            _ => {
                self.last_seen.insert(key, now);
                false
            }
        }
    }

    fn prune(&mut self, now: Instant) {
        let horizon = self.window * PRUNE_AFTER_WINDOWS;
        if now.saturating_duration_since(self.last_prune) < horizon {
            return;
        }
        self.last_seen
            .retain(|_, seen| now.saturating_duration_since(*seen) < horizon);
        self.last_prune = now;
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.last_seen.len()
    }
}
