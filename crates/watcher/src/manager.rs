//! Keyed collection of watch sessions
//!
//! Each session is independent: its own handle, thread and consumer. Start
//! and stop on different ids never contend beyond the map shard.

use crate::config::WatchConfig;
use crate::dispatch::EventHandler;
use crate::error::{Result, WatchError};
use crate::event::SessionId;
use crate::session::{WatchSession, WatchStatus};
use crate::stats::StatsSnapshot;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::warn;

/// Owns every session started through it
pub struct WatchManager {
    sessions: DashMap<SessionId, Arc<WatchSession>>,
    config: WatchConfig,
}

impl WatchManager {
    pub fn new(config: WatchConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            config,
        }
    }

    /// Start watching `path` under `id`
    ///
    /// Fails with [`WatchError::AlreadyRunning`] if `id` is active. A
    /// session under `id` that already ended on its own is replaced.
    pub fn start(
        &self,
        id: impl Into<SessionId>,
        path: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<()> {
        let id = id.into();
        if self.is_session_active(id) {
            return Err(WatchError::AlreadyRunning(id));
        }

        let session = Arc::new(WatchSession::start(id, path, handler, &self.config)?);

        let replaced = match self.sessions.entry(id) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_active() {
                    // Lost a race with another start for the same id
                    drop(entry);
                    session.stop();
                    return Err(WatchError::AlreadyRunning(id));
                }
                Some(entry.insert(session))
            }
            Entry::Vacant(entry) => {
                entry.insert(session);
                None
            }
        };

        // Stopped outside the shard guard
        if let Some(old) = replaced {
            old.stop();
        }
        Ok(())
    }

    /// [`start`](Self::start) for callers whose consumer may be absent
    pub fn start_nullable(
        &self,
        id: impl Into<SessionId>,
        path: &str,
        handler: Option<Arc<dyn EventHandler>>,
    ) -> Result<()> {
        let handler = handler
            .ok_or_else(|| WatchError::InvalidArgument("no event consumer supplied".to_string()))?;
        self.start(id, path, handler)
    }

    /// Stop the session under `id`; unknown ids are a logged no-op
    pub fn stop(&self, id: impl Into<SessionId>) {
        let id = id.into();
        match self.sessions.remove(&id) {
            Some((_, session)) => session.stop(),
            None => warn!("Stop requested for unknown session {}", id),
        }
    }

    pub fn status(&self, id: impl Into<SessionId>) -> WatchStatus {
        let id = id.into();
        let session = self.sessions.get(&id).map(|entry| entry.value().clone());
        match session {
            Some(session) => session.status(),
            None => WatchStatus::not_found(id),
        }
    }

    /// Status of every known session, ordered by id
    pub fn sessions(&self) -> Vec<WatchStatus> {
        let sessions: Vec<Arc<WatchSession>> =
            self.sessions.iter().map(|entry| entry.value().clone()).collect();
        let mut statuses: Vec<WatchStatus> = sessions.iter().map(|s| s.status()).collect();
        statuses.sort_by_key(|s| s.session_id);
        statuses
    }

    /// Whether any session is running
    pub fn is_active(&self) -> bool {
        self.sessions.iter().any(|entry| entry.value().is_active())
    }

    pub fn is_session_active(&self, id: impl Into<SessionId>) -> bool {
        self.sessions
            .get(&id.into())
            .map(|entry| entry.value().is_active())
            .unwrap_or(false)
    }

    pub fn stats(&self, id: impl Into<SessionId>) -> Option<StatsSnapshot> {
        self.sessions.get(&id.into()).map(|entry| entry.value().stats())
    }

    /// Stop and forget every session
    ///
    /// Returns each session's status as of after its stop, ordered by id.
    pub fn stop_all(&self) -> Vec<WatchStatus> {
        let ids: Vec<SessionId> = self.sessions.iter().map(|entry| *entry.key()).collect();
        let mut statuses = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some((_, session)) = self.sessions.remove(&id) {
                session.stop();
                statuses.push(session.status());
            }
        }
        statuses.sort_by_key(|s| s.session_id);
        statuses
    }
}

impl Default for WatchManager {
    fn default() -> Self {
        Self::new(WatchConfig::default())
    }
}

impl Drop for WatchManager {
    fn drop(&mut self) {
        self.stop_all();
    }
}
