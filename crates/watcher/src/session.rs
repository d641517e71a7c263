//! Watch session state machine
//!
//! `Idle → Starting → Running → Stopping → Idle`
//!
//! A session owns one notification source and one background thread. The
//! thread blocks in [`ChangeSource::wait`], and for each buffer runs the
//! pipeline synchronously: correlate renames, normalize names, filter,
//! dispatch. The next wait is only issued once the whole buffer has been
//! delivered, so events of one buffer reach the consumer in OS order.
//!
//! A wait failure that is not a cancellation ends the session; there is no
//! automatic restart.

use crate::config::WatchConfig;
use crate::correlate::{correlate, LogicalChange};
use crate::dedup::Deduper;
use crate::dispatch::{self, Dispatcher, EventHandler};
use crate::error::{EventError, Result, WatchError};
use crate::event::{now_timestamp, NormalizedEvent, SessionId};
use crate::ignore::{IgnoreRules, IGNORE_FILE};
use crate::normalize::{file_size, join_path, root_string, to_utf8};
use crate::source::{self, Batch, Cancel, ChangeSource, OpenedSource, Wait};
use crate::stats::{SessionStats, StatsSnapshot};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Stopping,
}

/// Snapshot of one session
#[derive(Debug, Clone, Serialize)]
pub struct WatchStatus {
    pub session_id: SessionId,
    pub running: bool,
    pub state: SessionState,
    pub root: Option<PathBuf>,
    pub stats: StatsSnapshot,
    /// Terminal wait failure, if that is how the session ended
    pub last_error: Option<String>,
}

impl WatchStatus {
    pub(crate) fn not_found(session_id: SessionId) -> Self {
        Self {
            session_id,
            running: false,
            state: SessionState::Idle,
            root: None,
            stats: StatsSnapshot::default(),
            last_error: None,
        }
    }
}

/// State shared between a session and its watch thread
struct Shared {
    state: Mutex<SessionState>,
    running: AtomicBool,
    last_error: Mutex<Option<String>>,
    stats: Arc<SessionStats>,
}

/// One active watch over one directory subtree
pub struct WatchSession {
    id: SessionId,
    root: PathBuf,
    shared: Arc<Shared>,
    cancel: Arc<dyn Cancel>,
    handler: Mutex<Option<Arc<dyn EventHandler>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    finished: Receiver<()>,
    stop_timeout: Duration,
}

/// Validate and canonicalize a caller-supplied directory path
pub fn resolve_root(raw: &str) -> Result<PathBuf> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(WatchError::InvalidArgument("directory path is empty".to_string()));
    }
    if trimmed.chars().any(char::is_control) {
        return Err(WatchError::InvalidArgument(format!(
            "directory path contains control characters: {:?}",
            trimmed
        )));
    }

    let root = std::fs::canonicalize(trimmed).map_err(|e| WatchError::open_failed(trimmed, e))?;
    if !root.is_dir() {
        return Err(WatchError::InvalidArgument(format!(
            "{} is not a directory",
            root.display()
        )));
    }
    Ok(root)
}

impl WatchSession {
    /// Open `path` and start watching it on a new thread
    ///
    /// Returns once the thread is running; events arrive asynchronously.
    pub fn start(
        id: SessionId,
        path: &str,
        handler: Arc<dyn EventHandler>,
        config: &WatchConfig,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| WatchError::InvalidArgument(e.to_string()))?;
        let root = resolve_root(path)?;

        handler
            .resolve()
            .map_err(|reason| WatchError::HandlerUnresolved { id, reason })?;

        let stats = Arc::new(SessionStats::default());
        let opened = source::open(&root, config, stats.clone())?;
        Self::launch(id, root, handler, opened, config, stats)
    }

    /// Start the watch thread over an already opened source
    pub(crate) fn launch(
        id: SessionId,
        root: PathBuf,
        handler: Arc<dyn EventHandler>,
        opened: OpenedSource,
        config: &WatchConfig,
        stats: Arc<SessionStats>,
    ) -> Result<Self> {
        let OpenedSource { source, cancel } = opened;

        let shared = Arc::new(Shared {
            state: Mutex::new(SessionState::Starting),
            running: AtomicBool::new(false),
            last_error: Mutex::new(None),
            stats: stats.clone(),
        });

        // Rules stay loaded while `.dwignore` is enabled so that creating
        // the file later takes effect.
        let ignore = match IgnoreRules::load(&root, config.ignore.clone()) {
            Ok(rules) if rules.is_empty() && !config.ignore.use_ignore_file => None,
            Ok(rules) => {
                debug!("Session {} loaded {} ignore source(s)", id, rules.active_sources());
                Some(rules)
            }
            Err(e) => {
                cancel.cancel();
                return Err(WatchError::InvalidArgument(format!("invalid ignore rules: {e:#}")));
            }
        };

        let pipeline = Pipeline {
            session_id: id,
            root: root_string(&root),
            lossy: config.lossy_names,
            ignore,
            dedup: config.dedup_window().map(Deduper::new),
            dispatcher: Dispatcher::new(handler.clone(), stats),
        };

        let (finished_tx, finished) = bounded(1);
        let watch_loop = WatchLoop {
            id,
            source,
            cancel: cancel.clone(),
            shared: shared.clone(),
            pipeline,
            finished: finished_tx,
        };

        // The cancel handle is stored before the thread exists, so a stop
        // racing with start always has something to cancel.
        shared.running.store(true, Ordering::Release);
        let thread = thread::Builder::new()
            .name(format!("dirwatch-{}", id))
            .spawn(move || watch_loop.run())
            .map_err(|e| {
                shared.running.store(false, Ordering::Release);
                *shared.state.lock() = SessionState::Idle;
                cancel.cancel();
                WatchError::Spawn(e)
            })?;

        {
            let mut state = shared.state.lock();
            if *state == SessionState::Starting {
                *state = SessionState::Running;
            }
        }

        info!("Watching {} (session {})", root.display(), id);

        Ok(Self {
            id,
            root,
            shared,
            cancel,
            handler: Mutex::new(Some(handler)),
            thread: Mutex::new(Some(thread)),
            finished,
            stop_timeout: config.stop_timeout(),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.lock()
    }

    /// Whether the watch loop is running; never blocks on the loop
    pub fn is_active(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn status(&self) -> WatchStatus {
        WatchStatus {
            session_id: self.id,
            running: self.is_active(),
            state: self.state(),
            root: Some(self.root.clone()),
            stats: self.stats(),
            last_error: self.shared.last_error.lock().clone(),
        }
    }

    /// Stop watching and release the directory handle
    ///
    /// Idempotent. Waits up to the configured stop timeout for the watch
    /// thread; a thread still inside the consumer after that is detached.
    pub fn stop(&self) {
        let previous = {
            let mut state = self.shared.state.lock();
            let previous = *state;
            if previous != SessionState::Idle {
                *state = SessionState::Stopping;
            }
            previous
        };

        self.shared.running.store(false, Ordering::Release);
        self.cancel.cancel();
        self.handler.lock().take();

        let thread = self.thread.lock().take();
        if let Some(thread) = thread {
            match self.finished.recv_timeout(self.stop_timeout) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    if thread.join().is_err() {
                        warn!("Watch thread for session {} panicked", self.id);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        "Watch thread for session {} still busy in consumer after {:?}; detaching it",
                        self.id, self.stop_timeout
                    );
                }
            }
        }

        *self.shared.state.lock() = SessionState::Idle;
        if previous != SessionState::Idle {
            info!("Stopped watching {} (session {})", self.root.display(), self.id);
        }
    }
}

impl Drop for WatchSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Body of the background thread
struct WatchLoop {
    id: SessionId,
    source: Box<dyn ChangeSource>,
    cancel: Arc<dyn Cancel>,
    shared: Arc<Shared>,
    pipeline: Pipeline,
    finished: Sender<()>,
}

impl WatchLoop {
    fn run(mut self) {
        debug!("Watch loop for session {} started", self.id);

        while self.shared.running.load(Ordering::Acquire) {
            match self.source.wait() {
                Ok(Wait::Cancelled) => break,
                Ok(Wait::Batch(batch)) => {
                    if !self.shared.running.load(Ordering::Acquire) {
                        break;
                    }
                    self.pipeline.process(batch, &self.shared.running);
                }
                Err(e) => {
                    if self.cancel.is_cancelled() || !self.shared.running.load(Ordering::Acquire) {
                        break;
                    }
                    error!("Watch for session {} failed: {}", self.id, e);
                    *self.shared.last_error.lock() = Some(e.to_string());
                    break;
                }
            }
        }

        self.shared.running.store(false, Ordering::Release);
        self.cancel.cancel();
        drop(self.source);
        *self.shared.state.lock() = SessionState::Idle;

        debug!("Watch loop for session {} exited", self.id);
        let _ = self.finished.send(());
    }
}

/// Correlate → normalize → filter → dispatch, for one buffer at a time
struct Pipeline {
    session_id: SessionId,
    root: String,
    lossy: bool,
    ignore: Option<IgnoreRules>,
    dedup: Option<Deduper>,
    dispatcher: Dispatcher,
}

impl Pipeline {
    fn stats(&self) -> &SessionStats {
        self.dispatcher.stats()
    }

    fn process(&mut self, batch: Batch, running: &AtomicBool) {
        self.stats().record_batch(batch.records.len());
        if let Some(err) = batch.malformed {
            self.stats().record_malformed();
            warn!("Malformed notification buffer, remaining records dropped: {}", err);
        }
        if batch.is_empty() {
            return;
        }
        debug!("Session {}: {} records", self.session_id, batch.records.len());

        for change in correlate(batch.records) {
            // Nothing is delivered once stop has released the consumer
            if !running.load(Ordering::Acquire) {
                return;
            }

            match self.normalize(change) {
                Ok(Some(event)) => {
                    let name = event.name.clone();
                    if let Err(e) = self.dispatcher.dispatch(event) {
                        dispatch::log_failure(&name, &e);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    self.stats().record_skipped();
                    warn!("Skipping event in session {}: {}", self.session_id, e);
                }
            }
        }
    }

    fn normalize(&mut self, change: LogicalChange) -> Result<Option<NormalizedEvent>, EventError> {
        let name = to_utf8(&change.name, self.lossy)?;
        let old_name = change
            .old_name
            .as_ref()
            .map(|old| to_utf8(old, self.lossy))
            .transpose()?;

        if let Some(rules) = &mut self.ignore {
            if name == IGNORE_FILE {
                if let Err(e) = rules.reload() {
                    warn!("Failed to reload {}: {:#}", IGNORE_FILE, e);
                }
            }
            if rules.should_ignore(&name) {
                self.dispatcher.stats().record_ignored();
                return Ok(None);
            }
        }

        if let Some(dedup) = &mut self.dedup {
            if dedup.is_duplicate(&name, change.action) {
                self.dispatcher.stats().record_suppressed();
                return Ok(None);
            }
        }

        let path = join_path(&self.root, &name);
        let size = if change.action.is_removal() {
            0
        } else {
            file_size(Path::new(&path))
        };
        let old_path = old_name.as_deref().map(|old| join_path(&self.root, old));

        Ok(Some(NormalizedEvent {
            session_id: self.session_id,
            path,
            name,
            action: change.action,
            old_name,
            old_path,
            size,
            timestamp: now_timestamp(),
        }))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::WaitError;
    use crate::event::ActionTag;
    use crate::record::{ChangeRecord, RawName, RecordAction};
    use crossbeam_channel::{select, unbounded};
    use std::ffi::OsString;
    use std::fs;
    use std::time::Instant;
    use tempfile::TempDir;

    /// Step fed to a [`ScriptedSource`]
    pub(crate) enum Step {
        Batch(Vec<ChangeRecord>),
        Fail,
    }

    struct ScriptedCancel {
        cancelled: AtomicBool,
        shutdown: Sender<()>,
    }

    impl Cancel for ScriptedCancel {
        fn cancel(&self) {
            if !self.cancelled.swap(true, Ordering::AcqRel) {
                let _ = self.shutdown.try_send(());
            }
        }

        fn is_cancelled(&self) -> bool {
            self.cancelled.load(Ordering::Acquire)
        }
    }

    /// Source driven by a test through a channel
    pub(crate) struct ScriptedSource {
        steps: Receiver<Step>,
        shutdown: Receiver<()>,
    }

    impl ChangeSource for ScriptedSource {
        fn wait(&mut self) -> Result<Wait, WaitError> {
            select! {
                recv(self.shutdown) -> _ => Ok(Wait::Cancelled),
                recv(self.steps) -> step => match step {
                    Ok(Step::Batch(records)) => Ok(Wait::Batch(Batch { records, malformed: None })),
                    Ok(Step::Fail) => Err(WaitError::Backend("device removed".to_string())),
                    Err(_) => Err(WaitError::Disconnected),
                },
            }
        }
    }

    pub(crate) fn scripted() -> (OpenedSource, Sender<Step>) {
        let (steps_tx, steps) = unbounded();
        let (shutdown_tx, shutdown) = bounded(1);
        let opened = OpenedSource {
            source: Box::new(ScriptedSource { steps, shutdown }),
            cancel: Arc::new(ScriptedCancel {
                cancelled: AtomicBool::new(false),
                shutdown: shutdown_tx,
            }),
        };
        (opened, steps_tx)
    }

    fn rec(action: RecordAction, name: &str) -> ChangeRecord {
        ChangeRecord::new(action, RawName::Native(OsString::from(name)))
    }

    fn collector() -> (Arc<dyn EventHandler>, Receiver<NormalizedEvent>) {
        let (tx, rx) = unbounded();
        let handler = move |event: &NormalizedEvent| -> anyhow::Result<()> {
            tx.send(event.clone())?;
            Ok(())
        };
        (Arc::new(handler), rx)
    }

    fn launch(
        root: &Path,
        handler: Arc<dyn EventHandler>,
        config: &WatchConfig,
    ) -> (WatchSession, Sender<Step>) {
        let (opened, steps) = scripted();
        let session = WatchSession::launch(
            SessionId(7),
            root.to_path_buf(),
            handler,
            opened,
            config,
            Arc::new(SessionStats::default()),
        )
        .unwrap();
        (session, steps)
    }

    fn recv(rx: &Receiver<NormalizedEvent>) -> NormalizedEvent {
        rx.recv_timeout(Duration::from_secs(5)).unwrap()
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_batch_is_delivered_in_order_with_renames_merged() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().canonicalize().unwrap();
        fs::write(root.join("b.txt"), vec![0u8; 100]).unwrap();

        let (handler, events) = collector();
        let (session, steps) = launch(&root, handler, &WatchConfig::default());

        steps
            .send(Step::Batch(vec![
                rec(RecordAction::Created, "a.txt"),
                rec(RecordAction::RenamedFrom, "a.txt"),
                rec(RecordAction::RenamedNew, "b.txt"),
                rec(RecordAction::Deleted, "c.txt"),
            ]))
            .unwrap();

        let created = recv(&events);
        assert_eq!(created.action, ActionTag::Create);
        assert_eq!(created.name, "a.txt");
        assert_eq!(created.session_id, SessionId(7));

        let renamed = recv(&events);
        assert_eq!(renamed.action, ActionTag::Rename);
        assert_eq!(renamed.name, "b.txt");
        assert_eq!(renamed.old_name.as_deref(), Some("a.txt"));
        assert_eq!(renamed.path, join_path(&root_string(&root), "b.txt"));
        assert_eq!(renamed.old_path, Some(join_path(&root_string(&root), "a.txt")));
        assert_eq!(renamed.size, 100);

        let deleted = recv(&events);
        assert_eq!(deleted.action, ActionTag::Delete);
        assert_eq!(deleted.size, 0);

        session.stop();
        let stats = session.stats();
        assert_eq!(stats.batches, 1);
        assert_eq!(stats.records, 4);
        assert_eq!(stats.delivered, 3);
    }

    #[test]
    fn test_wait_failure_ends_session() {
        let temp_dir = TempDir::new().unwrap();
        let (handler, _events) = collector();
        let (session, steps) = launch(temp_dir.path(), handler, &WatchConfig::default());
        assert!(session.is_active());

        steps.send(Step::Fail).unwrap();

        assert!(wait_until(|| !session.is_active()));
        assert!(wait_until(|| session.state() == SessionState::Idle));
        let status = session.status();
        assert!(!status.running);
        assert!(status.last_error.unwrap().contains("device removed"));

        // Stopping a failed session is still fine
        session.stop();
        session.stop();
    }

    #[test]
    fn test_stop_is_idempotent_and_interrupts_wait() {
        let temp_dir = TempDir::new().unwrap();
        let (handler, _events) = collector();
        let (session, _steps) = launch(temp_dir.path(), handler, &WatchConfig::default());
        assert_eq!(session.state(), SessionState::Running);

        let started = Instant::now();
        session.stop();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!session.is_active());
        assert_eq!(session.state(), SessionState::Idle);

        session.stop();
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_consumer_failures_do_not_end_session() {
        let temp_dir = TempDir::new().unwrap();
        let (tx, events) = unbounded();
        let handler = move |event: &NormalizedEvent| -> anyhow::Result<()> {
            match event.name.as_str() {
                "panic" => panic!("consumer bug"),
                "error" => anyhow::bail!("consumer refused"),
                _ => {
                    tx.send(event.name.clone())?;
                    Ok(())
                }
            }
        };
        let (session, steps) = launch(temp_dir.path(), Arc::new(handler), &WatchConfig::default());

        steps
            .send(Step::Batch(vec![
                rec(RecordAction::Created, "panic"),
                rec(RecordAction::Created, "error"),
                rec(RecordAction::Created, "ok"),
            ]))
            .unwrap();

        assert_eq!(events.recv_timeout(Duration::from_secs(5)).unwrap(), "ok");
        assert!(session.is_active());
        assert_eq!(session.stats().handler_failures, 2);
        session.stop();
    }

    #[test]
    fn test_unconvertible_name_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let (handler, events) = collector();
        let (session, steps) = launch(temp_dir.path(), handler, &WatchConfig::default());

        steps
            .send(Step::Batch(vec![
                ChangeRecord::new(RecordAction::Created, RawName::Wide(vec![0xD800])),
                rec(RecordAction::Created, "fine.txt"),
            ]))
            .unwrap();

        assert_eq!(recv(&events).name, "fine.txt");
        assert_eq!(session.stats().skipped, 1);
        session.stop();
    }

    #[test]
    fn test_ignore_and_dedup_filter_events() {
        let temp_dir = TempDir::new().unwrap();
        let config = WatchConfig {
            dedup_window_ms: 60_000,
            ignore: crate::ignore::IgnoreConfig {
                use_ignore_file: false,
                skip_temporary: true,
                patterns: vec!["*.log".to_string()],
            },
            ..WatchConfig::default()
        };
        let (handler, events) = collector();
        let (session, steps) = launch(temp_dir.path(), handler, &config);

        steps
            .send(Step::Batch(vec![
                rec(RecordAction::Created, "draft.tmp"),
                rec(RecordAction::Created, "debug.log"),
                rec(RecordAction::Modified, "a.txt"),
                rec(RecordAction::Modified, "a.txt"),
                rec(RecordAction::Deleted, "a.txt"),
            ]))
            .unwrap();

        assert_eq!(recv(&events).action, ActionTag::Modify);
        assert_eq!(recv(&events).action, ActionTag::Delete);
        let stats = session.stats();
        assert_eq!(stats.ignored, 2);
        assert_eq!(stats.suppressed, 1);
        session.stop();
    }

    #[test]
    fn test_hung_consumer_does_not_block_stop_forever() {
        let temp_dir = TempDir::new().unwrap();
        let (entered_tx, entered) = bounded(1);
        let (release_tx, release) = bounded::<()>(1);
        let handler = move |_: &NormalizedEvent| -> anyhow::Result<()> {
            let _ = entered_tx.send(());
            let _ = release.recv();
            Ok(())
        };
        let config = WatchConfig {
            stop_timeout_ms: 100,
            ..WatchConfig::default()
        };
        let (session, steps) = launch(temp_dir.path(), Arc::new(handler), &config);

        steps
            .send(Step::Batch(vec![rec(RecordAction::Created, "slow")]))
            .unwrap();
        entered.recv_timeout(Duration::from_secs(5)).unwrap();

        let started = Instant::now();
        session.stop();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!session.is_active());

        release_tx.send(()).unwrap();
    }

    #[test]
    fn test_unresolvable_handler_aborts_start() {
        struct Unbound;

        impl EventHandler for Unbound {
            fn resolve(&self) -> std::result::Result<(), String> {
                Err("no onFileEvent method".to_string())
            }

            fn on_event(&self, _: &NormalizedEvent) -> anyhow::Result<()> {
                Ok(())
            }
        }

        let temp_dir = TempDir::new().unwrap();
        let result = WatchSession::start(
            SessionId(1),
            temp_dir.path().to_str().unwrap(),
            Arc::new(Unbound),
            &WatchConfig::default(),
        );

        assert!(matches!(result, Err(WatchError::HandlerUnresolved { .. })));
    }

    #[test]
    fn test_resolve_root_validation() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("file.txt");
        fs::write(&file, b"x").unwrap();

        assert!(matches!(resolve_root(""), Err(WatchError::InvalidArgument(_))));
        assert!(matches!(resolve_root("   "), Err(WatchError::InvalidArgument(_))));
        assert!(matches!(resolve_root("/tmp/a\u{7}b"), Err(WatchError::InvalidArgument(_))));
        assert!(matches!(
            resolve_root(file.to_str().unwrap()),
            Err(WatchError::InvalidArgument(_))
        ));

        match resolve_root(temp_dir.path().join("missing").to_str().unwrap()) {
            Err(WatchError::OpenFailed { code, .. }) => assert!(code.is_some()),
            other => panic!("expected OpenFailed, got {:?}", other.map(|p| p.display().to_string())),
        }

        let padded = format!("  {}  ", temp_dir.path().display());
        assert_eq!(resolve_root(&padded).unwrap(), temp_dir.path().canonicalize().unwrap());
    }
}
