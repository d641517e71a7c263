//! Portable source built on `notify`
//!
//! Either the recommended OS watcher (inotify, FSEvents, kqueue) or a
//! `PollWatcher` runs its own thread and pushes events into a bounded
//! channel that stands in for the OS buffer: when it is full, further
//! notifications are dropped and counted as an overflow. A wait blocks on
//! that channel and on a shutdown channel, then keeps draining for
//! `batch_window` so that both halves of a rename normally land in one
//! batch.
//!
//! Neither watcher fails when the watched root itself goes away; they
//! report an event on the root instead. After every batch the root is
//! checked, and a missing root is reported as a wait failure on the next
//! wait.

use super::{Batch, Cancel, ChangeSource, OpenedSource, Wait};
use crate::config::WatchConfig;
use crate::error::{WaitError, WatchError};
use crate::record::{ChangeRecord, RawName, RecordAction};
use crate::stats::SessionStats;
use crossbeam_channel::{bounded, select, Receiver, RecvTimeoutError, Sender, TrySendError};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Which `notify` watcher to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Recommended,
    Poll,
}

/// Owns the backend watcher until cancelled
struct WatchHandle {
    watcher: Mutex<Option<Box<dyn Watcher + Send>>>,
    shutdown: Sender<()>,
    cancelled: AtomicBool,
}

impl Cancel for WatchHandle {
    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.shutdown.try_send(());

        // Dropping the backend closes its OS handle and disconnects the
        // event channel.
        let watcher = self.watcher.lock().take();
        if watcher.is_some() {
            drop(watcher);
            debug!("Backend watcher released");
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Blocking side of the portable source
pub struct PortableSource {
    root: PathBuf,
    events: Receiver<notify::Result<Event>>,
    shutdown: Receiver<()>,
    handle: Arc<WatchHandle>,
    batch_window: Duration,
    max_records: usize,
    stats: Arc<SessionStats>,
    /// Fatal error seen mid-batch, reported on the next wait
    pending_error: Option<WaitError>,
}

/// Open `root` with the given `notify` watcher
pub fn open(
    root: &Path,
    config: &WatchConfig,
    stats: Arc<SessionStats>,
    mode: Mode,
) -> Result<OpenedSource, WatchError> {
    // PollWatcher reports a missing root through the event channel instead
    std::fs::metadata(root).map_err(|e| WatchError::open_failed(root, e))?;

    let capacity = config.queue_capacity();
    let (event_tx, event_rx) = bounded(capacity);
    let (shutdown_tx, shutdown_rx) = bounded(1);

    let overflow_stats = stats.clone();
    let overflowing = AtomicBool::new(false);
    let forward = move |res: notify::Result<Event>| match event_tx.try_send(res) {
        Ok(()) => overflowing.store(false, Ordering::Relaxed),
        Err(TrySendError::Full(_)) => {
            overflow_stats.record_overflow();
            if !overflowing.swap(true, Ordering::Relaxed) {
                warn!("Notification queue full ({} events); changes are being lost", capacity);
            }
        }
        Err(TrySendError::Disconnected(_)) => {}
    };

    let mut watcher: Box<dyn Watcher + Send> = match mode {
        Mode::Recommended => Box::new(
            RecommendedWatcher::new(forward, notify::Config::default())
                .map_err(|e| WatchError::open_failed(root, into_io(e)))?,
        ),
        Mode::Poll => Box::new(
            PollWatcher::new(
                forward,
                notify::Config::default().with_poll_interval(config.poll_interval()),
            )
            .map_err(|e| WatchError::open_failed(root, into_io(e)))?,
        ),
    };

    let recursive_mode = if config.recursive {
        RecursiveMode::Recursive
    } else {
        RecursiveMode::NonRecursive
    };
    watcher
        .watch(root, recursive_mode)
        .map_err(|e| WatchError::open_failed(root, into_io(e)))?;

    let handle = Arc::new(WatchHandle {
        watcher: Mutex::new(Some(watcher)),
        shutdown: shutdown_tx,
        cancelled: AtomicBool::new(false),
    });

    let source = PortableSource {
        root: root.to_path_buf(),
        events: event_rx,
        shutdown: shutdown_rx,
        handle: handle.clone(),
        batch_window: config.batch_window(),
        max_records: capacity,
        stats,
        pending_error: None,
    };

    Ok(OpenedSource {
        source: Box::new(source),
        cancel: handle,
    })
}

fn into_io(err: notify::Error) -> io::Error {
    match err.kind {
        notify::ErrorKind::Io(e) => e,
        notify::ErrorKind::PathNotFound => io::Error::from(io::ErrorKind::NotFound),
        other => io::Error::new(io::ErrorKind::Other, format!("{:?}", other)),
    }
}

/// Errors about entries that vanished while the backend was adding watches
fn is_transient(err: &notify::Error) -> bool {
    match &err.kind {
        notify::ErrorKind::PathNotFound | notify::ErrorKind::WatchNotFound => true,
        notify::ErrorKind::Io(e) => e.kind() == io::ErrorKind::NotFound,
        _ => false,
    }
}

impl PortableSource {
    fn disconnected(&self) -> Result<Wait, WaitError> {
        if self.handle.is_cancelled() {
            Ok(Wait::Cancelled)
        } else {
            Err(WaitError::Disconnected)
        }
    }

    fn absorb(&mut self, res: notify::Result<Event>, batch: &mut Batch) {
        match res {
            Ok(event) => self.push_event(event, batch),
            Err(err) if is_transient(&err) => {
                debug!("Ignoring transient backend error: {}", err);
            }
            Err(err) => {
                if self.pending_error.is_none() {
                    self.pending_error = Some(WaitError::Backend(err.to_string()));
                }
            }
        }
    }

    fn push_event(&self, event: Event, batch: &mut Batch) {
        if event.need_rescan() {
            self.stats.record_overflow();
            warn!("Backend reported lost notifications under {}", self.root.display());
        }

        let action = match event.kind {
            EventKind::Create(_) => RecordAction::Created,
            EventKind::Remove(_) => RecordAction::Deleted,
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => RecordAction::RenamedFrom,
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => RecordAction::RenamedNew,
            // inotify follows From + To with a summary of the pair
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => return,
            EventKind::Modify(ModifyKind::Name(_)) => {
                // FSEvents does not say which half it is reporting
                for path in &event.paths {
                    let action = if path.exists() {
                        RecordAction::RenamedNew
                    } else {
                        RecordAction::RenamedFrom
                    };
                    self.push_path(action, path, batch);
                }
                return;
            }
            EventKind::Modify(_) => RecordAction::Modified,
            EventKind::Access(_) => return,
            EventKind::Any | EventKind::Other => RecordAction::Unknown(0),
        };

        for path in &event.paths {
            self.push_path(action, path, batch);
        }
    }

    fn push_path(&self, action: RecordAction, path: &Path, batch: &mut Batch) {
        match path.strip_prefix(&self.root) {
            Ok(relative) if !relative.as_os_str().is_empty() => {
                batch.records.push(ChangeRecord::new(
                    action,
                    RawName::Native(relative.as_os_str().to_os_string()),
                ));
            }
            // The root itself; its liveness is checked once per batch
            Ok(_) => {}
            Err(_) => debug!("Event outside watched root: {}", path.display()),
        }
    }
}

impl ChangeSource for PortableSource {
    fn wait(&mut self) -> Result<Wait, WaitError> {
        if let Some(err) = self.pending_error.take() {
            return Err(err);
        }

        let first = select! {
            recv(self.shutdown) -> _ => return Ok(Wait::Cancelled),
            recv(self.events) -> msg => msg,
        };
        let first = match first {
            Ok(res) => res,
            Err(_) => return self.disconnected(),
        };

        let mut batch = Batch::default();
        self.absorb(first, &mut batch);

        let deadline = Instant::now() + self.batch_window;
        while batch.records.len() < self.max_records && self.pending_error.is_none() {
            match self.events.recv_deadline(deadline) {
                Ok(res) => self.absorb(res, &mut batch),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        if self.pending_error.is_none() && !self.root.is_dir() {
            warn!("Watched directory {} is gone", self.root.display());
            self.pending_error = Some(WaitError::Backend(format!(
                "watched directory {} was removed or renamed",
                self.root.display()
            )));
        }

        Ok(Wait::Batch(batch))
    }
}

impl Drop for PortableSource {
    fn drop(&mut self) {
        self.handle.cancel();
    }
}
