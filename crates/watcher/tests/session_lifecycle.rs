//! End-to-end watching of real directories

use crossbeam_channel::{unbounded, Receiver};
use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use watcher::{ActionTag, EventHandler, NormalizedEvent, SessionId, WatchConfig, WatchManager};

fn config() -> WatchConfig {
    WatchConfig {
        batch_window_ms: 50,
        ..WatchConfig::default()
    }
}

fn collector() -> (Arc<dyn EventHandler>, Receiver<NormalizedEvent>) {
    let (tx, rx) = unbounded();
    let handler = move |event: &NormalizedEvent| -> anyhow::Result<()> {
        tx.send(event.clone())?;
        Ok(())
    };
    (Arc::new(handler), rx)
}

/// Receive until an event matches, or give up after a few seconds
fn expect_event(
    events: &Receiver<NormalizedEvent>,
    mut matches: impl FnMut(&NormalizedEvent) -> bool,
) -> NormalizedEvent {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match events.recv_timeout(remaining) {
            Ok(event) if matches(&event) => return event,
            Ok(_) => continue,
            Err(_) => panic!("timed out waiting for event"),
        }
    }
}

/// Everything received up to and including the first match, plus whatever
/// trails it within a short quiet period
fn events_through(
    events: &Receiver<NormalizedEvent>,
    mut matches: impl FnMut(&NormalizedEvent) -> bool,
) -> Vec<NormalizedEvent> {
    let mut seen = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match events.recv_timeout(remaining) {
            Ok(event) => {
                let done = matches(&event);
                seen.push(event);
                if done {
                    break;
                }
            }
            Err(_) => panic!("timed out waiting for event"),
        }
    }
    while let Ok(event) = events.recv_timeout(Duration::from_millis(300)) {
        seen.push(event);
    }
    seen
}

fn count(events: &[NormalizedEvent], action: ActionTag) -> usize {
    events.iter().filter(|e| e.action == action).count()
}

fn settle() {
    // Lets the backend finish registering before the first change
    thread::sleep(Duration::from_millis(200));
}

#[test]
fn test_create_rename_delete_sequence() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().canonicalize().unwrap();
    let (handler, events) = collector();
    let manager = WatchManager::new(config());

    manager.start(1, root.to_str().unwrap(), handler).unwrap();
    settle();

    fs::write(root.join("a.txt"), vec![b'x'; 100]).unwrap();
    let mut seen = events_through(&events, |e| e.action == ActionTag::Create);
    fs::rename(root.join("a.txt"), root.join("b.txt")).unwrap();
    seen.extend(events_through(&events, |e| e.action == ActionTag::Rename));
    fs::remove_file(root.join("b.txt")).unwrap();
    seen.extend(events_through(&events, |e| e.action == ActionTag::Delete));

    assert_eq!(count(&seen, ActionTag::Create), 1);
    assert_eq!(count(&seen, ActionTag::Rename), 1);
    assert_eq!(count(&seen, ActionTag::Delete), 1);
    assert_eq!(count(&seen, ActionTag::RenameOld), 0);
    assert_eq!(count(&seen, ActionTag::RenameNew), 0);

    let created = seen.iter().find(|e| e.action == ActionTag::Create).unwrap();
    assert_eq!(created.name, "a.txt");
    assert_eq!(created.session_id, SessionId(1));
    assert_eq!(created.path, root.join("a.txt").to_string_lossy());

    let renamed = seen.iter().find(|e| e.action == ActionTag::Rename).unwrap();
    assert_eq!(renamed.name, "b.txt");
    assert_eq!(renamed.old_name.as_deref(), Some("a.txt"));
    assert_eq!(renamed.size, 100);

    let deleted = seen.iter().find(|e| e.action == ActionTag::Delete).unwrap();
    assert_eq!(deleted.name, "b.txt");
    assert_eq!(deleted.size, 0);

    manager.stop(1);
    assert!(!manager.is_active());
}

// Windows refuses to delete a directory this process holds open
#[cfg(not(windows))]
#[test]
fn test_session_ends_when_root_is_removed() {
    let parent = TempDir::new().unwrap();
    let watched = parent.path().join("watched");
    fs::create_dir(&watched).unwrap();
    let (handler, _events) = collector();
    let manager = WatchManager::new(config());

    manager.start(1, watched.to_str().unwrap(), handler).unwrap();
    settle();
    fs::remove_dir(&watched).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while manager.is_session_active(1) {
        assert!(Instant::now() < deadline, "session still running after its root was removed");
        thread::sleep(Duration::from_millis(50));
    }

    let status = manager.status(1);
    assert!(!status.running);
    let error = status.last_error.expect("session should record why it ended");
    assert!(error.contains("removed"), "unexpected error: {error}");
    assert!(!manager.is_active());
}

#[test]
fn test_nested_entries_are_reported_relative_to_root() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().canonicalize().unwrap();
    fs::create_dir(root.join("sub")).unwrap();
    let (handler, events) = collector();
    let manager = WatchManager::new(config());

    manager.start(1, root.to_str().unwrap(), handler).unwrap();
    settle();

    fs::write(root.join("sub").join("deep.txt"), b"hi").unwrap();
    let created = expect_event(&events, |e| {
        e.action == ActionTag::Create && e.name.ends_with("deep.txt")
    });
    assert_eq!(
        created.path,
        root.join("sub").join("deep.txt").to_string_lossy()
    );

    manager.stop_all();
}

#[test]
fn test_lifecycle_and_idempotent_stop() {
    let temp_dir = TempDir::new().unwrap();
    let (handler, _events) = collector();
    let manager = WatchManager::new(config());

    assert!(!manager.is_active());
    manager
        .start(4, temp_dir.path().to_str().unwrap(), handler)
        .unwrap();
    assert!(manager.is_active());
    assert!(manager.status(4).running);

    let started = Instant::now();
    manager.stop(4);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!manager.is_active());

    manager.stop(4);
    manager.stop_all();
    assert!(!manager.status(4).running);
}

#[test]
fn test_directory_is_released_after_stop() {
    let parent = TempDir::new().unwrap();
    let watched = parent.path().join("watched");
    fs::create_dir(&watched).unwrap();
    let (handler, _events) = collector();
    let manager = WatchManager::new(config());

    manager.start(1, watched.to_str().unwrap(), handler).unwrap();
    manager.stop(1);

    let moved = parent.path().join("moved");
    fs::rename(&watched, &moved).unwrap();
    fs::remove_dir(&moved).unwrap();
}

#[test]
fn test_sessions_are_independent() {
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    let (handler, events) = collector();
    let manager = WatchManager::new(config());

    manager
        .start(1, first.path().to_str().unwrap(), handler.clone())
        .unwrap();
    manager
        .start(2, second.path().to_str().unwrap(), handler)
        .unwrap();
    settle();

    fs::write(second.path().join("two.txt"), b"2").unwrap();
    let event = expect_event(&events, |e| e.name == "two.txt");
    assert_eq!(event.session_id, SessionId(2));

    manager.stop(2);
    assert!(manager.is_session_active(1));
    assert!(!manager.is_session_active(2));

    fs::write(first.path().join("one.txt"), b"1").unwrap();
    let event = expect_event(&events, |e| e.name == "one.txt");
    assert_eq!(event.session_id, SessionId(1));

    drop(manager);
}

#[test]
fn test_no_events_after_stop() {
    let temp_dir = TempDir::new().unwrap();
    let (handler, events) = collector();
    let manager = WatchManager::new(config());

    manager
        .start(1, temp_dir.path().to_str().unwrap(), handler)
        .unwrap();
    manager.stop(1);

    fs::write(temp_dir.path().join("late.txt"), b"late").unwrap();
    thread::sleep(Duration::from_millis(200));
    assert!(events.try_recv().is_err());
}
