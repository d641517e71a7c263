//! Windows source: overlapped `ReadDirectoryChangesW`
//!
//! The directory handle is opened with full sharing so other processes can
//! still rename and delete inside (and the directory itself). It belongs to
//! the source alone and is closed in its `Drop`, on the watch thread, after
//! the last read has completed.
//!
//! Each wait issues one overlapped read and blocks on two events: read
//! completion and cancellation. [`Cancel`] only signals the second one, so
//! it never touches the directory handle and may run from any thread at
//! any time, even before the first read is issued.

use super::{Batch, Cancel, ChangeSource, OpenedSource, Wait};
use crate::config::WatchConfig;
use crate::error::{WaitError, WatchError};
use crate::stats::SessionStats;
use std::ffi::c_void;
use std::io;
use std::iter::once;
use std::mem;
use std::os::windows::ffi::OsStrExt;
use std::path::Path;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use windows_sys::Win32::Foundation::{
    CloseHandle, ERROR_NOTIFY_ENUM_DIR, ERROR_OPERATION_ABORTED, FALSE, HANDLE,
    INVALID_HANDLE_VALUE, TRUE, WAIT_FAILED, WAIT_OBJECT_0,
};
use windows_sys::Win32::Storage::FileSystem::{
    CreateFileW, ReadDirectoryChangesW, FILE_FLAG_BACKUP_SEMANTICS, FILE_FLAG_OVERLAPPED,
    FILE_LIST_DIRECTORY, FILE_NOTIFY_CHANGE_ATTRIBUTES, FILE_NOTIFY_CHANGE_DIR_NAME,
    FILE_NOTIFY_CHANGE_FILE_NAME, FILE_NOTIFY_CHANGE_LAST_WRITE, FILE_NOTIFY_CHANGE_SIZE,
    FILE_SHARE_DELETE, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING,
};
use windows_sys::Win32::System::Threading::{
    CreateEventW, ResetEvent, SetEvent, WaitForMultipleObjects, INFINITE,
};
use windows_sys::Win32::System::IO::{CancelIoEx, GetOverlappedResult, OVERLAPPED};

const NOTIFY_FILTER: u32 = FILE_NOTIFY_CHANGE_FILE_NAME
    | FILE_NOTIFY_CHANGE_DIR_NAME
    | FILE_NOTIFY_CHANGE_LAST_WRITE
    | FILE_NOTIFY_CHANGE_SIZE
    | FILE_NOTIFY_CHANGE_ATTRIBUTES;

/// Owned manual-reset event handle
struct Event(HANDLE);

impl Event {
    fn new() -> io::Result<Self> {
        // SAFETY: no security attributes and no name; the result is checked.
        let raw = unsafe { CreateEventW(ptr::null(), TRUE, FALSE, ptr::null()) };
        if raw == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self(raw))
    }
}

impl Drop for Event {
    fn drop(&mut self) {
        // SAFETY: the handle came from CreateEventW and is closed only here.
        unsafe { CloseHandle(self.0) };
    }
}

/// Cancellation side: a flag plus the event the wait blocks on
struct CancelEvent {
    event: Event,
    cancelled: AtomicBool,
}

impl Cancel for CancelEvent {
    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        // SAFETY: the event handle stays open for as long as `self` exists.
        unsafe { SetEvent(self.event.0) };
        debug!("Directory wait cancelled");
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Blocking reader over one directory handle
pub struct NativeSource {
    dir: HANDLE,
    io_event: Event,
    cancel: Arc<CancelEvent>,
    /// DWORD-aligned notification buffer
    buf: Vec<u32>,
    recursive: bool,
    stats: Arc<SessionStats>,
}

/// Open `root` for change notification
pub fn open(
    root: &Path,
    config: &WatchConfig,
    stats: Arc<SessionStats>,
) -> Result<OpenedSource, WatchError> {
    let wide: Vec<u16> = root.as_os_str().encode_wide().chain(once(0)).collect();

    // SAFETY: `wide` is NUL-terminated and outlives the call.
    let dir = unsafe {
        CreateFileW(
            wide.as_ptr(),
            FILE_LIST_DIRECTORY,
            FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE,
            ptr::null(),
            OPEN_EXISTING,
            FILE_FLAG_BACKUP_SEMANTICS | FILE_FLAG_OVERLAPPED,
            0,
        )
    };
    if dir == INVALID_HANDLE_VALUE {
        return Err(WatchError::open_failed(root, io::Error::last_os_error()));
    }

    let events = Event::new().and_then(|io_event| Ok((io_event, Event::new()?)));
    let (io_event, cancel_event) = match events {
        Ok(events) => events,
        Err(e) => {
            // SAFETY: `dir` was just opened and is not shared yet.
            unsafe { CloseHandle(dir) };
            return Err(WatchError::open_failed(root, e));
        }
    };

    let cancel = Arc::new(CancelEvent {
        event: cancel_event,
        cancelled: AtomicBool::new(false),
    });
    let source = NativeSource {
        dir,
        io_event,
        cancel: cancel.clone(),
        buf: vec![0u32; config.buffer_size / 4],
        recursive: config.recursive,
        stats,
    };

    Ok(OpenedSource {
        source: Box::new(source),
        cancel,
    })
}

impl NativeSource {
    /// Abort the read described by `overlapped` and wait until the OS is
    /// done with it, so the buffer and `overlapped` may be released
    fn abort_read(&self, overlapped: &OVERLAPPED) {
        let mut transferred = 0u32;
        // SAFETY: `overlapped` belongs to a read issued on `self.dir`.
        unsafe {
            CancelIoEx(self.dir, overlapped);
            GetOverlappedResult(self.dir, overlapped, &mut transferred, TRUE);
        }
    }
}

impl ChangeSource for NativeSource {
    fn wait(&mut self) -> Result<Wait, WaitError> {
        if self.cancel.is_cancelled() {
            return Ok(Wait::Cancelled);
        }

        let capacity = self.buf.len() * 4;
        // SAFETY: an all-zero OVERLAPPED is the documented initial state.
        let mut overlapped: OVERLAPPED = unsafe { mem::zeroed() };
        overlapped.hEvent = self.io_event.0;

        // SAFETY: the buffer is DWORD-aligned and `capacity` bytes long. It
        // and `overlapped` stay borrowed until the read has completed or
        // been aborted below.
        let issued = unsafe {
            ResetEvent(self.io_event.0);
            ReadDirectoryChangesW(
                self.dir,
                self.buf.as_mut_ptr() as *mut c_void,
                capacity as u32,
                i32::from(self.recursive),
                NOTIFY_FILTER,
                ptr::null_mut(),
                &mut overlapped,
                None,
            )
        };
        if issued == 0 {
            return Err(io::Error::last_os_error().into());
        }

        let handles = [self.io_event.0, self.cancel.event.0];
        // SAFETY: both handles are open for the duration of the call.
        let signalled = unsafe { WaitForMultipleObjects(2, handles.as_ptr(), FALSE, INFINITE) };

        if signalled == WAIT_OBJECT_0 + 1 {
            self.abort_read(&overlapped);
            return Ok(Wait::Cancelled);
        }
        if signalled == WAIT_FAILED {
            let err = io::Error::last_os_error();
            self.abort_read(&overlapped);
            return Err(err.into());
        }

        let mut returned = 0u32;
        // SAFETY: the read has completed; this only collects its result.
        let ok = unsafe { GetOverlappedResult(self.dir, &overlapped, &mut returned, FALSE) };
        if ok == 0 {
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(code) if code == ERROR_OPERATION_ABORTED as i32 => return Ok(Wait::Cancelled),
                Some(code) if code == ERROR_NOTIFY_ENUM_DIR as i32 => returned = 0,
                _ => return Err(err.into()),
            }
        }

        if returned == 0 {
            // More changes than the buffer could hold; the OS dropped them
            self.stats.record_overflow();
            warn!("Notification buffer overflowed ({} bytes); changes were lost", capacity);
            return Ok(Wait::Batch(Batch::default()));
        }

        // SAFETY: reinterpreting initialized u32 storage as bytes.
        let bytes =
            unsafe { std::slice::from_raw_parts(self.buf.as_ptr() as *const u8, capacity) };
        Ok(Wait::Batch(Batch::decode(bytes, returned as usize)))
    }
}

impl Drop for NativeSource {
    fn drop(&mut self) {
        self.cancel.cancel();
        // SAFETY: every read completes before `wait` returns, so nothing
        // still references the handle.
        unsafe { CloseHandle(self.dir) };
        debug!("Directory handle released");
    }
}
