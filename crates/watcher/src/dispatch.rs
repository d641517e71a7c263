//! Event delivery across the consumer boundary
//!
//! The consumer may live in another runtime with its own threading rules.
//! Every delivery enters the consumer's context, invokes it, and leaves the
//! context again, whatever the outcome. Failures are contained to the event
//! being delivered.

use crate::error::EventError;
use crate::event::NormalizedEvent;
use crate::stats::SessionStats;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

/// Consumer of normalized events
///
/// Implemented for any `Fn(&NormalizedEvent) -> anyhow::Result<()>`.
/// Runtimes that bind threads (JVM, CLR, Python) override
/// [`attach`](EventHandler::attach) and [`detach`](EventHandler::detach).
pub trait EventHandler: Send + Sync + 'static {
    /// Resolve the event entry point
    ///
    /// Called once by `start` before any thread is spawned. An error aborts
    /// the start.
    fn resolve(&self) -> Result<(), String> {
        Ok(())
    }

    /// Bind the calling watcher thread to the consumer's runtime
    fn attach(&self) -> Result<(), String> {
        Ok(())
    }

    /// Undo [`attach`](EventHandler::attach); called after every successful attach
    fn detach(&self) {}

    /// Receive one event
    fn on_event(&self, event: &NormalizedEvent) -> anyhow::Result<()>;
}

impl<F> EventHandler for F
where
    F: Fn(&NormalizedEvent) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn on_event(&self, event: &NormalizedEvent) -> anyhow::Result<()> {
        self(event)
    }
}

/// Detaches on drop, including when the consumer panics
struct Attached<'a> {
    handler: &'a dyn EventHandler,
}

impl<'a> Attached<'a> {
    fn enter(handler: &'a dyn EventHandler) -> Result<Self, EventError> {
        handler.attach().map_err(EventError::Boundary)?;
        Ok(Self { handler })
    }
}

impl Drop for Attached<'_> {
    fn drop(&mut self) {
        self.handler.detach();
    }
}

/// Hands events to one consumer
pub struct Dispatcher {
    handler: Arc<dyn EventHandler>,
    stats: Arc<SessionStats>,
}

impl Dispatcher {
    pub fn new(handler: Arc<dyn EventHandler>, stats: Arc<SessionStats>) -> Self {
        Self { handler, stats }
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Deliver one event, consuming it
    ///
    /// Errors are already counted; the caller only logs them.
    pub fn dispatch(&self, event: NormalizedEvent) -> Result<(), EventError> {
        let result = self.deliver(&event);
        match &result {
            Ok(()) => self.stats.record_delivered(),
            Err(EventError::Boundary(_)) => self.stats.record_boundary_failure(),
            Err(_) => self.stats.record_handler_failure(),
        }
        result
    }

    fn deliver(&self, event: &NormalizedEvent) -> Result<(), EventError> {
        let _attached = Attached::enter(self.handler.as_ref())?;

        match catch_unwind(AssertUnwindSafe(|| self.handler.on_event(event))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(EventError::Handler(e)),
            Err(payload) => Err(EventError::HandlerPanicked(panic_message(payload.as_ref()))),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Log a per-event failure
pub(crate) fn log_failure(event_name: &str, err: &EventError) {
    match err {
        EventError::Boundary(_) => warn!("Dropped event for {}: {}", event_name, err),
        _ => warn!("Consumer failed on {}: {}", event_name, err),
    }
}
