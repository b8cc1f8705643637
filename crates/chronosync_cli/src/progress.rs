//! Progress reporting for synchronization runs.
//!
//! Two modes:
//! - Interactive (TTY): a spinner for the current step plus styled lines for
//!   decisions, resolutions and queued work
//! - Logging (non-TTY): structured events through tracing

mod interactive;
mod logging;

use std::sync::Arc;

use chronosync::{ProgressCallback, SyncProgress};
use console::Term;

pub use interactive::InteractiveReporter;
pub use logging::LoggingReporter;

/// Progress reporter that handles both interactive and logging modes.
pub enum ProgressReporter {
    /// Spinner and styled lines for a terminal.
    Interactive(InteractiveReporter),
    /// Structured logging for CI, cron and pipes.
    Logging(LoggingReporter),
}

impl ProgressReporter {
    /// Create a new progress reporter, auto-detecting TTY mode.
    pub fn new() -> Self {
        if Term::stdout().is_term() {
            Self::Interactive(InteractiveReporter::new())
        } else {
            Self::Logging(LoggingReporter::new())
        }
    }

    /// Handle a progress event.
    pub fn handle(&self, event: SyncProgress) {
        match self {
            Self::Interactive(r) => r.handle(event),
            Self::Logging(r) => r.handle(event),
        }
    }

    /// Convert to a [`ProgressCallback`] for the engine.
    pub fn as_callback(self: &Arc<Self>) -> Arc<ProgressCallback> {
        let reporter = Arc::clone(self);
        Arc::new(Box::new(move |event| {
            reporter.handle(event);
        }))
    }

    /// Stop any spinner (interactive mode only).
    pub fn finish(&self) {
        if let Self::Interactive(r) = self {
            r.finish();
        }
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}
