//! Progress reporting for synchronization runs.
//!
//! The engine emits [`SyncProgress`] events through an optional callback so a
//! front end can render them however it likes. Events carry enough context to
//! be logged on their own.

use std::time::Duration;

use uuid::Uuid;

use crate::conflict::Resolution;
use crate::entity::owed_operation::OwedOperation;
use crate::health::HealthStatus;
use crate::priority::Rationale;
use crate::recovery::DrainOutcome;
use crate::retry::SyncAttempt;
use crate::vcs::Side;

use super::types::RunOutcome;

/// Progress events emitted during a run.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum SyncProgress {
    /// A run acquired the lock and is starting.
    RunStarted {
        run_id: Uuid,
        /// Number of branches configured.
        branches: usize,
    },

    /// Health probe finished.
    HealthChecked { status: HealthStatus },

    /// The repository is busy; waiting before probing again.
    WaitingForRepository {
        /// First failing check.
        issue: String,
        waited: Duration,
        budget: Duration,
    },

    /// Fetching from the remote.
    Fetching { remote: String },

    /// Fetch succeeded.
    Fetched { remote: String, attempts: u32 },

    /// One pass through the retry loop ended.
    Attempt(SyncAttempt),

    /// Starting to reconcile a branch.
    BranchStarted { branch: String },

    /// A priority decision was made for a divergent branch.
    DecisionMade {
        branch: String,
        favored: Side,
        rationale: Rationale,
    },

    /// A conflicted path was settled.
    ConflictResolved {
        branch: String,
        path: String,
        resolution: Resolution,
    },

    /// Last-resort convergence reset a branch to the remote.
    ConvergedToRemote { branch: String, backup_ref: String },

    /// Branch pushed to the remote.
    Pushed { branch: String },

    /// Finished a branch.
    BranchFinished {
        branch: String,
        /// Short human-readable summary.
        summary: String,
    },

    /// Remote unreachable; reconciling locally.
    EnteringFallback { reason: String },

    /// Work was deferred to the recovery queue.
    Enqueued {
        entry_id: Uuid,
        operation: OwedOperation,
        branch: Option<String>,
    },

    /// Starting a recovery drain pass.
    DrainStarted { entries: usize },

    /// A queue entry was processed.
    EntryDrained {
        entry_id: Uuid,
        operation: OwedOperation,
        outcome: DrainOutcome,
    },

    /// Non-fatal problem worth surfacing.
    Warning { message: String },

    /// The run is over.
    RunFinished { outcome: RunOutcome },
}

/// Callback for progress updates during a run.
pub type ProgressCallback = Box<dyn Fn(SyncProgress) + Send + Sync>;

/// Emit a progress event if a callback is provided.
#[inline]
pub fn emit(on_progress: Option<&ProgressCallback>, event: SyncProgress) {
    if let Some(cb) = on_progress {
        cb(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn emit_with_callback() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);

        let callback: ProgressCallback = Box::new(move |_event| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        emit(
            Some(&callback),
            SyncProgress::Fetching {
                remote: "origin".to_string(),
            },
        );
        emit(
            Some(&callback),
            SyncProgress::BranchStarted {
                branch: "main".to_string(),
            },
        );

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn emit_without_callback() {
        emit(
            None,
            SyncProgress::Warning {
                message: "ignored".to_string(),
            },
        );
    }

    #[test]
    fn decision_debug_includes_rationale() {
        let event = SyncProgress::DecisionMade {
            branch: "main".to_string(),
            favored: Side::Remote,
            rationale: Rationale::LocalAutomatic,
        };
        let debug_str = format!("{event:?}");
        assert!(debug_str.contains("LocalAutomatic"));
        assert!(debug_str.contains("main"));
    }
}
