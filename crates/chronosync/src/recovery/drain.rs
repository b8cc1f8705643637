use std::future::Future;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use super::queue::RecoveryQueue;
use crate::entity::owed_operation::OwedOperation;
use crate::entity::recovery_entry::Model as RecoveryEntryModel;
use crate::error::SyncError;
use crate::retry::{RetryConfig, RetryOutcome, run_with_retry};
use crate::sync::{ProgressCallback, SyncProgress, emit};

/// What happened to one queue entry during a drain pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DrainOutcome {
    /// The owed operation succeeded and the entry was removed.
    Completed,
    /// Retries were exhausted; the entry stays queued.
    StillQueued { error: String },
    /// The entry is not eligible for automatic retry and was left alone.
    Skipped,
    /// A non-transient failure; the entry stays queued but needs attention.
    Failed { error: String },
    /// The pass was cancelled before this entry finished.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DrainResult {
    pub entry_id: Uuid,
    pub operation: OwedOperation,
    pub target_branch: Option<String>,
    pub outcome: DrainOutcome,
}

impl DrainResult {
    fn new(entry: &RecoveryEntryModel, outcome: DrainOutcome) -> Self {
        Self {
            entry_id: entry.id,
            operation: entry.operation,
            target_branch: entry.target_branch.clone(),
            outcome,
        }
    }
}

/// Read every queued entry and retry the eligible ones through the retry
/// controller.
///
/// Only entries whose retry succeeds are removed. A cancelled pass reports the
/// remaining entries as [`DrainOutcome::Cancelled`] and leaves them queued.
pub async fn drain_and_retry<P, PFut, F, Fut>(
    queue: &RecoveryQueue,
    retry: &RetryConfig,
    cancel: &CancellationToken,
    mut precondition: P,
    mut execute: F,
    on_progress: Option<&ProgressCallback>,
) -> Result<Vec<DrainResult>, SyncError>
where
    P: FnMut() -> PFut,
    PFut: Future<Output = Result<(), String>>,
    F: FnMut(RecoveryEntryModel) -> Fut,
    Fut: Future<Output = Result<(), SyncError>>,
{
    let entries = queue.all().await?;
    emit(
        on_progress,
        SyncProgress::DrainStarted {
            entries: entries.len(),
        },
    );

    let mut results = Vec::with_capacity(entries.len());
    for entry in entries {
        if !entry.retry_eligible {
            results.push(DrainResult::new(&entry, DrainOutcome::Skipped));
            continue;
        }
        if cancel.is_cancelled() {
            results.push(DrainResult::new(&entry, DrainOutcome::Cancelled));
            continue;
        }

        let operation = format!("recover {}", entry.operation);
        let outcome = run_with_retry(
            &operation,
            retry,
            cancel,
            &mut precondition,
            || execute(entry.clone()),
            on_progress,
        )
        .await;

        let outcome = match outcome {
            Ok(RetryOutcome::Success { attempts, .. }) => {
                queue.complete(entry.id).await?;
                info!(id = %entry.id, operation = %entry.operation, attempts, "recovered");
                DrainOutcome::Completed
            }
            Ok(RetryOutcome::Exhausted { last_error, .. }) => {
                queue.record_failure(entry.id, &last_error).await?;
                DrainOutcome::StillQueued { error: last_error }
            }
            Ok(RetryOutcome::Cancelled { .. }) => DrainOutcome::Cancelled,
            Err(err) => {
                let error = err.to_string();
                warn!(id = %entry.id, operation = %entry.operation, %error, "recovery failed");
                queue.mark_ineligible(entry.id, &error).await?;
                DrainOutcome::Failed { error }
            }
        };

        emit(
            on_progress,
            SyncProgress::EntryDrained {
                entry_id: entry.id,
                operation: entry.operation,
                outcome: outcome.clone(),
            },
        );
        results.push(DrainResult::new(&entry, outcome));
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::connect_and_migrate;
    use crate::recovery::NewRecoveryEntry;

    async fn queue() -> RecoveryQueue {
        let db = connect_and_migrate("sqlite::memory:").await.unwrap();
        RecoveryQueue::new(Arc::new(db))
    }

    fn retry() -> RetryConfig {
        RetryConfig::new(2, Duration::from_millis(10), Duration::from_millis(20))
    }

    fn ready() -> std::future::Ready<Result<(), String>> {
        std::future::ready(Ok(()))
    }

    #[tokio::test]
    async fn removes_only_successful_entries() {
        let queue = queue().await;
        let ok = queue
            .enqueue(NewRecoveryEntry::branch_sync("main", None, "timeout"))
            .await
            .unwrap();
        let failing = queue
            .enqueue(NewRecoveryEntry::branch_sync("dev", None, "timeout"))
            .await
            .unwrap();
        let cancel = CancellationToken::new();

        let results = drain_and_retry(
            &queue,
            &retry(),
            &cancel,
            ready,
            |entry| async move {
                if entry.target_branch.as_deref() == Some("dev") {
                    Err(SyncError::transient("fetch", "still offline"))
                } else {
                    Ok(())
                }
            },
            None,
        )
        .await
        .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].entry_id, ok.id);
        assert_eq!(results[0].outcome, DrainOutcome::Completed);
        assert!(matches!(results[1].outcome, DrainOutcome::StillQueued { .. }));

        let remaining = queue.all().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, failing.id);
        assert_eq!(remaining[0].attempts, 1);
        assert!(remaining[0].retry_eligible);
    }

    #[tokio::test]
    async fn failing_entries_accumulate_across_passes() {
        let queue = queue().await;
        queue
            .enqueue(NewRecoveryEntry::full_sync("fallback"))
            .await
            .unwrap();
        let cancel = CancellationToken::new();

        for _ in 0..3 {
            drain_and_retry(
                &queue,
                &retry(),
                &cancel,
                ready,
                |_| async { Err(SyncError::transient("fetch", "offline")) },
                None,
            )
            .await
            .unwrap();
        }

        let remaining = queue.all().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].attempts, 3);
    }

    #[tokio::test]
    async fn fatal_failure_parks_the_entry() {
        let queue = queue().await;
        queue
            .enqueue(NewRecoveryEntry::branch_sync("main", None, "timeout"))
            .await
            .unwrap();
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let results = drain_and_retry(
            &queue,
            &retry(),
            &cancel,
            ready,
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SyncError::irrecoverable(Some("main"), "reset", "bad object")) }
            },
            None,
        )
        .await
        .unwrap();

        assert!(matches!(results[0].outcome, DrainOutcome::Failed { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let remaining = queue.all().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(!remaining[0].retry_eligible);

        // A second pass leaves it alone.
        let results = drain_and_retry(
            &queue,
            &retry(),
            &cancel,
            ready,
            |_| async { Ok(()) },
            None,
        )
        .await
        .unwrap();
        assert_eq!(results[0].outcome, DrainOutcome::Skipped);
        assert_eq!(queue.all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cancelled_pass_keeps_everything() {
        let queue = queue().await;
        queue
            .enqueue(NewRecoveryEntry::full_sync("fallback"))
            .await
            .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let results = drain_and_retry(
            &queue,
            &retry(),
            &cancel,
            ready,
            |_| async { Ok(()) },
            None,
        )
        .await
        .unwrap();

        assert_eq!(results[0].outcome, DrainOutcome::Cancelled);
        assert_eq!(queue.all().await.unwrap().len(), 1);
    }
}
