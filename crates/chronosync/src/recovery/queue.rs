//! Durable recovery queue.
//!
//! Entries are appended with a timestamp and reason and are only deleted once
//! their owed operation has succeeded. Failed retries update the entry in
//! place; nothing is ever dropped silently.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::entity::owed_operation::OwedOperation;
use crate::entity::recovery_entry::{ActiveModel, Column, Entity as RecoveryEntry, Model};
use crate::error::StorageError;

type Result<T> = std::result::Result<T, StorageError>;

/// Fields for a new queue entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecoveryEntry {
    pub operation: OwedOperation,
    pub reason: String,
    pub target_branch: Option<String>,
    pub target_commit: Option<String>,
    pub retry_eligible: bool,
    pub run_id: Option<Uuid>,
}

impl NewRecoveryEntry {
    pub fn branch_sync(
        branch: impl Into<String>,
        commit: Option<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            operation: OwedOperation::BranchSync,
            reason: reason.into(),
            target_branch: Some(branch.into()),
            target_commit: commit,
            retry_eligible: true,
            run_id: None,
        }
    }

    pub fn full_sync(reason: impl Into<String>) -> Self {
        Self {
            operation: OwedOperation::FullSync,
            reason: reason.into(),
            target_branch: None,
            target_commit: None,
            retry_eligible: true,
            run_id: None,
        }
    }

    pub fn push(branch: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            operation: OwedOperation::Push,
            reason: reason.into(),
            target_branch: Some(branch.into()),
            target_commit: None,
            retry_eligible: true,
            run_id: None,
        }
    }

    /// Queue the entry for manual attention only.
    #[must_use]
    pub fn ineligible(mut self) -> Self {
        self.retry_eligible = false;
        self
    }

    #[must_use]
    pub fn with_run(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }
}

/// Queue statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub total: usize,
    pub eligible: usize,
    pub ineligible: usize,
    pub by_operation: BTreeMap<String, usize>,
    pub total_attempts: u64,
    pub oldest: Option<DateTime<FixedOffset>>,
}

/// Handle to the recovery queue table.
#[derive(Clone)]
pub struct RecoveryQueue {
    db: Arc<DatabaseConnection>,
}

impl RecoveryQueue {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn enqueue(&self, entry: NewRecoveryEntry) -> Result<Model> {
        let model = ActiveModel {
            id: Set(Uuid::new_v4()),
            enqueued_at: Set(Utc::now().fixed_offset()),
            operation: Set(entry.operation),
            reason: Set(entry.reason),
            target_branch: Set(entry.target_branch),
            target_commit: Set(entry.target_commit),
            retry_eligible: Set(entry.retry_eligible),
            attempts: Set(0),
            last_error: Set(None),
            last_attempt_at: Set(None),
            run_id: Set(entry.run_id),
        };

        let saved = model.insert(self.db.as_ref()).await?;
        info!(
            id = %saved.id,
            operation = %saved.operation,
            branch = saved.target_branch.as_deref().unwrap_or("-"),
            eligible = saved.retry_eligible,
            "recovery entry queued"
        );
        Ok(saved)
    }

    /// Every entry, oldest first.
    pub async fn all(&self) -> Result<Vec<Model>> {
        Ok(RecoveryEntry::find()
            .order_by_asc(Column::EnqueuedAt)
            .all(self.db.as_ref())
            .await?)
    }

    /// Entries the drain pass will retry, oldest first.
    pub async fn pending(&self) -> Result<Vec<Model>> {
        Ok(RecoveryEntry::find()
            .filter(Column::RetryEligible.eq(true))
            .order_by_asc(Column::EnqueuedAt)
            .all(self.db.as_ref())
            .await?)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Model>> {
        Ok(RecoveryEntry::find_by_id(id).one(self.db.as_ref()).await?)
    }

    async fn require(&self, id: Uuid) -> Result<Model> {
        self.get(id)
            .await?
            .ok_or(StorageError::EntryNotFound { id })
    }

    /// Remove an entry whose operation succeeded.
    pub async fn complete(&self, id: Uuid) -> Result<()> {
        let result = RecoveryEntry::delete_by_id(id)
            .exec(self.db.as_ref())
            .await?;
        if result.rows_affected == 0 {
            return Err(StorageError::EntryNotFound { id });
        }
        debug!(%id, "recovery entry completed");
        Ok(())
    }

    /// Record a failed retry; the entry stays eligible.
    pub async fn record_failure(&self, id: Uuid, error: &str) -> Result<Model> {
        self.touch(id, error, None).await
    }

    /// Record a failure that needs manual attention before any further retry.
    pub async fn mark_ineligible(&self, id: Uuid, error: &str) -> Result<Model> {
        self.touch(id, error, Some(false)).await
    }

    async fn touch(&self, id: Uuid, error: &str, eligible: Option<bool>) -> Result<Model> {
        let existing = self.require(id).await?;
        let attempts = existing.attempts.saturating_add(1);
        let mut model: ActiveModel = existing.into();
        model.attempts = Set(attempts);
        model.last_error = Set(Some(error.to_string()));
        model.last_attempt_at = Set(Some(Utc::now().fixed_offset()));
        if let Some(eligible) = eligible {
            model.retry_eligible = Set(eligible);
        }
        Ok(model.update(self.db.as_ref()).await?)
    }

    /// Re-arm an entry for automatic retry.
    pub async fn mark_eligible(&self, id: Uuid) -> Result<Model> {
        let existing = self.require(id).await?;
        let mut model: ActiveModel = existing.into();
        model.retry_eligible = Set(true);
        Ok(model.update(self.db.as_ref()).await?)
    }

    /// Settle every owed full synchronization. Returns how many were removed.
    pub async fn complete_full_syncs(&self) -> Result<u64> {
        let result = RecoveryEntry::delete_many()
            .filter(Column::Operation.eq(OwedOperation::FullSync))
            .exec(self.db.as_ref())
            .await?;
        if result.rows_affected > 0 {
            info!(settled = result.rows_affected, "owed full synchronization settled");
        }
        Ok(result.rows_affected)
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        let entries = self.all().await?;
        let mut stats = QueueStats {
            total: entries.len(),
            ..QueueStats::default()
        };

        for entry in &entries {
            if entry.retry_eligible {
                stats.eligible += 1;
            } else {
                stats.ineligible += 1;
            }
            *stats
                .by_operation
                .entry(entry.operation.to_string())
                .or_default() += 1;
            stats.total_attempts += u64::try_from(entry.attempts).unwrap_or(0);
        }
        stats.oldest = entries.first().map(|e| e.enqueued_at);

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connect_and_migrate;

    async fn queue() -> RecoveryQueue {
        let db = connect_and_migrate("sqlite::memory:")
            .await
            .expect("in-memory database should migrate");
        RecoveryQueue::new(Arc::new(db))
    }

    #[tokio::test]
    async fn enqueue_then_list_in_order() {
        let queue = queue().await;
        let first = queue
            .enqueue(NewRecoveryEntry::branch_sync("main", Some("abc".into()), "fetch exhausted"))
            .await
            .unwrap();
        let second = queue
            .enqueue(NewRecoveryEntry::full_sync("fallback"))
            .await
            .unwrap();

        let all = queue.all().await.unwrap();
        assert_eq!(
            all.iter().map(|e| e.id).collect::<Vec<_>>(),
            vec![first.id, second.id]
        );
        assert_eq!(all[0].target_branch.as_deref(), Some("main"));
        assert_eq!(all[0].target_commit.as_deref(), Some("abc"));
        assert_eq!(all[0].attempts, 0);
        assert!(all[0].retry_eligible);
    }

    #[tokio::test]
    async fn failures_keep_entries_and_count_attempts() {
        let queue = queue().await;
        let entry = queue
            .enqueue(NewRecoveryEntry::branch_sync("dev", None, "timeout"))
            .await
            .unwrap();

        queue.record_failure(entry.id, "still offline").await.unwrap();
        let updated = queue.record_failure(entry.id, "still offline").await.unwrap();

        assert_eq!(updated.attempts, 2);
        assert_eq!(updated.last_error.as_deref(), Some("still offline"));
        assert!(updated.last_attempt_at.is_some());
        assert_eq!(queue.pending().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn ineligible_entries_are_not_pending_until_rearmed() {
        let queue = queue().await;
        let entry = queue
            .enqueue(NewRecoveryEntry::branch_sync("main", None, "conflict").ineligible())
            .await
            .unwrap();
        assert!(queue.pending().await.unwrap().is_empty());
        assert_eq!(queue.all().await.unwrap().len(), 1);

        let rearmed = queue.mark_eligible(entry.id).await.unwrap();
        assert!(rearmed.retry_eligible);
        assert_eq!(queue.pending().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn complete_removes_only_that_entry() {
        let queue = queue().await;
        let a = queue.enqueue(NewRecoveryEntry::push("main", "offline")).await.unwrap();
        let b = queue.enqueue(NewRecoveryEntry::push("dev", "offline")).await.unwrap();

        queue.complete(a.id).await.unwrap();
        let remaining = queue.all().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, b.id);

        let err = queue.complete(a.id).await.unwrap_err();
        assert!(matches!(err, StorageError::EntryNotFound { id } if id == a.id));
    }

    #[tokio::test]
    async fn settles_full_syncs_only() {
        let queue = queue().await;
        queue.enqueue(NewRecoveryEntry::full_sync("fallback 1")).await.unwrap();
        queue.enqueue(NewRecoveryEntry::full_sync("fallback 2")).await.unwrap();
        queue
            .enqueue(NewRecoveryEntry::branch_sync("main", None, "timeout"))
            .await
            .unwrap();

        assert_eq!(queue.complete_full_syncs().await.unwrap(), 2);
        let remaining = queue.all().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].operation, OwedOperation::BranchSync);
    }

    #[tokio::test]
    async fn stats_group_by_operation_and_eligibility() {
        let queue = queue().await;
        let entry = queue
            .enqueue(NewRecoveryEntry::branch_sync("main", None, "timeout"))
            .await
            .unwrap();
        queue.record_failure(entry.id, "again").await.unwrap();
        queue.enqueue(NewRecoveryEntry::full_sync("fallback")).await.unwrap();
        queue
            .enqueue(NewRecoveryEntry::branch_sync("dev", None, "conflict").ineligible())
            .await
            .unwrap();

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.eligible, 2);
        assert_eq!(stats.ineligible, 1);
        assert_eq!(stats.by_operation.get("branch_sync"), Some(&2));
        assert_eq!(stats.by_operation.get("full_sync"), Some(&1));
        assert_eq!(stats.total_attempts, 1);
        assert_eq!(stats.oldest, Some(entry.enqueued_at));
    }

    #[tokio::test]
    async fn unknown_ids_are_reported() {
        let queue = queue().await;
        let id = Uuid::new_v4();
        assert!(matches!(
            queue.mark_eligible(id).await,
            Err(StorageError::EntryNotFound { .. })
        ));
        assert!(queue.get(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn entries_survive_reconnect() {
        let dir = tempfile::tempdir().unwrap();
        let url = crate::db::database_url(dir.path());

        let db = connect_and_migrate(&url).await.unwrap();
        let queue = RecoveryQueue::new(Arc::new(db));
        let entry = queue
            .enqueue(NewRecoveryEntry::full_sync("fallback"))
            .await
            .unwrap();
        drop(queue);

        let db = connect_and_migrate(&url).await.unwrap();
        let queue = RecoveryQueue::new(Arc::new(db));
        let all = queue.all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, entry.id);
    }
}
