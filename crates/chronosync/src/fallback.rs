//! Fallback mode: local-only reconciliation while the remote is unreachable.
//!
//! The handler only holds a [`LocalRepo`], so it has no way to reach the
//! remote. Divergent branches are merged against their last-fetched
//! remote-tracking refs with the local side favored, a marker records that a
//! remote sync is owed, and exactly one `FullSync` entry is queued.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::classify::CommitClassifier;
use crate::conflict::{ConflictResolver, MergeOutcome};
use crate::error::{StorageError, SyncError};
use crate::priority::PriorityDecision;
use crate::recovery::{NewRecoveryEntry, RecoveryQueue};
use crate::sync::{ProgressCallback, SyncProgress, emit};
use crate::vcs::{BranchRef, LocalRepo};

pub const MARKER_FILE_NAME: &str = "fallback.json";

/// Durable record that fallback happened and a remote sync is owed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackMarker {
    pub entered_at: DateTime<Utc>,
    pub reason: String,
    pub branches: Vec<String>,
    pub run_id: Uuid,
    pub remote_sync_owed: bool,
}

impl FallbackMarker {
    pub fn path(state_dir: &Path) -> PathBuf {
        state_dir.join(MARKER_FILE_NAME)
    }

    /// Read the marker, if one exists.
    pub fn load(state_dir: &Path) -> Result<Option<Self>, StorageError> {
        let path = Self::path(state_dir);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StorageError::Io { path, source }),
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|source| StorageError::Malformed { path, source })
    }

    /// Write atomically through a temp file in the same directory.
    pub fn write(&self, state_dir: &Path) -> Result<(), StorageError> {
        let path = Self::path(state_dir);
        let tmp = path.with_extension("json.tmp");
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| StorageError::Io { path, source }
        };

        fs::create_dir_all(state_dir).map_err(io_err(state_dir))?;
        let json = serde_json::to_vec_pretty(self).map_err(|source| StorageError::Malformed {
            path: path.clone(),
            source,
        })?;
        let mut file = fs::File::create(&tmp).map_err(io_err(&tmp))?;
        file.write_all(&json).map_err(io_err(&tmp))?;
        file.sync_all().map_err(io_err(&tmp))?;
        fs::rename(&tmp, &path).map_err(io_err(&path))?;
        Ok(())
    }

    /// Remove the marker. Returns whether one existed.
    pub fn clear(state_dir: &Path) -> Result<bool, StorageError> {
        let path = Self::path(state_dir);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(StorageError::Io { path, source }),
        }
    }
}

/// What fallback did with one branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FallbackBranchOutcome {
    UpToDate,
    Merged {
        decision: PriorityDecision,
        merge: MergeOutcome,
    },
    Skipped {
        reason: String,
    },
    /// A transient local failure; the owed full sync covers it.
    Failed {
        error: String,
    },
}

impl FallbackBranchOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::UpToDate => "up to date",
            Self::Merged { merge, .. } if merge.is_reconciled() => "merged locally",
            Self::Merged { .. } => "unresolved",
            Self::Skipped { .. } => "skipped",
            Self::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackBranch {
    pub branch: String,
    pub outcome: FallbackBranchOutcome,
}

/// Result of a fallback pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackOutcome {
    pub reason: String,
    pub branches: Vec<FallbackBranch>,
    pub marker: PathBuf,
    /// The queued `FullSync` entry.
    pub entry_id: Uuid,
}

pub struct FallbackHandler<'a> {
    repo: &'a dyn LocalRepo,
    classifier: &'a CommitClassifier,
    queue: &'a RecoveryQueue,
    state_dir: &'a Path,
    remote: &'a str,
    backup_keep: usize,
    on_progress: Option<&'a ProgressCallback>,
}

impl<'a> FallbackHandler<'a> {
    pub fn new(
        repo: &'a dyn LocalRepo,
        classifier: &'a CommitClassifier,
        queue: &'a RecoveryQueue,
        state_dir: &'a Path,
        remote: &'a str,
    ) -> Self {
        Self {
            repo,
            classifier,
            queue,
            state_dir,
            remote,
            backup_keep: crate::config::DEFAULT_BACKUP_KEEP,
            on_progress: None,
        }
    }

    #[must_use]
    pub fn with_backup_keep(mut self, keep: usize) -> Self {
        self.backup_keep = keep;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, on_progress: Option<&'a ProgressCallback>) -> Self {
        self.on_progress = on_progress;
        self
    }

    /// Reconcile `branches` locally, then record the owed remote sync.
    ///
    /// Only irrecoverable local state is returned as `Err`.
    pub async fn run(
        &self,
        branches: &[String],
        reason: &str,
        run_id: Uuid,
    ) -> Result<FallbackOutcome, SyncError> {
        emit(
            self.on_progress,
            SyncProgress::EnteringFallback {
                reason: reason.to_string(),
            },
        );
        warn!(%reason, branches = branches.len(), "entering fallback mode");

        let mut results = Vec::with_capacity(branches.len());
        for name in branches {
            let branch = BranchRef::new(name.clone(), self.remote);
            let outcome = match self.reconcile(&branch).await {
                Ok(outcome) => outcome,
                Err(e) if e.is_transient() => {
                    warn!(branch = %branch, error = %e, "fallback merge failed");
                    FallbackBranchOutcome::Failed {
                        error: e.to_string(),
                    }
                }
                Err(e) => return Err(e),
            };
            results.push(FallbackBranch {
                branch: name.clone(),
                outcome,
            });
        }

        let marker = FallbackMarker {
            entered_at: Utc::now(),
            reason: reason.to_string(),
            branches: branches.to_vec(),
            run_id,
            remote_sync_owed: true,
        };
        marker.write(self.state_dir)?;

        let entry = self
            .queue
            .enqueue(NewRecoveryEntry::full_sync(reason).with_run(run_id))
            .await?;
        emit(
            self.on_progress,
            SyncProgress::Enqueued {
                entry_id: entry.id,
                operation: entry.operation,
                branch: None,
            },
        );
        info!(entry = %entry.id, "fallback complete, remote sync owed");

        Ok(FallbackOutcome {
            reason: reason.to_string(),
            branches: results,
            marker: FallbackMarker::path(self.state_dir),
            entry_id: entry.id,
        })
    }

    async fn reconcile(&self, branch: &BranchRef) -> Result<FallbackBranchOutcome, SyncError> {
        let upstream = branch.upstream();
        let on_branch = |e: crate::vcs::VcsError| SyncError::from(e).on_branch(&branch.name);

        if !self.repo.ref_exists(&branch.name).await.map_err(on_branch)? {
            return Ok(FallbackBranchOutcome::Skipped {
                reason: "no local branch".to_string(),
            });
        }
        if !self.repo.ref_exists(&upstream).await.map_err(on_branch)? {
            return Ok(FallbackBranchOutcome::Skipped {
                reason: format!("no remote-tracking ref {upstream}"),
            });
        }

        let counts = self
            .repo
            .ahead_behind(&branch.name, &upstream)
            .await
            .map_err(on_branch)?;
        if counts.behind == 0 {
            return Ok(FallbackBranchOutcome::UpToDate);
        }

        let local = self
            .repo
            .read_commit(&branch.name, &branch.name)
            .await
            .map_err(on_branch)?;
        let remote = self
            .repo
            .read_commit(&upstream, &branch.name)
            .await
            .map_err(on_branch)?;
        let decision = PriorityDecision::offline(self.classifier, local, remote);
        emit(
            self.on_progress,
            SyncProgress::DecisionMade {
                branch: branch.name.clone(),
                favored: decision.favored,
                rationale: decision.rationale,
            },
        );

        let merge = ConflictResolver::new(self.repo, self.backup_keep)
            .with_progress(self.on_progress)
            .resolve(&decision, branch)
            .await?;
        Ok(FallbackBranchOutcome::Merged { decision, merge })
    }
}
