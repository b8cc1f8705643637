//! Conflict resolution for a single branch.
//!
//! Merges the upstream into the target branch using the favored side as the
//! tiebreak, settles every unmerged path in favor of that side, and commits.
//! When that commit fails and the remote was favored, the branch is converged
//! onto the remote after saving a backup ref. That step discards local
//! history and is always logged at `warn`. It never runs over uncommitted
//! changes: a dirty working tree stops resolution before the merge starts.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::priority::PriorityDecision;
use crate::sync::{ProgressCallback, SyncProgress, emit};
use crate::vcs::{
    BACKUP_REF_PREFIX, BranchRef, LocalRepo, MergeAttempt, Side, UnmergedPath, VcsError,
    VcsErrorKind,
};

/// Subject prefix of resolution commits. It carries an automation marker so
/// the classifier labels these commits `Automatic` on later runs.
pub const RESOLUTION_SUBJECT: &str = "Auto-merge";

/// Shape of a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictKind {
    /// Both sides changed the file.
    Content,
    /// One side deleted what the other changed or added.
    AddDelete,
}

/// How a conflicted path was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    TookLocal,
    TookRemote,
    Removed,
}

impl Resolution {
    fn took(side: Side) -> Self {
        match side {
            Side::Local => Self::TookLocal,
            Side::Remote => Self::TookRemote,
        }
    }
}

/// One conflicted path and what was done with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictFile {
    pub path: String,
    pub kind: ConflictKind,
    pub resolution: Resolution,
}

/// Result of reconciling one branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum MergeOutcome {
    /// Nothing to merge, or the merge applied without conflicts.
    Success,
    /// Conflicts were settled and the resolution committed.
    ResolvedWithConflicts {
        files: Vec<ConflictFile>,
        commit: String,
    },
    /// Ordinary resolution failed; the branch now matches the remote.
    ForcedToRemote {
        files: Vec<ConflictFile>,
        backup_ref: String,
        remote_head: String,
    },
    /// Ordinary resolution failed with the local side favored. The merge was
    /// rolled back and the branch left as it was.
    FatalFailure {
        files: Vec<ConflictFile>,
        reason: String,
    },
}

impl MergeOutcome {
    pub fn conflicts(&self) -> &[ConflictFile] {
        match self {
            Self::Success => &[],
            Self::ResolvedWithConflicts { files, .. }
            | Self::ForcedToRemote { files, .. }
            | Self::FatalFailure { files, .. } => files,
        }
    }

    /// Whether the branch ended reconciled with its upstream.
    pub fn is_reconciled(&self) -> bool {
        !matches!(self, Self::FatalFailure { .. })
    }
}

fn resolution_message(decision: &PriorityDecision, branch: &BranchRef, conflicts: usize) -> String {
    format!(
        "{RESOLUTION_SUBJECT} {} into {} (chronosync)\n\nFavored {} side ({}), {conflicts} conflicted path(s) resolved.",
        branch.upstream(),
        branch.name,
        decision.favored,
        decision.rationale,
    )
}

/// Applies a [`PriorityDecision`] to a branch.
pub struct ConflictResolver<'a> {
    repo: &'a dyn LocalRepo,
    backup_keep: usize,
    on_progress: Option<&'a ProgressCallback>,
}

impl<'a> ConflictResolver<'a> {
    pub fn new(repo: &'a dyn LocalRepo, backup_keep: usize) -> Self {
        Self {
            repo,
            backup_keep,
            on_progress: None,
        }
    }

    #[must_use]
    pub fn with_progress(mut self, on_progress: Option<&'a ProgressCallback>) -> Self {
        self.on_progress = on_progress;
        self
    }

    /// Reconcile `branch` with its upstream according to `decision`.
    ///
    /// Transient backend failures roll back any partial merge and are returned
    /// as `Err` so the caller's retry loop can try again. Uncommitted changes
    /// in the working tree are one of those: nothing is touched and the caller
    /// waits. Running this on an already reconciled branch is a no-op.
    pub async fn resolve(
        &self,
        decision: &PriorityDecision,
        branch: &BranchRef,
    ) -> Result<MergeOutcome, SyncError> {
        let upstream = branch.upstream();
        let favored = decision.favored;

        self.repo
            .checkout(&branch.name)
            .await
            .map_err(|e| SyncError::from(e).on_branch(&branch.name))?;

        let counts = self
            .repo
            .ahead_behind(&branch.name, &upstream)
            .await
            .map_err(|e| SyncError::from(e).on_branch(&branch.name))?;
        if counts.behind == 0 {
            debug!(branch = %branch, "nothing to merge");
            return Ok(MergeOutcome::Success);
        }

        self.ensure_clean(branch).await?;

        let message = resolution_message(decision, branch, 0);
        let attempt = match self.repo.merge(&upstream, favored, &message).await {
            Ok(attempt) => attempt,
            Err(e) if e.is_transient() => return Err(self.rollback(branch, e.into()).await),
            // The merge never got as far as a resolution; leave the branch alone.
            Err(e) => return self.abandon(branch, Vec::new(), e.to_string()).await,
        };

        if attempt == MergeAttempt::Clean {
            info!(branch = %branch, %favored, "merged without conflicts");
            return Ok(MergeOutcome::Success);
        }

        let unmerged = match self.repo.unmerged_paths().await {
            Ok(paths) => paths,
            Err(e) if e.is_transient() => return Err(self.rollback(branch, e.into()).await),
            Err(e) => return self.abandon(branch, Vec::new(), e.to_string()).await,
        };

        let mut files = Vec::with_capacity(unmerged.len());
        for path in &unmerged {
            match self.settle(path, favored).await {
                Ok(file) => {
                    emit(
                        self.on_progress,
                        SyncProgress::ConflictResolved {
                            branch: branch.name.clone(),
                            path: file.path.clone(),
                            resolution: file.resolution,
                        },
                    );
                    files.push(file);
                }
                Err(e) if e.is_transient() => return Err(self.rollback(branch, e.into()).await),
                Err(e) => return self.abandon(branch, files, e.to_string()).await,
            }
        }

        let message = resolution_message(decision, branch, files.len());
        match self.repo.commit(&message).await {
            Ok(commit) => {
                info!(branch = %branch, conflicts = files.len(), %commit, "conflicts resolved");
                Ok(MergeOutcome::ResolvedWithConflicts { files, commit })
            }
            Err(e) if e.is_transient() => Err(self.rollback(branch, e.into()).await),
            Err(e) => self.escalate(decision, branch, files, e.to_string()).await,
        }
    }

    async fn settle(&self, unmerged: &UnmergedPath, favored: Side) -> crate::vcs::Result<ConflictFile> {
        let path = unmerged.path.as_str();

        if unmerged.state.is_content_conflict() {
            self.repo.take_side(path, favored).await?;
            self.repo.stage(path).await?;
            return Ok(ConflictFile {
                path: path.to_string(),
                kind: ConflictKind::Content,
                resolution: Resolution::took(favored),
            });
        }

        // Favored side kept the file: keep it, unless its content is unavailable.
        let resolution = if unmerged.state.present_on(favored) {
            match self.repo.take_side(path, favored).await {
                Ok(()) => {
                    self.repo.stage(path).await?;
                    Resolution::took(favored)
                }
                Err(e) if e.is_transient() => return Err(e),
                Err(e) => {
                    debug!(path, error = %e, "favored content unavailable, removing");
                    self.repo.remove(path).await?;
                    Resolution::Removed
                }
            }
        } else {
            self.repo.remove(path).await?;
            Resolution::Removed
        };

        Ok(ConflictFile {
            path: path.to_string(),
            kind: ConflictKind::AddDelete,
            resolution,
        })
    }

    /// Abort the partial merge and hand back `err`.
    async fn rollback(&self, branch: &BranchRef, err: SyncError) -> SyncError {
        if let Err(abort) = self.repo.abort_in_progress().await {
            warn!(branch = %branch, error = %abort, "failed to abort partial merge");
        }
        err.on_branch(&branch.name)
    }

    /// Refuse to start while tracked files carry uncommitted changes.
    async fn ensure_clean(&self, branch: &BranchRef) -> Result<(), SyncError> {
        let dirty = self
            .repo
            .uncommitted_changes()
            .await
            .map_err(|e| SyncError::from(e).on_branch(&branch.name))?;
        if dirty.is_empty() {
            return Ok(());
        }

        debug!(branch = %branch, paths = dirty.len(), "working tree has uncommitted changes");
        let err = VcsError::new("merge", VcsErrorKind::DirtyWorktree(dirty.join(", ")));
        Err(SyncError::from(err).on_branch(&branch.name))
    }

    /// The resolution commit failed. Converge onto the remote when it was
    /// favored, otherwise roll back.
    async fn escalate(
        &self,
        decision: &PriorityDecision,
        branch: &BranchRef,
        files: Vec<ConflictFile>,
        reason: String,
    ) -> Result<MergeOutcome, SyncError> {
        if decision.favored == Side::Remote {
            return self.converge_to_remote(decision, branch, files, reason).await;
        }
        self.abandon(branch, files, reason).await
    }

    /// Roll back whatever the merge left behind and report the branch as
    /// unresolved.
    async fn abandon(
        &self,
        branch: &BranchRef,
        files: Vec<ConflictFile>,
        reason: String,
    ) -> Result<MergeOutcome, SyncError> {
        warn!(branch = %branch, %reason, "resolution failed, rolling back");
        self.repo.abort_in_progress().await.map_err(|e| {
            SyncError::irrecoverable(Some(branch.name.as_str()), "abort", e.to_string())
        })?;
        Ok(MergeOutcome::FatalFailure { files, reason })
    }

    /// Reset the branch to its upstream after saving a backup ref.
    async fn converge_to_remote(
        &self,
        decision: &PriorityDecision,
        branch: &BranchRef,
        files: Vec<ConflictFile>,
        reason: String,
    ) -> Result<MergeOutcome, SyncError> {
        let upstream = branch.upstream();
        let fatal = |operation: &str, e: VcsError| {
            SyncError::irrecoverable(Some(branch.name.as_str()), operation, e.to_string())
        };

        self.repo
            .abort_in_progress()
            .await
            .map_err(|e| fatal("abort", e))?;

        // A hard reset would take these with it and no backup ref holds them.
        let dirty = self
            .repo
            .uncommitted_changes()
            .await
            .map_err(|e| fatal("status", e))?;
        if !dirty.is_empty() {
            warn!(
                branch = %branch,
                paths = dirty.len(),
                "uncommitted changes present, not resetting to remote"
            );
            return Ok(MergeOutcome::FatalFailure {
                files,
                reason: format!(
                    "{reason}; reset to remote skipped, uncommitted changes in {}",
                    dirty.join(", ")
                ),
            });
        }

        warn!(
            branch = %branch,
            %upstream,
            %reason,
            "LAST-RESORT CONVERGENCE: discarding local divergent state and resetting to remote"
        );

        let stamp = Utc::now().format("%Y%m%dT%H%M%S%3fZ");
        let backup_ref = self
            .repo
            .create_backup_ref(&format!("{}/{stamp}", branch.name), "HEAD")
            .await
            .map_err(|e| fatal("backup", e))?;

        self.repo
            .hard_reset(&upstream)
            .await
            .map_err(|e| fatal("reset", e))?;

        self.rotate_backups(branch).await;

        emit(
            self.on_progress,
            SyncProgress::ConvergedToRemote {
                branch: branch.name.clone(),
                backup_ref: backup_ref.clone(),
            },
        );

        Ok(MergeOutcome::ForcedToRemote {
            files,
            backup_ref,
            remote_head: decision.remote.id.clone(),
        })
    }

    /// Delete the oldest backup refs beyond the configured limit.
    async fn rotate_backups(&self, branch: &BranchRef) {
        let prefix = format!("{BACKUP_REF_PREFIX}/{}", branch.name);
        let refs = match self.repo.list_backup_refs(&prefix).await {
            Ok(refs) => refs,
            Err(e) => {
                warn!(branch = %branch, error = %e, "could not list backup refs");
                return;
            }
        };

        let excess = refs.len().saturating_sub(self.backup_keep);
        for refname in refs.iter().take(excess) {
            if let Err(e) = self.repo.delete_ref(refname).await {
                warn!(refname, error = %e, "could not delete old backup ref");
            }
        }
    }
}
