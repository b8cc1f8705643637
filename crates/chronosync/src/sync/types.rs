//! Run report types.
//!
//! Every run produces a [`RunReport`] that records, per branch, what happened
//! and why, so a decision like "remote won because LocalAutomatic" can be
//! audited after the fact.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conflict::MergeOutcome;
use crate::error::{ErrorKind, SyncError};
use crate::fallback::FallbackOutcome;
use crate::health::HealthStatus;
use crate::priority::PriorityDecision;

/// Overall result of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every configured branch is reconciled with its upstream.
    FullySynchronized,
    /// Some branches were deferred to the recovery queue or left unresolved.
    PartiallySynchronized,
    /// The remote was unreachable; branches were reconciled locally only.
    FallbackCompleted,
    /// The run stopped on an irrecoverable problem or was cancelled.
    Blocked,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FullySynchronized => "fully_synchronized",
            Self::PartiallySynchronized => "partially_synchronized",
            Self::FallbackCompleted => "fallback_completed",
            Self::Blocked => "blocked",
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a branch was pushed after reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "push", rename_all = "snake_case")]
pub enum PushStatus {
    /// Push disabled or nothing to push.
    #[default]
    NotRequested,
    Pushed,
    /// Push failed and was deferred to the recovery queue.
    Queued { entry_id: Uuid },
}

/// What happened to one branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BranchOutcome {
    /// Local and upstream point at the same history.
    UpToDate,
    /// The local branch did not exist and was created from its upstream.
    Created { head: String },
    /// Local has commits the upstream lacks and nothing to merge.
    LocalAhead { ahead: u32, push: PushStatus },
    /// Divergence settled according to a priority decision.
    Reconciled {
        decision: PriorityDecision,
        merge: MergeOutcome,
        push: PushStatus,
    },
    /// Resolution failed with local favored; parked for manual attention.
    Unresolved {
        decision: PriorityDecision,
        merge: MergeOutcome,
        entry_id: Uuid,
    },
    /// Transient failures exhausted retries; deferred to the recovery queue.
    Queued { entry_id: Uuid, reason: String },
    /// Nothing could be done for this branch.
    Skipped { reason: String },
}

impl BranchOutcome {
    /// Whether the branch needs no further work.
    pub fn is_synchronized(&self) -> bool {
        match self {
            Self::UpToDate | Self::Created { .. } | Self::Skipped { .. } => true,
            Self::LocalAhead { push, .. } | Self::Reconciled { push, .. } => {
                !matches!(push, PushStatus::Queued { .. })
            }
            Self::Unresolved { .. } | Self::Queued { .. } => false,
        }
    }

    /// Short label for tables and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::UpToDate => "up to date",
            Self::Created { .. } => "created",
            Self::LocalAhead { .. } => "local ahead",
            Self::Reconciled { .. } => "reconciled",
            Self::Unresolved { .. } => "unresolved",
            Self::Queued { .. } => "queued",
            Self::Skipped { .. } => "skipped",
        }
    }

    pub fn decision(&self) -> Option<&PriorityDecision> {
        match self {
            Self::Reconciled { decision, .. } | Self::Unresolved { decision, .. } => Some(decision),
            _ => None,
        }
    }
}

/// Outcome for one configured branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchReport {
    pub branch: String,
    pub outcome: BranchOutcome,
}

/// The error that blocked a run, with enough context for manual intervention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FatalContext {
    pub kind: ErrorKind,
    pub branch: Option<String>,
    pub operation: Option<String>,
    pub message: String,
}

impl From<&SyncError> for FatalContext {
    fn from(err: &SyncError) -> Self {
        let (branch, operation) = match err {
            SyncError::IrrecoverableLocalState {
                branch, operation, ..
            } => (branch.clone(), Some(operation.clone())),
            SyncError::Transient { operation, .. } => (None, Some(operation.clone())),
            SyncError::Divergence { branch, .. } => (Some(branch.clone()), None),
            _ => (None, None),
        };
        Self {
            kind: err.kind(),
            branch,
            operation,
            message: err.to_string(),
        }
    }
}

/// Structured record of a complete run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    pub health: Option<HealthStatus>,
    pub branches: Vec<BranchReport>,
    pub fallback: Option<FallbackOutcome>,
    pub fatal: Option<FatalContext>,
    pub cancelled: bool,
    /// Owed full synchronizations settled by this run.
    pub settled_full_syncs: u64,
}

impl RunReport {
    pub(crate) fn new(run_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: started_at,
            outcome: RunOutcome::Blocked,
            health: None,
            branches: Vec::new(),
            fallback: None,
            fatal: None,
            cancelled: false,
            settled_full_syncs: 0,
        }
    }

    /// Outcome implied by the branch results, ignoring fallback.
    pub(crate) fn derive_outcome(&self) -> RunOutcome {
        if self.cancelled || self.fatal.is_some() {
            RunOutcome::Blocked
        } else if self.branches.iter().all(|b| b.outcome.is_synchronized()) {
            RunOutcome::FullySynchronized
        } else {
            RunOutcome::PartiallySynchronized
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.outcome == RunOutcome::Blocked
    }

    pub fn branch(&self, name: &str) -> Option<&BranchOutcome> {
        self.branches
            .iter()
            .find(|b| b.branch == name)
            .map(|b| &b.outcome)
    }
}
