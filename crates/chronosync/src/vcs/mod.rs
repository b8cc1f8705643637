//! Version-control backend seam.
//!
//! The engine never touches the repository directly. Local-only operations go
//! through [`LocalRepo`], anything that talks to the remote goes through
//! [`RemoteClient`], and general connectivity is answered by [`NetworkProbe`].
//! [`GitCli`] implements the first two by driving the `git` executable;
//! [`TcpProbe`] implements the third with plain TCP connects.

mod errors;
mod git;
mod network;
mod types;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

pub use errors::{Result, VcsError, VcsErrorKind};
pub use git::GitCli;
pub use network::TcpProbe;
pub use types::{
    AheadBehind, BranchRef, CommitRef, MergeAttempt, Side, UnmergedPath, UnmergedState,
};

/// Prefix under which pre-reset backup refs are created.
pub const BACKUP_REF_PREFIX: &str = "refs/chronosync/backups";

/// Operations on the local working copy. None of these touch the network.
#[async_trait]
pub trait LocalRepo: Send + Sync {
    /// Path of the repository's git directory.
    fn git_dir(&self) -> PathBuf;

    /// Name of the checked-out branch, or `None` when HEAD is detached.
    async fn current_branch(&self) -> Result<Option<String>>;

    /// Read commit metadata for `rev`, labelling it with `branch`.
    async fn read_commit(&self, rev: &str, branch: &str) -> Result<CommitRef>;

    /// Local branch names.
    async fn list_local_branches(&self) -> Result<Vec<String>>;

    /// Remote-tracking branch names for `remote`, without the remote prefix.
    async fn list_remote_branches(&self, remote: &str) -> Result<Vec<String>>;

    /// Whether `rev` resolves to an object.
    async fn ref_exists(&self, rev: &str) -> Result<bool>;

    /// Commit counts of `local` relative to `upstream`.
    async fn ahead_behind(&self, local: &str, upstream: &str) -> Result<AheadBehind>;

    async fn checkout(&self, branch: &str) -> Result<()>;

    /// Create a local branch at `start` without checking it out.
    async fn create_branch(&self, name: &str, start: &str) -> Result<()>;

    /// Merge `rev` into the current branch, using `tiebreak` for hunks git
    /// cannot merge on its own. `message` is used for the merge commit.
    async fn merge(&self, rev: &str, tiebreak: Side, message: &str) -> Result<MergeAttempt>;

    /// Paths left unmerged in the index.
    async fn unmerged_paths(&self) -> Result<Vec<UnmergedPath>>;

    /// Replace the working copy of `path` with one side's version.
    async fn take_side(&self, path: &str, side: Side) -> Result<()>;

    async fn stage(&self, path: &str) -> Result<()>;

    /// Remove `path` from the index and working tree.
    async fn remove(&self, path: &str) -> Result<()>;

    /// Conclude an in-progress merge. Returns the new HEAD id.
    async fn commit(&self, message: &str) -> Result<String>;

    /// Abort any merge, rebase, or cherry-pick in progress.
    async fn abort_in_progress(&self) -> Result<()>;

    /// Hard-reset the current branch and working tree to `rev`.
    async fn hard_reset(&self, rev: &str) -> Result<()>;

    /// Point a backup ref named `name` at `rev`. Returns the full ref name.
    async fn create_backup_ref(&self, name: &str, rev: &str) -> Result<String>;

    /// Backup refs under `prefix`, oldest first.
    async fn list_backup_refs(&self, prefix: &str) -> Result<Vec<String>>;

    async fn delete_ref(&self, refname: &str) -> Result<()>;

    /// Marker files that show an operation is in progress or a lock is held.
    async fn in_progress_markers(&self) -> Result<Vec<String>>;

    /// Bounded `git status` run that proves the repository is readable.
    async fn status_check(&self, timeout: Duration) -> Result<()>;

    /// Tracked paths with uncommitted changes in the index or working tree.
    async fn uncommitted_changes(&self) -> Result<Vec<String>>;
}

/// Operations that contact the remote.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Update remote-tracking refs for `remote`.
    async fn fetch(&self, remote: &str) -> Result<()>;

    /// Lightweight reachability check of `remote`, bounded by `timeout`.
    async fn probe(&self, remote: &str, timeout: Duration) -> Result<()>;

    /// Push `branch` to `remote`.
    async fn push(&self, remote: &str, branch: &str) -> Result<()>;
}

/// General network reachability.
#[async_trait]
pub trait NetworkProbe: Send + Sync {
    async fn reachable(&self) -> bool;
}
