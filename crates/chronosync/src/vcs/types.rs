use std::fmt;

use serde::{Deserialize, Serialize};

/// Metadata of a single commit, read fresh on every synchronization attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRef {
    /// Full object id.
    pub id: String,
    /// Author name.
    pub author: String,
    /// Author email.
    pub email: String,
    /// Full commit message.
    pub message: String,
    /// Commit timestamp in seconds since the epoch, if it could be parsed.
    pub timestamp: Option<i64>,
    /// The ref this commit was read from.
    pub branch: String,
}

impl CommitRef {
    /// Abbreviated object id for logs.
    #[inline]
    #[must_use]
    pub fn short_id(&self) -> &str {
        let end = self.id.len().min(10);
        self.id.get(..end).unwrap_or(&self.id)
    }
}

/// A branch to reconcile and the remote it tracks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BranchRef {
    /// Local branch name (e.g. `main`).
    pub name: String,
    /// Remote name (e.g. `origin`).
    pub remote: String,
}

impl BranchRef {
    pub fn new(name: impl Into<String>, remote: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            remote: remote.into(),
        }
    }

    /// The remote-tracking ref for this branch (e.g. `origin/main`).
    #[must_use]
    pub fn upstream(&self) -> String {
        format!("{}/{}", self.remote, self.name)
    }
}

impl fmt::Display for BranchRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// One side of a divergent pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// The local working copy's branch ("ours" during a merge).
    Local,
    /// The remote-tracking branch ("theirs" during a merge).
    Remote,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Remote => f.write_str("remote"),
        }
    }
}

/// Commit counts between a local branch and its upstream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AheadBehind {
    /// Commits on the local branch not on the upstream.
    pub ahead: u32,
    /// Commits on the upstream not on the local branch.
    pub behind: u32,
}

impl AheadBehind {
    #[inline]
    pub fn is_up_to_date(&self) -> bool {
        self.ahead == 0 && self.behind == 0
    }

    #[inline]
    pub fn is_diverged(&self) -> bool {
        self.ahead > 0 && self.behind > 0
    }
}

/// Result of asking the backend to merge a ref.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeAttempt {
    /// Merge completed (or there was nothing to merge).
    Clean,
    /// Merge stopped with unmerged paths in the index.
    Conflicted,
}

/// Unmerged index state of one path, as reported by `git status --porcelain`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnmergedState {
    /// `UU`
    BothModified,
    /// `AA`
    BothAdded,
    /// `DU`
    DeletedByUs,
    /// `UD`
    DeletedByThem,
    /// `AU`
    AddedByUs,
    /// `UA`
    AddedByThem,
    /// `DD`
    BothDeleted,
}

impl UnmergedState {
    /// Parse a two-letter porcelain status code.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "UU" => Some(Self::BothModified),
            "AA" => Some(Self::BothAdded),
            "DU" => Some(Self::DeletedByUs),
            "UD" => Some(Self::DeletedByThem),
            "AU" => Some(Self::AddedByUs),
            "UA" => Some(Self::AddedByThem),
            "DD" => Some(Self::BothDeleted),
            _ => None,
        }
    }

    /// True when both sides still have the file and only its content differs.
    #[inline]
    pub fn is_content_conflict(&self) -> bool {
        matches!(self, Self::BothModified | Self::BothAdded)
    }

    /// Whether the given side's tree contains the path.
    pub fn present_on(&self, side: Side) -> bool {
        match side {
            Side::Local => matches!(
                self,
                Self::BothModified | Self::BothAdded | Self::DeletedByThem | Self::AddedByUs
            ),
            Side::Remote => matches!(
                self,
                Self::BothModified | Self::BothAdded | Self::DeletedByUs | Self::AddedByThem
            ),
        }
    }
}

/// A path left unmerged by a merge attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnmergedPath {
    pub path: String,
    pub state: UnmergedState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_joins_remote_and_name() {
        let branch = BranchRef::new("feature/x", "origin");
        assert_eq!(branch.upstream(), "origin/feature/x");
        assert_eq!(branch.to_string(), "feature/x");
    }

    #[test]
    fn short_id_handles_short_ids() {
        let mut commit = CommitRef {
            id: "0123456789abcdef".to_string(),
            author: String::new(),
            email: String::new(),
            message: String::new(),
            timestamp: None,
            branch: "main".to_string(),
        };
        assert_eq!(commit.short_id(), "0123456789");
        commit.id = "abc".to_string();
        assert_eq!(commit.short_id(), "abc");
    }

    #[test]
    fn ahead_behind_predicates() {
        assert!(AheadBehind::default().is_up_to_date());
        assert!(
            AheadBehind {
                ahead: 1,
                behind: 2
            }
            .is_diverged()
        );
        assert!(
            !AheadBehind {
                ahead: 0,
                behind: 2
            }
            .is_diverged()
        );
    }

    #[test]
    fn unmerged_state_presence() {
        let deleted_by_us = UnmergedState::from_code("DU").unwrap();
        assert!(!deleted_by_us.present_on(Side::Local));
        assert!(deleted_by_us.present_on(Side::Remote));
        assert!(!deleted_by_us.is_content_conflict());

        let both = UnmergedState::from_code("UU").unwrap();
        assert!(both.present_on(Side::Local) && both.present_on(Side::Remote));
        assert!(both.is_content_conflict());

        let gone = UnmergedState::from_code("DD").unwrap();
        assert!(!gone.present_on(Side::Local) && !gone.present_on(Side::Remote));

        assert!(UnmergedState::from_code("M ").is_none());
    }
}
