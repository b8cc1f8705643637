use std::time::Duration;

use thiserror::Error;

/// Markers in git stderr that indicate the remote could not be reached.
const UNREACHABLE_MARKERS: &[&str] = &[
    "could not resolve host",
    "unable to access",
    "connection refused",
    "connection timed out",
    "network is unreachable",
    "could not read from remote repository",
    "operation timed out",
    "temporary failure in name resolution",
];

/// Markers in git stderr that indicate uncommitted work blocked the operation.
const DIRTY_MARKERS: &[&str] = &[
    "would be overwritten",
    "commit your changes or stash them",
    "you have unstaged changes",
];

/// Markers in git stderr that indicate another process holds a repository lock.
const LOCK_MARKERS: &[&str] = &["index.lock", "unable to create", "another git process"];

/// A failed call into the version-control backend.
#[derive(Debug, Error)]
#[error("git {operation} failed: {kind}")]
pub struct VcsError {
    /// The backend operation that failed (e.g. `fetch`, `merge`).
    pub operation: String,
    /// What went wrong.
    pub kind: VcsErrorKind,
}

/// Failure modes of a backend call.
#[derive(Debug, Error)]
pub enum VcsErrorKind {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("remote unreachable: {0}")]
    Unreachable(String),

    #[error("repository lock held: {0}")]
    LockHeld(String),

    #[error("uncommitted changes in the working tree: {0}")]
    DirtyWorktree(String),

    #[error("exit status {status}: {stderr}")]
    CommandFailed { status: i32, stderr: String },

    #[error("could not spawn git: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("unexpected output: {0}")]
    Parse(String),
}

impl VcsError {
    #[inline]
    pub fn new(operation: impl Into<String>, kind: VcsErrorKind) -> Self {
        Self {
            operation: operation.into(),
            kind,
        }
    }

    /// Build an error from a non-zero git exit, classifying by stderr.
    pub fn from_exit(operation: impl Into<String>, status: i32, stderr: &str) -> Self {
        let lowered = stderr.to_ascii_lowercase();
        let message = first_line(stderr);

        let kind = if DIRTY_MARKERS.iter().any(|m| lowered.contains(m)) {
            VcsErrorKind::DirtyWorktree(message)
        } else if LOCK_MARKERS.iter().any(|m| lowered.contains(m)) {
            VcsErrorKind::LockHeld(message)
        } else if UNREACHABLE_MARKERS.iter().any(|m| lowered.contains(m)) {
            VcsErrorKind::Unreachable(message)
        } else {
            VcsErrorKind::CommandFailed {
                status,
                stderr: message,
            }
        };

        Self::new(operation, kind)
    }

    /// Create a parse error.
    #[inline]
    pub fn parse(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(operation, VcsErrorKind::Parse(message.into()))
    }

    /// Whether retrying the same call later may succeed.
    ///
    /// A dirty working tree counts: someone is editing and may commit or
    /// revert before the next attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            VcsErrorKind::Timeout(_)
                | VcsErrorKind::Unreachable(_)
                | VcsErrorKind::LockHeld(_)
                | VcsErrorKind::DirtyWorktree(_)
        )
    }
}

fn first_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("")
        .to_string()
}

/// Result type for backend operations.
pub type Result<T> = std::result::Result<T, VcsError>;
