//! Error taxonomy for synchronization runs.
//!
//! Every failure that can leave a component is one of the kinds in
//! [`ErrorKind`]. Transient infrastructure failures are absorbed by the retry
//! controller; everything else surfaces to the caller with the branch and
//! operation that produced it.

use std::path::PathBuf;

use sea_orm::DbErr;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConfigError;
use crate::vcs::VcsError;

/// Coarse classification of a [`SyncError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Lock held, network blip, remote timeout. Always retried.
    TransientInfrastructure,
    /// Content or add/delete conflicts that could not be settled.
    DivergenceConflict,
    /// Repository corruption, failed hard reset. Never retried.
    IrrecoverableLocalState,
    /// Invalid thresholds, missing backend. Fatal at startup.
    ConfigurationError,
    /// Another run holds the advisory lock.
    AlreadyRunning,
    /// Durable state could not be read or written.
    Storage,
}

/// Errors raised while synchronizing a working copy.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("transient failure during {operation}: {message}")]
    Transient { operation: String, message: String },

    #[error("unresolved divergence on {branch}: {message}")]
    Divergence { branch: String, message: String },

    #[error(
        "irrecoverable local state during {operation}{}: {message}",
        branch_suffix(.branch)
    )]
    IrrecoverableLocalState {
        branch: Option<String>,
        operation: String,
        message: String,
    },

    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error("another synchronization run holds the lock at {}", .path.display())]
    AlreadyRunning { path: PathBuf, holder: Option<u32> },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

fn branch_suffix(branch: &Option<String>) -> String {
    match branch {
        Some(branch) => format!(" on {}", branch),
        None => String::new(),
    }
}

impl SyncError {
    /// Create a transient error.
    #[inline]
    pub fn transient(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create an irrecoverable local state error.
    #[inline]
    pub fn irrecoverable(
        branch: Option<&str>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::IrrecoverableLocalState {
            branch: branch.map(str::to_string),
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transient { .. } => ErrorKind::TransientInfrastructure,
            Self::Divergence { .. } => ErrorKind::DivergenceConflict,
            Self::IrrecoverableLocalState { .. } => ErrorKind::IrrecoverableLocalState,
            Self::Configuration(_) => ErrorKind::ConfigurationError,
            Self::AlreadyRunning { .. } => ErrorKind::AlreadyRunning,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Whether the retry controller may attempt the operation again.
    #[inline]
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::TransientInfrastructure
    }

    /// Attach branch context to an irrecoverable error that lacks it.
    pub fn on_branch(self, name: &str) -> Self {
        match self {
            Self::IrrecoverableLocalState {
                branch: None,
                operation,
                message,
            } => Self::IrrecoverableLocalState {
                branch: Some(name.to_string()),
                operation,
                message,
            },
            other => other,
        }
    }
}

impl From<VcsError> for SyncError {
    fn from(err: VcsError) -> Self {
        if err.is_transient() {
            Self::Transient {
                operation: err.operation.clone(),
                message: err.kind.to_string(),
            }
        } else {
            Self::IrrecoverableLocalState {
                branch: None,
                operation: err.operation.clone(),
                message: err.kind.to_string(),
            }
        }
    }
}

impl From<DbErr> for SyncError {
    fn from(err: DbErr) -> Self {
        Self::Storage(StorageError::Database(err))
    }
}

/// Errors from the durable state layer (queue, run log, marker file).
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed state file {}: {source}", .path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Recovery entry not found: {id}")]
    EntryNotFound { id: uuid::Uuid },
}

/// Result type for synchronization operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::vcs::VcsErrorKind;

    #[test]
    fn transient_vcs_errors_map_to_transient() {
        let err: SyncError =
            VcsError::new("fetch", VcsErrorKind::Timeout(Duration::from_secs(10))).into();
        assert_eq!(err.kind(), ErrorKind::TransientInfrastructure);
        assert!(err.is_transient());
        assert!(err.to_string().contains("fetch"));
    }

    #[test]
    fn command_failures_map_to_irrecoverable() {
        let err: SyncError = VcsError::new(
            "reset",
            VcsErrorKind::CommandFailed {
                status: 128,
                stderr: "fatal: bad object".to_string(),
            },
        )
        .into();
        assert_eq!(err.kind(), ErrorKind::IrrecoverableLocalState);
        assert!(!err.is_transient());
    }

    #[test]
    fn on_branch_fills_missing_context_only() {
        let err = SyncError::irrecoverable(None, "reset", "boom").on_branch("main");
        assert!(err.to_string().contains("on main"));

        let err = SyncError::irrecoverable(Some("dev"), "reset", "boom").on_branch("main");
        assert!(err.to_string().contains("on dev"));

        let err = SyncError::transient("fetch", "blip").on_branch("main");
        assert!(!err.to_string().contains("main"));
    }

    #[test]
    fn already_running_mentions_path() {
        let err = SyncError::AlreadyRunning {
            path: PathBuf::from("/tmp/run.lock"),
            holder: Some(42),
        };
        assert_eq!(err.kind(), ErrorKind::AlreadyRunning);
        assert!(err.to_string().contains("/tmp/run.lock"));
    }
}
