//! Chronosync - temporal-priority synchronization for git working copies.
//!
//! Reconciles a local working copy with a set of prioritized remote branches
//! without human conflict resolution. For each divergent branch a priority
//! decision (automated contributions first, then fresher manual edits, then
//! the remote) picks the side whose content wins; transient failures are
//! retried with backoff; an unreachable remote degrades to a local-only
//! fallback; and unfinished work is kept in a durable recovery queue.
//!
//! # Features
//!
//! - `migrate` - Enables database migration support. When enabled, you can use
//!   [`connect_and_migrate`] and [`db::open_state`] to prepare the state
//!   database on connection.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use chronosync::{EngineSettings, Engine, GitCli, TcpProbe, db};
//!
//! let config = EngineSettings::default().validate()?;
//! let git = Arc::new(GitCli::open(config.repo_path(), config.command_timeout()).await?);
//! let state_dir = config.state_dir(&git.git_dir());
//! let db = db::open_state(&state_dir).await?;
//!
//! let engine = Engine::builder()
//!     .network(Arc::new(TcpProbe::new(config.health().probe_hosts.clone(), config.health().connect_timeout)))
//!     .local(git.clone())
//!     .remote(git)
//!     .database(Arc::new(db))
//!     .config(config)
//!     .build()?;
//!
//! let report = engine.synchronize().await?;
//! ```

pub mod classify;
pub mod config;
pub mod conflict;
pub mod db;
pub mod entity;
pub mod error;
pub mod fallback;
pub mod health;
pub mod lock;
pub mod priority;
pub mod recovery;
pub mod retry;
pub mod run_log;
pub mod sync;
pub mod vcs;

#[cfg(feature = "migrate")]
pub mod migration;

#[cfg(test)]
mod test_support;

pub use classify::{CommitClass, CommitClassifier};
pub use config::{ConfigError, EngineConfig, EngineSettings};
pub use conflict::{ConflictFile, ConflictKind, MergeOutcome, Resolution};
pub use db::connect;
#[cfg(feature = "migrate")]
pub use db::connect_and_migrate;
pub use entity::prelude::*;
pub use error::{ErrorKind, Result, StorageError, SyncError};
pub use fallback::{FallbackMarker, FallbackOutcome};
pub use health::{Assessment, HealthConfig, HealthIssue, HealthProber, HealthStatus};
pub use priority::{PriorityDecision, PriorityResolver, Rationale, Thresholds};
pub use recovery::{DrainOutcome, DrainResult, NewRecoveryEntry, QueueStats, RecoveryQueue};
pub use retry::{RetryConfig, RetryOutcome, SyncAttempt};
pub use sync::{
    BranchOutcome, Engine, ProgressCallback, RunOutcome, RunReport, StatusOverview, SyncProgress,
};
pub use vcs::{BranchRef, CommitRef, GitCli, LocalRepo, NetworkProbe, RemoteClient, Side, TcpProbe};
