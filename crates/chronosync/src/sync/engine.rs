//! Synchronization orchestrator.
//!
//! [`Engine`] sequences one run: take the run lock, probe health (waiting out a
//! busy repository), fetch, then reconcile each configured branch in order.
//! Remote trouble sends the run into fallback mode; branches whose retries run
//! out are parked in the recovery queue. Every run ends with a stored
//! [`RunReport`].
//!
//! # Example
//!
//! ```ignore
//! use chronosync::sync::Engine;
//!
//! let engine = Engine::builder()
//!     .config(config)
//!     .local(git.clone())
//!     .remote(git)
//!     .network(probe)
//!     .database(db)
//!     .build()?;
//!
//! let report = engine.synchronize().await?;
//! println!("{}", report.outcome);
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::conflict::{ConflictResolver, MergeOutcome};
use crate::entity::owed_operation::OwedOperation;
use crate::entity::recovery_entry::Model as RecoveryEntryModel;
use crate::entity::run_log::LogLevel;
use crate::error::{ErrorKind, SyncError};
use crate::fallback::{FallbackHandler, FallbackMarker};
use crate::health::{Assessment, HealthProber, HealthStatus};
use crate::lock::RunLock;
use crate::priority::{PriorityDecision, PriorityResolver};
use crate::recovery::{
    DrainOutcome, DrainResult, NewRecoveryEntry, QueueStats, RecoveryQueue, drain_and_retry,
};
use crate::retry::{RetryOutcome, run_with_retry};
use crate::run_log::{self, RunLogger};
use crate::vcs::{BranchRef, LocalRepo, NetworkProbe, RemoteClient, Side, VcsError};

use super::progress::{ProgressCallback, SyncProgress, emit};
use super::types::{BranchOutcome, BranchReport, FatalContext, PushStatus, RunOutcome, RunReport};

/// Error type for engine construction.
#[derive(Debug, thiserror::Error)]
pub enum EngineBuildError {
    /// Missing required field in builder.
    #[error("Missing required field: {field}")]
    MissingField { field: &'static str },
}

/// Builder for an [`Engine`].
#[derive(Default)]
pub struct EngineBuilder {
    config: Option<EngineConfig>,
    local: Option<Arc<dyn LocalRepo>>,
    remote: Option<Arc<dyn RemoteClient>>,
    network: Option<Arc<dyn NetworkProbe>>,
    database: Option<Arc<DatabaseConnection>>,
    state_dir: Option<PathBuf>,
    progress: Option<Arc<ProgressCallback>>,
    cancel: Option<CancellationToken>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the local side of the backend.
    pub fn local(mut self, local: Arc<dyn LocalRepo>) -> Self {
        self.local = Some(local);
        self
    }

    /// Set the remote side of the backend.
    pub fn remote(mut self, remote: Arc<dyn RemoteClient>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn network(mut self, network: Arc<dyn NetworkProbe>) -> Self {
        self.network = Some(network);
        self
    }

    pub fn database(mut self, db: Arc<DatabaseConnection>) -> Self {
        self.database = Some(db);
        self
    }

    /// Override the state directory resolved from the configuration.
    pub fn state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(dir.into());
        self
    }

    pub fn progress(mut self, callback: Arc<ProgressCallback>) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Set the token that cancels a run in progress.
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Build the engine.
    ///
    /// # Errors
    ///
    /// Returns `EngineBuildError::MissingField` if a required field is not set.
    pub fn build(self) -> Result<Engine, EngineBuildError> {
        let config = self
            .config
            .ok_or(EngineBuildError::MissingField { field: "config" })?;
        let local = self
            .local
            .ok_or(EngineBuildError::MissingField { field: "local" })?;
        let remote = self
            .remote
            .ok_or(EngineBuildError::MissingField { field: "remote" })?;
        let network = self
            .network
            .ok_or(EngineBuildError::MissingField { field: "network" })?;
        let db = self
            .database
            .ok_or(EngineBuildError::MissingField { field: "database" })?;
        let state_dir = self
            .state_dir
            .unwrap_or_else(|| config.state_dir(&local.git_dir()));

        Ok(Engine {
            config,
            local,
            remote,
            network,
            db,
            state_dir,
            progress: self.progress,
            cancel: self.cancel.unwrap_or_default(),
        })
    }
}

/// Snapshot for `status` queries.
#[derive(Debug, Clone, Serialize)]
pub struct StatusOverview {
    pub health: HealthStatus,
    pub queue: QueueStats,
    pub fallback: Option<FallbackMarker>,
    pub last_run: Option<RunReport>,
}

/// Result of one reconciliation attempt for a branch, before queueing/push.
#[derive(Debug)]
enum BranchStep {
    Skipped(String),
    Created(String),
    UpToDate,
    LocalAhead(u32),
    Merged {
        decision: PriorityDecision,
        merge: MergeOutcome,
    },
}

impl BranchStep {
    /// Whether this step leaves local commits the remote should receive.
    fn wants_push(&self) -> bool {
        match self {
            Self::LocalAhead(_) => true,
            Self::Merged { decision, merge } => {
                decision.favored == Side::Local
                    && merge.is_reconciled()
                    && !matches!(merge, MergeOutcome::ForcedToRemote { .. })
            }
            _ => false,
        }
    }
}

enum Gate {
    Ready(HealthStatus),
    Blocked { status: HealthStatus, waited: Duration },
    Cancelled(HealthStatus),
}

/// The synchronization engine.
pub struct Engine {
    config: EngineConfig,
    local: Arc<dyn LocalRepo>,
    remote: Arc<dyn RemoteClient>,
    network: Arc<dyn NetworkProbe>,
    db: Arc<DatabaseConnection>,
    state_dir: PathBuf,
    progress: Option<Arc<ProgressCallback>>,
    cancel: CancellationToken,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn database(&self) -> &DatabaseConnection {
        &self.db
    }

    pub fn queue(&self) -> RecoveryQueue {
        RecoveryQueue::new(Arc::clone(&self.db))
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn progress(&self) -> Option<&ProgressCallback> {
        self.progress.as_deref()
    }

    fn prober(&self) -> HealthProber {
        HealthProber::new(
            Arc::clone(&self.local),
            Arc::clone(&self.remote),
            Arc::clone(&self.network),
            self.config.remote(),
            self.config.health().clone(),
        )
    }

    /// Probe repository and remote health. Read-only.
    pub async fn status(&self) -> HealthStatus {
        self.prober().probe().await
    }

    /// Health plus queue, fallback and last-run state.
    pub async fn overview(&self) -> Result<StatusOverview, SyncError> {
        let queue = self.queue();
        let (health, stats) = tokio::join!(self.status(), queue.stats());
        Ok(StatusOverview {
            health,
            queue: stats?,
            fallback: FallbackMarker::load(&self.state_dir)?,
            last_run: run_log::recent_runs(&self.db, 1).await?.into_iter().next(),
        })
    }

    /// Recent runs, newest first.
    pub async fn history(&self, limit: u64) -> Result<Vec<RunReport>, SyncError> {
        Ok(run_log::recent_runs(&self.db, limit).await?)
    }

    /// Run one synchronization pass.
    ///
    /// Irrecoverable local state and a repository that never became available
    /// end the run as [`RunOutcome::Blocked`] with a [`FatalContext`]; they are
    /// reported, not returned. `Err` is reserved for a held run lock and
    /// storage failures.
    pub async fn synchronize(&self) -> Result<RunReport, SyncError> {
        let run_id = Uuid::new_v4();
        let _lock = RunLock::acquire(&self.state_dir, run_id)?;
        let logger = RunLogger::new(Arc::clone(&self.db), run_id);
        let mut report = RunReport::new(run_id, Utc::now());

        emit(
            self.progress(),
            SyncProgress::RunStarted {
                run_id,
                branches: self.config.branches().len(),
            },
        );
        logger
            .info(
                None,
                format!(
                    "run started: {} against {}",
                    self.config.branches().join(", "),
                    self.config.remote()
                ),
            )
            .await?;

        let original = self.local.current_branch().await.ok().flatten();

        if let Err(err) = self.run(&mut report, &logger).await {
            if matches!(err.kind(), ErrorKind::Storage | ErrorKind::AlreadyRunning) {
                return Err(err);
            }
            let fatal = FatalContext::from(&err);
            logger
                .error(fatal.branch.as_deref(), format!("run blocked: {err}"))
                .await?;
            report.fatal = Some(fatal);
        }

        if report.fatal.is_none()
            && let Some(branch) = &original
        {
            self.restore_branch(branch).await;
        }

        report.finished_at = Utc::now();
        report.outcome = match report.derive_outcome() {
            RunOutcome::Blocked => RunOutcome::Blocked,
            _ if report.fallback.is_some() => RunOutcome::FallbackCompleted,
            outcome => outcome,
        };

        let level = if report.is_blocked() {
            LogLevel::Error
        } else {
            LogLevel::Info
        };
        logger
            .log(level, None, format!("run finished: {}", report.outcome))
            .await?;
        run_log::save_run(&self.db, &report).await?;
        emit(
            self.progress(),
            SyncProgress::RunFinished {
                outcome: report.outcome,
            },
        );

        Ok(report)
    }

    async fn run(&self, report: &mut RunReport, logger: &RunLogger) -> Result<(), SyncError> {
        let prober = self.prober();

        let status = match self.await_repository(&prober).await {
            Gate::Ready(status) => status,
            Gate::Blocked { status, waited } => {
                let issue = status
                    .issues
                    .iter()
                    .find(|i| i.is_local())
                    .map(ToString::to_string)
                    .unwrap_or_default();
                report.health = Some(status);
                return Err(SyncError::transient(
                    "health",
                    format!(
                        "repository unavailable after waiting {}s: {issue}",
                        waited.as_secs()
                    ),
                ));
            }
            Gate::Cancelled(status) => {
                report.health = Some(status);
                report.cancelled = true;
                return Ok(());
            }
        };

        let assessment = status.assessment();
        report.health = Some(status.clone());
        if assessment == Assessment::Offline {
            let reason = status
                .issues
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            logger
                .warn(None, format!("remote unavailable: {reason}"))
                .await?;
            return self.fallback(report, &reason, logger).await;
        }

        let remote_name = self.config.remote();
        emit(
            self.progress(),
            SyncProgress::Fetching {
                remote: remote_name.to_string(),
            },
        );
        match self.fetch(&prober).await? {
            RetryOutcome::Success { attempts, .. } => {
                emit(
                    self.progress(),
                    SyncProgress::Fetched {
                        remote: remote_name.to_string(),
                        attempts,
                    },
                );
                logger
                    .info(None, format!("fetched {remote_name} ({attempts} attempt(s))"))
                    .await?;
            }
            RetryOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                let reason = format!("fetch failed after {attempts} attempt(s): {last_error}");
                logger.warn(None, reason.clone()).await?;
                return self.fallback(report, &reason, logger).await;
            }
            RetryOutcome::Cancelled { .. } => {
                report.cancelled = true;
                return Ok(());
            }
        }

        for name in self.config.branches() {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            emit(
                self.progress(),
                SyncProgress::BranchStarted {
                    branch: name.clone(),
                },
            );

            let Some(outcome) = self
                .process_branch(name, &prober, report.run_id, logger)
                .await?
            else {
                report.cancelled = true;
                break;
            };

            emit(
                self.progress(),
                SyncProgress::BranchFinished {
                    branch: name.clone(),
                    summary: outcome.label().to_string(),
                },
            );
            report.branches.push(BranchReport {
                branch: name.clone(),
                outcome,
            });
        }

        if report.derive_outcome() == RunOutcome::FullySynchronized {
            report.settled_full_syncs = self.queue().complete_full_syncs().await?;
            if FallbackMarker::clear(&self.state_dir)? {
                logger
                    .info(None, "remote reconciliation complete, fallback marker cleared")
                    .await?;
            }
        }

        Ok(())
    }

    /// Probe until the repository is usable, the wait budget runs out, or the
    /// run is cancelled.
    async fn await_repository(&self, prober: &HealthProber) -> Gate {
        let budget = prober.config().max_wait;
        let poll = prober.config().poll_interval;
        let mut waited = Duration::ZERO;

        loop {
            let status = prober.probe().await;
            emit(
                self.progress(),
                SyncProgress::HealthChecked {
                    status: status.clone(),
                },
            );
            if status.assessment() != Assessment::RepositoryUnavailable {
                return Gate::Ready(status);
            }
            if waited >= budget {
                return Gate::Blocked { status, waited };
            }

            let issue = status
                .issues
                .iter()
                .find(|i| i.is_local())
                .map(ToString::to_string)
                .unwrap_or_default();
            debug!(%issue, waited_ms = waited.as_millis() as u64, "repository busy, waiting");
            emit(
                self.progress(),
                SyncProgress::WaitingForRepository {
                    issue,
                    waited,
                    budget,
                },
            );

            let delay = poll.min(budget.saturating_sub(waited));
            tokio::select! {
                () = self.cancel.cancelled() => return Gate::Cancelled(status),
                () = tokio::time::sleep(delay) => {}
            }
            waited += delay;
        }
    }

    async fn fetch(&self, prober: &HealthProber) -> Result<RetryOutcome<()>, SyncError> {
        let remote = &*self.remote;
        let name = self.config.remote();
        run_with_retry(
            "fetch",
            self.config.retry(),
            &self.cancel,
            move || prober.remote_available(),
            move || async move { remote.fetch(name).await.map_err(SyncError::from) },
            self.progress(),
        )
        .await
    }

    async fn fallback(
        &self,
        report: &mut RunReport,
        reason: &str,
        logger: &RunLogger,
    ) -> Result<(), SyncError> {
        let queue = self.queue();
        let outcome = FallbackHandler::new(
            &*self.local,
            self.config.classifier(),
            &queue,
            &self.state_dir,
            self.config.remote(),
        )
        .with_backup_keep(self.config.backup_keep())
        .with_progress(self.progress())
        .run(self.config.branches(), reason, report.run_id)
        .await?;

        for branch in &outcome.branches {
            logger
                .info(
                    Some(&branch.branch),
                    format!("fallback: {}", branch.outcome.label()),
                )
                .await?;
        }
        report.fallback = Some(outcome);
        Ok(())
    }

    /// Reconcile one branch under the retry controller and turn the result
    /// into a [`BranchOutcome`]. `None` means the run was cancelled.
    async fn process_branch(
        &self,
        name: &str,
        prober: &HealthProber,
        run_id: Uuid,
        logger: &RunLogger,
    ) -> Result<Option<BranchOutcome>, SyncError> {
        let operation = format!("sync {name}");
        let outcome = run_with_retry(
            &operation,
            self.config.retry(),
            &self.cancel,
            move || prober.repository_available(),
            move || self.sync_branch(name),
            self.progress(),
        )
        .await
        .map_err(|e| e.on_branch(name))?;

        let step = match outcome {
            RetryOutcome::Success { value, .. } => value,
            RetryOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                let reason = format!("gave up after {attempts} attempt(s): {last_error}");
                // The branch may not exist locally yet.
                let head = self.local.read_commit(name, name).await.ok().map(|c| c.id);
                let entry = NewRecoveryEntry::branch_sync(name, head, reason.clone()).with_run(run_id);
                let entry_id = self.enqueue(entry).await?;
                logger
                    .warn(Some(name), format!("queued for recovery: {reason}"))
                    .await?;
                return Ok(Some(BranchOutcome::Queued { entry_id, reason }));
            }
            RetryOutcome::Cancelled { .. } => return Ok(None),
        };

        let wants_push = step.wants_push();
        let outcome = match step {
            BranchStep::Skipped(reason) => {
                logger
                    .info(Some(name), format!("skipped: {reason}"))
                    .await?;
                BranchOutcome::Skipped { reason }
            }
            BranchStep::Created(head) => {
                logger
                    .info(Some(name), format!("created from upstream at {head}"))
                    .await?;
                BranchOutcome::Created { head }
            }
            BranchStep::UpToDate => BranchOutcome::UpToDate,
            BranchStep::LocalAhead(ahead) => {
                let Some(push) = self.push(name, wants_push, prober, run_id, logger).await? else {
                    return Ok(None);
                };
                BranchOutcome::LocalAhead { ahead, push }
            }
            BranchStep::Merged { decision, merge } => {
                logger
                    .info(
                        Some(name),
                        format!(
                            "{} favored ({}): local {} vs remote {}",
                            decision.favored,
                            decision.rationale,
                            decision.local.short_id(),
                            decision.remote.short_id()
                        ),
                    )
                    .await?;

                match &merge {
                    MergeOutcome::FatalFailure { reason, .. } => {
                        let entry = NewRecoveryEntry::branch_sync(
                            name,
                            Some(decision.local.id.clone()),
                            reason.clone(),
                        )
                        .ineligible()
                        .with_run(run_id);
                        let entry_id = self.enqueue(entry).await?;
                        logger
                            .error(
                                Some(name),
                                format!("unresolved, needs manual attention: {reason}"),
                            )
                            .await?;
                        return Ok(Some(BranchOutcome::Unresolved {
                            decision,
                            merge,
                            entry_id,
                        }));
                    }
                    MergeOutcome::ForcedToRemote { backup_ref, .. } => {
                        logger
                            .warn(
                                Some(name),
                                format!(
                                    "LAST-RESORT CONVERGENCE: reset to remote, previous head saved at {backup_ref}"
                                ),
                            )
                            .await?;
                    }
                    MergeOutcome::ResolvedWithConflicts { files, .. } => {
                        logger
                            .info(Some(name), format!("{} conflict(s) resolved", files.len()))
                            .await?;
                    }
                    MergeOutcome::Success => {}
                }

                let Some(push) = self.push(name, wants_push, prober, run_id, logger).await? else {
                    return Ok(None);
                };
                BranchOutcome::Reconciled {
                    decision,
                    merge,
                    push,
                }
            }
        };

        Ok(Some(outcome))
    }

    /// One attempt at reconciling `name` with its remote-tracking ref. Local
    /// operations only; the caller fetched beforehand.
    async fn sync_branch(&self, name: &str) -> Result<BranchStep, SyncError> {
        let branch = BranchRef::new(name, self.config.remote());
        let upstream = branch.upstream();
        let local = &*self.local;
        let vcs = |e: VcsError| SyncError::from(e).on_branch(name);

        if !local.ref_exists(&upstream).await.map_err(vcs)? {
            return Ok(BranchStep::Skipped(format!("no remote branch {upstream}")));
        }
        if !local.ref_exists(name).await.map_err(vcs)? {
            local.create_branch(name, &upstream).await.map_err(vcs)?;
            let head = local.read_commit(name, name).await.map_err(vcs)?;
            info!(branch = name, head = head.short_id(), "created from upstream");
            return Ok(BranchStep::Created(head.id));
        }

        let counts = local.ahead_behind(name, &upstream).await.map_err(vcs)?;
        if counts.is_up_to_date() {
            debug!(branch = name, "up to date");
            return Ok(BranchStep::UpToDate);
        }
        if counts.behind == 0 {
            return Ok(BranchStep::LocalAhead(counts.ahead));
        }

        let local_head = local.read_commit(name, name).await.map_err(vcs)?;
        let remote_head = local.read_commit(&upstream, name).await.map_err(vcs)?;
        let decision = PriorityResolver::new(self.config.classifier(), *self.config.thresholds())
            .resolve(local_head, remote_head);
        info!(
            branch = name,
            favored = %decision.favored,
            rationale = %decision.rationale,
            ahead = counts.ahead,
            behind = counts.behind,
            "priority decided"
        );
        emit(
            self.progress(),
            SyncProgress::DecisionMade {
                branch: name.to_string(),
                favored: decision.favored,
                rationale: decision.rationale,
            },
        );

        let merge = ConflictResolver::new(local, self.config.backup_keep())
            .with_progress(self.progress())
            .resolve(&decision, &branch)
            .await?;
        Ok(BranchStep::Merged { decision, merge })
    }

    /// Push `name` if enabled and wanted. `None` means the run was cancelled.
    async fn push(
        &self,
        name: &str,
        wanted: bool,
        prober: &HealthProber,
        run_id: Uuid,
        logger: &RunLogger,
    ) -> Result<Option<PushStatus>, SyncError> {
        if !wanted || !self.config.push_enabled() {
            return Ok(Some(PushStatus::NotRequested));
        }

        let remote = &*self.remote;
        let remote_name = self.config.remote();
        let outcome = run_with_retry(
            &format!("push {name}"),
            self.config.retry(),
            &self.cancel,
            move || prober.remote_available(),
            move || async move {
                remote
                    .push(remote_name, name)
                    .await
                    .map_err(|e| SyncError::from(e).on_branch(name))
            },
            self.progress(),
        )
        .await;

        let (reason, eligible) = match outcome {
            Ok(RetryOutcome::Success { .. }) => {
                emit(
                    self.progress(),
                    SyncProgress::Pushed {
                        branch: name.to_string(),
                    },
                );
                logger.info(Some(name), "pushed").await?;
                return Ok(Some(PushStatus::Pushed));
            }
            Ok(RetryOutcome::Cancelled { .. }) => return Ok(None),
            Ok(RetryOutcome::Exhausted { last_error, .. }) => (last_error, true),
            Err(err) => (err.to_string(), false),
        };

        let mut entry = NewRecoveryEntry::push(name, reason.clone()).with_run(run_id);
        if !eligible {
            entry = entry.ineligible();
        }
        let entry_id = self.enqueue(entry).await?;
        logger
            .warn(Some(name), format!("push deferred: {reason}"))
            .await?;
        Ok(Some(PushStatus::Queued { entry_id }))
    }

    async fn enqueue(&self, entry: NewRecoveryEntry) -> Result<Uuid, SyncError> {
        let saved = self.queue().enqueue(entry).await?;
        emit(
            self.progress(),
            SyncProgress::Enqueued {
                entry_id: saved.id,
                operation: saved.operation,
                branch: saved.target_branch.clone(),
            },
        );
        Ok(saved.id)
    }

    async fn restore_branch(&self, branch: &str) {
        match self.local.current_branch().await {
            Ok(Some(current)) if current == branch => {}
            _ => {
                if let Err(e) = self.local.checkout(branch).await {
                    warn!(branch, error = %e, "could not restore original branch");
                }
            }
        }
    }

    /// Retry every eligible recovery queue entry.
    ///
    /// Holds the run lock for the whole pass. Entries are removed only when
    /// their owed operation succeeds.
    pub async fn drain_recovery(&self) -> Result<Vec<DrainResult>, SyncError> {
        let run_id = Uuid::new_v4();
        let _lock = RunLock::acquire(&self.state_dir, run_id)?;
        let logger = RunLogger::new(Arc::clone(&self.db), run_id);
        let original = self.local.current_branch().await.ok().flatten();
        let prober = self.prober();
        let prober = &prober;
        let queue = self.queue();

        logger.info(None, "recovery pass started").await?;
        let results = drain_and_retry(
            &queue,
            self.config.retry(),
            &self.cancel,
            move || prober.remote_available(),
            move |entry| self.execute_owed(entry),
            self.progress(),
        )
        .await?;

        if let Some(branch) = &original {
            self.restore_branch(branch).await;
        }

        for result in &results {
            let message = format!(
                "recovery {} {}: {:?}",
                result.operation, result.entry_id, result.outcome
            );
            let branch = result.target_branch.as_deref();
            match result.outcome {
                DrainOutcome::Completed | DrainOutcome::Skipped => {
                    logger.info(branch, message).await?
                }
                _ => logger.warn(branch, message).await?,
            }
        }
        let completed = results
            .iter()
            .filter(|r| r.outcome == DrainOutcome::Completed)
            .count();
        logger
            .info(
                None,
                format!("recovery pass finished: {completed} of {} completed", results.len()),
            )
            .await?;

        Ok(results)
    }

    /// Run the operation a queue entry owes, once.
    async fn execute_owed(&self, entry: RecoveryEntryModel) -> Result<(), SyncError> {
        let remote_name = self.config.remote();
        match entry.operation {
            OwedOperation::Push => {
                let branch = owed_branch(&entry)?;
                self.remote
                    .push(remote_name, branch)
                    .await
                    .map_err(|e| SyncError::from(e).on_branch(branch))?;
                emit(
                    self.progress(),
                    SyncProgress::Pushed {
                        branch: branch.to_string(),
                    },
                );
            }
            OwedOperation::BranchSync => {
                let branch = owed_branch(&entry)?;
                self.remote.fetch(remote_name).await?;
                self.settle_owed_branch(branch).await?;
            }
            OwedOperation::FullSync => {
                self.remote.fetch(remote_name).await?;
                for branch in self.config.branches() {
                    self.settle_owed_branch(branch).await?;
                }
                FallbackMarker::clear(&self.state_dir)?;
            }
        }
        Ok(())
    }

    async fn settle_owed_branch(&self, name: &str) -> Result<(), SyncError> {
        let step = self.sync_branch(name).await?;
        if let BranchStep::Merged {
            merge: MergeOutcome::FatalFailure { reason, .. },
            ..
        } = &step
        {
            return Err(SyncError::Divergence {
                branch: name.to_string(),
                message: reason.clone(),
            });
        }
        if step.wants_push() && self.config.push_enabled() {
            self.remote
                .push(self.config.remote(), name)
                .await
                .map_err(|e| SyncError::from(e).on_branch(name))?;
        }
        Ok(())
    }
}

fn owed_branch(entry: &RecoveryEntryModel) -> Result<&str, SyncError> {
    entry.target_branch.as_deref().ok_or_else(|| {
        SyncError::irrecoverable(
            None,
            "recover",
            format!("entry {} has no target branch", entry.id),
        )
    })
}
