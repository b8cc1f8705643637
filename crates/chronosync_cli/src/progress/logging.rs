use chronosync::SyncProgress;
use chronosync::retry::AttemptOutcome;

/// Logging reporter using tracing for structured output.
pub struct LoggingReporter;

impl LoggingReporter {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, event: SyncProgress) {
        match event {
            SyncProgress::RunStarted { run_id, branches } => {
                tracing::info!(%run_id, branches, "Run started");
            }

            SyncProgress::HealthChecked { status } => {
                if status.is_healthy() {
                    tracing::info!("Repository healthy");
                } else {
                    let issues: Vec<String> =
                        status.issues.iter().map(ToString::to_string).collect();
                    tracing::warn!(issues = ?issues, "Health check reported issues");
                }
            }

            SyncProgress::WaitingForRepository {
                issue,
                waited,
                budget,
            } => {
                tracing::info!(
                    issue = %issue,
                    waited_secs = waited.as_secs(),
                    budget_secs = budget.as_secs(),
                    "Waiting for repository"
                );
            }

            SyncProgress::Fetching { remote } => {
                tracing::debug!(remote = %remote, "Fetching");
            }

            SyncProgress::Fetched { remote, attempts } => {
                tracing::info!(remote = %remote, attempts, "Fetched");
            }

            SyncProgress::Attempt(attempt) => match attempt.outcome {
                AttemptOutcome::Success => {
                    tracing::debug!(operation = %attempt.operation, attempt = attempt.attempt, "Attempt succeeded");
                }
                outcome => {
                    tracing::warn!(
                        operation = %attempt.operation,
                        attempt = attempt.attempt,
                        outcome = %outcome,
                        delay_ms = attempt.backoff.map(|d| d.as_millis() as u64),
                        detail = attempt.detail.as_deref().unwrap_or(""),
                        "Attempt failed"
                    );
                }
            },

            SyncProgress::BranchStarted { branch } => {
                tracing::debug!(branch = %branch, "Reconciling branch");
            }

            SyncProgress::DecisionMade {
                branch,
                favored,
                rationale,
            } => {
                tracing::info!(branch = %branch, favored = %favored, rationale = %rationale, "Priority decision");
            }

            SyncProgress::ConflictResolved {
                branch,
                path,
                resolution,
            } => {
                tracing::info!(branch = %branch, path = %path, resolution = ?resolution, "Conflict resolved");
            }

            SyncProgress::ConvergedToRemote { branch, backup_ref } => {
                tracing::warn!(branch = %branch, backup_ref = %backup_ref, "Converged to remote");
            }

            SyncProgress::Pushed { branch } => {
                tracing::info!(branch = %branch, "Pushed");
            }

            SyncProgress::BranchFinished { branch, summary } => {
                tracing::info!(branch = %branch, summary = %summary, "Branch finished");
            }

            SyncProgress::EnteringFallback { reason } => {
                tracing::warn!(reason = %reason, "Entering fallback mode");
            }

            SyncProgress::Enqueued {
                entry_id,
                operation,
                branch,
            } => {
                tracing::warn!(%entry_id, operation = %operation, branch = ?branch, "Queued for recovery");
            }

            SyncProgress::DrainStarted { entries } => {
                tracing::info!(entries, "Draining recovery queue");
            }

            SyncProgress::EntryDrained {
                entry_id,
                operation,
                outcome,
            } => {
                tracing::info!(%entry_id, operation = %operation, outcome = ?outcome, "Recovery entry processed");
            }

            SyncProgress::Warning { message } => {
                tracing::warn!("{}", message);
            }

            SyncProgress::RunFinished { outcome } => {
                tracing::info!(outcome = %outcome, "Run finished");
            }

            _ => {}
        }
    }
}

impl Default for LoggingReporter {
    fn default() -> Self {
        Self::new()
    }
}
