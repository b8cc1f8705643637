use std::sync::Mutex;
use std::time::Duration;

use chronosync::retry::AttemptOutcome;
use chronosync::{DrainOutcome, Side, SyncProgress};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

#[derive(Default)]
struct ProgressState {
    /// Spinner for the step in flight.
    spinner: Option<ProgressBar>,
}

/// Interactive progress reporter using indicatif.
///
/// Keeps one spinner for the step in flight; anything worth keeping on screen
/// (decisions, conflict resolutions, queued work) is printed above it.
pub struct InteractiveReporter {
    state: Mutex<ProgressState>,
}

impl InteractiveReporter {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ProgressState::default()),
        }
    }

    fn spinner(state: &mut ProgressState) -> &ProgressBar {
        state.spinner.get_or_insert_with(|| {
            let pb = ProgressBar::new_spinner();
            pb.set_style(Self::spinner_style());
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        })
    }

    fn print(state: &mut ProgressState, line: String) {
        match state.spinner {
            Some(ref pb) => pb.println(line),
            None => eprintln!("{}", line),
        }
    }

    pub fn handle(&self, event: SyncProgress) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        match event {
            SyncProgress::RunStarted { branches, .. } => {
                let pb = Self::spinner(&mut state);
                pb.set_prefix(format!("{:10}", "sync"));
                pb.set_message(format!("Checking health ({} branches)...", branches));
            }

            SyncProgress::HealthChecked { status } => {
                for issue in &status.issues {
                    let line = format!("  {} {}", style("!").yellow(), issue);
                    Self::print(&mut state, line);
                }
            }

            SyncProgress::WaitingForRepository {
                issue,
                waited,
                budget,
            } => {
                Self::spinner(&mut state).set_message(format!(
                    "Repository busy ({}), waited {}s of {}s",
                    issue,
                    waited.as_secs(),
                    budget.as_secs()
                ));
            }

            SyncProgress::Fetching { remote } => {
                let pb = Self::spinner(&mut state);
                pb.set_prefix(format!("{:10}", "fetch"));
                pb.set_message(format!("Fetching {}...", remote));
            }

            SyncProgress::Fetched { remote, attempts } => {
                let note = if attempts > 1 {
                    format!(" after {} attempts", attempts)
                } else {
                    String::new()
                };
                let line = format!("{} Fetched {}{}", style("✓").green(), remote, note);
                Self::print(&mut state, line);
            }

            SyncProgress::Attempt(attempt) => {
                if attempt.outcome != AttemptOutcome::Success {
                    let wait = attempt
                        .backoff
                        .map(|d| format!(", retrying in {}ms", d.as_millis()))
                        .unwrap_or_default();
                    Self::spinner(&mut state).set_message(format!(
                        "{} attempt {} {}{}",
                        attempt.operation, attempt.attempt, attempt.outcome, wait
                    ));
                }
            }

            SyncProgress::BranchStarted { branch } => {
                let pb = Self::spinner(&mut state);
                pb.set_prefix(format!("{:10}", branch));
                pb.set_message("Reconciling...");
            }

            SyncProgress::DecisionMade {
                branch,
                favored,
                rationale,
            } => {
                let side = match favored {
                    Side::Local => style("local").cyan(),
                    Side::Remote => style("remote").magenta(),
                };
                let line = format!("  {} favors {} ({})", style(&branch).bold(), side, rationale);
                Self::print(&mut state, line);
            }

            SyncProgress::ConflictResolved {
                path, resolution, ..
            } => {
                let line = format!("    {} {} {:?}", style("~").dim(), path, resolution);
                Self::print(&mut state, line);
            }

            SyncProgress::ConvergedToRemote { branch, backup_ref } => {
                let line = format!(
                    "  {} {} reset to remote (previous head kept at {})",
                    style("!").red().bold(),
                    branch,
                    backup_ref
                );
                Self::print(&mut state, line);
            }

            SyncProgress::Pushed { branch } => {
                let line = format!("  {} Pushed {}", style("↑").green(), branch);
                Self::print(&mut state, line);
            }

            SyncProgress::BranchFinished { branch, summary } => {
                let line = format!("{} {}: {}", style("✓").green(), branch, summary);
                Self::print(&mut state, line);
            }

            SyncProgress::EnteringFallback { reason } => {
                let line = format!(
                    "{} Remote unavailable, reconciling locally: {}",
                    style("!").yellow().bold(),
                    reason
                );
                Self::print(&mut state, line);
                Self::spinner(&mut state).set_prefix(format!("{:10}", "fallback"));
            }

            SyncProgress::Enqueued {
                entry_id,
                operation,
                branch,
            } => {
                let target = branch.map(|b| format!(" {}", b)).unwrap_or_default();
                let line = format!(
                    "  {} Queued {}{} ({})",
                    style("+").yellow(),
                    operation,
                    target,
                    style(entry_id).dim()
                );
                Self::print(&mut state, line);
            }

            SyncProgress::DrainStarted { entries } => {
                let pb = Self::spinner(&mut state);
                pb.set_prefix(format!("{:10}", "recover"));
                pb.set_message(format!("Retrying {} queued entries...", entries));
            }

            SyncProgress::EntryDrained {
                entry_id,
                operation,
                outcome,
            } => {
                let mark = match outcome {
                    DrainOutcome::Completed => style("✓").green(),
                    DrainOutcome::Skipped | DrainOutcome::Cancelled => style("-").dim(),
                    _ => style("✗").red(),
                };
                let line = format!("{} {} {}", mark, operation, style(entry_id).dim());
                Self::print(&mut state, line);
            }

            SyncProgress::Warning { message } => {
                let line = format!("{} {}", style("!").yellow(), message);
                Self::print(&mut state, line);
            }

            SyncProgress::RunFinished { .. } => {
                if let Some(pb) = state.spinner.take() {
                    pb.finish_and_clear();
                }
            }

            _ => {}
        }
    }

    pub fn finish(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(pb) = state.spinner.take() {
            pb.finish_and_clear();
        }
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::default_spinner()
            .template("{prefix:.bold.cyan} {spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
    }
}

impl Default for InteractiveReporter {
    fn default() -> Self {
        Self::new()
    }
}
