use std::process::ExitCode;
use std::sync::Arc;

use chronosync::fallback::FallbackBranchOutcome;
use chronosync::sync::PushStatus;
use chronosync::{BranchOutcome, EngineSettings, MergeOutcome, RunOutcome, RunReport};
use console::style;
use tokio_util::sync::CancellationToken;

use super::shared::{OutputFormat, build_engine, print_rows, truncate};
use crate::progress::ProgressReporter;

/// Exit status for a run that stopped without completing.
pub(crate) const BLOCKED_EXIT_CODE: u8 = 2;

#[derive(Debug, Clone, serde::Serialize, tabled::Tabled)]
pub(crate) struct BranchRow {
    #[tabled(rename = "Branch")]
    pub branch: String,
    #[tabled(rename = "Result")]
    pub result: String,
    #[tabled(rename = "Favored")]
    pub favored: String,
    #[tabled(rename = "Rationale")]
    pub rationale: String,
    #[tabled(rename = "Detail")]
    pub detail: String,
}

pub(crate) async fn handle_sync(
    settings: EngineSettings,
    output: OutputFormat,
    cancel: CancellationToken,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let reporter = Arc::new(ProgressReporter::new());
    let progress = match output {
        OutputFormat::Table => Some(reporter.as_callback()),
        // Keep stdout clean for machine consumers.
        OutputFormat::Json => None,
    };

    let engine = build_engine(settings, progress, Some(cancel)).await?;
    let report = engine.synchronize().await;
    reporter.finish();
    let report = report?;

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Table => {
            print_rows(branch_rows(&report), output)?;
            print_summary(&report);
        }
    }

    Ok(exit_code(report.outcome))
}

pub(crate) fn exit_code(outcome: RunOutcome) -> ExitCode {
    match outcome {
        RunOutcome::Blocked => ExitCode::from(BLOCKED_EXIT_CODE),
        _ => ExitCode::SUCCESS,
    }
}

/// One row per branch, from the online pass or the fallback pass.
pub(crate) fn branch_rows(report: &RunReport) -> Vec<BranchRow> {
    if let Some(fallback) = &report.fallback {
        return fallback
            .branches
            .iter()
            .map(|b| {
                let (favored, rationale, detail) = match &b.outcome {
                    FallbackBranchOutcome::Merged { decision, merge } => (
                        decision.favored.to_string(),
                        decision.rationale.to_string(),
                        merge_detail(merge),
                    ),
                    FallbackBranchOutcome::Skipped { reason } => {
                        (String::new(), String::new(), reason.clone())
                    }
                    FallbackBranchOutcome::Failed { error } => {
                        (String::new(), String::new(), error.clone())
                    }
                    FallbackBranchOutcome::UpToDate => Default::default(),
                };
                BranchRow {
                    branch: b.branch.clone(),
                    result: b.outcome.label().to_string(),
                    favored,
                    rationale,
                    detail: truncate(&detail, 60),
                }
            })
            .collect();
    }

    report
        .branches
        .iter()
        .map(|b| {
            let (favored, rationale) = match b.outcome.decision() {
                Some(decision) => (decision.favored.to_string(), decision.rationale.to_string()),
                None => (String::new(), String::new()),
            };
            BranchRow {
                branch: b.branch.clone(),
                result: b.outcome.label().to_string(),
                favored,
                rationale,
                detail: truncate(&outcome_detail(&b.outcome), 60),
            }
        })
        .collect()
}

fn outcome_detail(outcome: &BranchOutcome) -> String {
    match outcome {
        BranchOutcome::UpToDate => String::new(),
        BranchOutcome::Created { head } => format!("at {}", short(head)),
        BranchOutcome::LocalAhead { ahead, push } => {
            format!("{} commit(s) ahead{}", ahead, push_detail(push))
        }
        BranchOutcome::Reconciled { merge, push, .. } => {
            format!("{}{}", merge_detail(merge), push_detail(push))
        }
        BranchOutcome::Unresolved { entry_id, .. } => {
            format!("needs attention, queue entry {}", entry_id)
        }
        BranchOutcome::Queued { entry_id, reason } => format!("{} ({})", reason, entry_id),
        BranchOutcome::Skipped { reason } => reason.clone(),
    }
}

fn merge_detail(merge: &MergeOutcome) -> String {
    match merge {
        MergeOutcome::Success => "merged cleanly".to_string(),
        MergeOutcome::ResolvedWithConflicts { files, .. } => {
            format!("{} conflict(s) resolved", files.len())
        }
        MergeOutcome::ForcedToRemote { backup_ref, .. } => {
            format!("reset to remote, backup {}", backup_ref)
        }
        MergeOutcome::FatalFailure { reason, .. } => reason.clone(),
    }
}

fn push_detail(push: &PushStatus) -> String {
    match push {
        PushStatus::NotRequested => String::new(),
        PushStatus::Pushed => ", pushed".to_string(),
        PushStatus::Queued { entry_id } => format!(", push queued ({})", entry_id),
    }
}

fn short(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn print_summary(report: &RunReport) {
    let outcome = match report.outcome {
        RunOutcome::FullySynchronized => style(report.outcome.as_str()).green().bold(),
        RunOutcome::PartiallySynchronized | RunOutcome::FallbackCompleted => {
            style(report.outcome.as_str()).yellow().bold()
        }
        RunOutcome::Blocked => style(report.outcome.as_str()).red().bold(),
    };
    println!("Run {} finished: {}", style(report.run_id).dim(), outcome);

    if let Some(fallback) = &report.fallback {
        println!(
            "Remote unavailable ({}). Full sync queued as {}.",
            fallback.reason, fallback.entry_id
        );
    }
    if report.settled_full_syncs > 0 {
        println!("Settled {} owed full sync(s).", report.settled_full_syncs);
    }
    if report.cancelled {
        println!("Run was cancelled before completing.");
    }
    if let Some(fatal) = &report.fatal {
        let scope = [fatal.operation.as_deref(), fatal.branch.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" on ");
        println!(
            "{} {} [{:?}] {}",
            style("Blocked:").red().bold(),
            scope,
            fatal.kind,
            fatal.message
        );
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use chronosync::fallback::FallbackBranch;
    use chronosync::sync::BranchReport;
    use chronosync::FallbackOutcome;
    use uuid::Uuid;

    use super::*;

    fn report(branches: Vec<BranchReport>) -> RunReport {
        RunReport {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            outcome: RunOutcome::PartiallySynchronized,
            health: None,
            branches,
            fallback: None,
            fatal: None,
            cancelled: false,
            settled_full_syncs: 0,
        }
    }

    #[test]
    fn rows_describe_online_outcomes() {
        let entry_id = Uuid::new_v4();
        let rows = branch_rows(&report(vec![
            BranchReport {
                branch: "main".to_string(),
                outcome: BranchOutcome::UpToDate,
            },
            BranchReport {
                branch: "drafts".to_string(),
                outcome: BranchOutcome::Queued {
                    entry_id,
                    reason: "fetch failed".to_string(),
                },
            },
            BranchReport {
                branch: "notes".to_string(),
                outcome: BranchOutcome::LocalAhead {
                    ahead: 2,
                    push: PushStatus::Pushed,
                },
            },
        ]));

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].result, "up to date");
        assert!(rows[0].favored.is_empty());
        assert_eq!(rows[1].result, "queued");
        assert!(rows[1].detail.contains("fetch failed"));
        assert_eq!(rows[2].detail, "2 commit(s) ahead, pushed");
    }

    #[test]
    fn fallback_rows_replace_online_rows() {
        let mut report = report(Vec::new());
        report.fallback = Some(FallbackOutcome {
            reason: "network unreachable".to_string(),
            branches: vec![FallbackBranch {
                branch: "main".to_string(),
                outcome: FallbackBranchOutcome::Skipped {
                    reason: "no upstream".to_string(),
                },
            }],
            marker: "/tmp/fallback.json".into(),
            entry_id: Uuid::new_v4(),
        });

        let rows = branch_rows(&report);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].result, "skipped");
        assert_eq!(rows[0].detail, "no upstream");
    }

    #[test]
    fn only_blocked_runs_fail_the_process() {
        assert_eq!(exit_code(RunOutcome::Blocked), ExitCode::from(BLOCKED_EXIT_CODE));
        assert_eq!(exit_code(RunOutcome::FallbackCompleted), ExitCode::SUCCESS);
        assert_eq!(exit_code(RunOutcome::PartiallySynchronized), ExitCode::SUCCESS);
    }

    #[test]
    fn short_ids_are_cut_safely() {
        assert_eq!(short("0123456789abcdef"), "01234567");
        assert_eq!(short("abc"), "abc");
    }
}
