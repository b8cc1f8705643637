use chronosync::{EngineSettings, RunReport};

use super::shared::{OutputFormat, build_engine, format_time, print_rows};

#[derive(Debug, Clone, serde::Serialize, tabled::Tabled)]
pub(crate) struct RunRow {
    #[tabled(rename = "Run")]
    pub run_id: String,
    #[tabled(rename = "Started")]
    pub started: String,
    #[tabled(rename = "Duration")]
    pub duration: String,
    #[tabled(rename = "Outcome")]
    pub outcome: String,
    #[tabled(rename = "Branches")]
    pub branches: String,
}

impl From<&RunReport> for RunRow {
    fn from(run: &RunReport) -> Self {
        let elapsed = run.finished_at - run.started_at;
        let branches = match &run.fallback {
            Some(fallback) => fallback.branches.len(),
            None => run.branches.len(),
        };
        let synchronized = run
            .branches
            .iter()
            .filter(|b| b.outcome.is_synchronized())
            .count();
        Self {
            run_id: run.run_id.to_string(),
            started: format_time(run.started_at),
            duration: format!("{:.1}s", elapsed.num_milliseconds() as f64 / 1000.0),
            outcome: run.outcome.to_string(),
            branches: if run.fallback.is_some() {
                format!("{} (local only)", branches)
            } else {
                format!("{}/{}", synchronized, branches)
            },
        }
    }
}

pub(crate) async fn handle_history(
    settings: EngineSettings,
    limit: u64,
    output: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let engine = build_engine(settings, None, None).await?;
    let runs = engine.history(limit).await?;

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&runs)?),
        OutputFormat::Table if runs.is_empty() => println!("No runs recorded yet."),
        OutputFormat::Table => print_rows(runs.iter().map(RunRow::from).collect(), output)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use chronosync::sync::BranchReport;
    use chronosync::{BranchOutcome, RunOutcome};
    use uuid::Uuid;

    use super::*;

    #[test]
    fn row_counts_synchronized_branches() {
        let started = Utc::now();
        let run = RunReport {
            run_id: Uuid::new_v4(),
            started_at: started,
            finished_at: started + Duration::milliseconds(1500),
            outcome: RunOutcome::PartiallySynchronized,
            health: None,
            branches: vec![
                BranchReport {
                    branch: "main".to_string(),
                    outcome: BranchOutcome::UpToDate,
                },
                BranchReport {
                    branch: "drafts".to_string(),
                    outcome: BranchOutcome::Queued {
                        entry_id: Uuid::new_v4(),
                        reason: "fetch failed".to_string(),
                    },
                },
            ],
            fallback: None,
            fatal: None,
            cancelled: false,
            settled_full_syncs: 0,
        };

        let row = RunRow::from(&run);
        assert_eq!(row.branches, "1/2");
        assert_eq!(row.duration, "1.5s");
        assert_eq!(row.outcome, "partially_synchronized");
    }
}
