use std::process::ExitCode;
use std::sync::Arc;

use chronosync::{DrainOutcome, DrainResult, EngineSettings};
use tokio_util::sync::CancellationToken;

use super::shared::{OutputFormat, build_engine, print_rows, truncate};
use crate::progress::ProgressReporter;

#[derive(Debug, Clone, serde::Serialize, tabled::Tabled)]
pub(crate) struct DrainRow {
    #[tabled(rename = "Entry")]
    pub entry: String,
    #[tabled(rename = "Operation")]
    pub operation: String,
    #[tabled(rename = "Branch")]
    pub branch: String,
    #[tabled(rename = "Result")]
    pub result: String,
}

impl From<&DrainResult> for DrainRow {
    fn from(result: &DrainResult) -> Self {
        let outcome = match &result.outcome {
            DrainOutcome::Completed => "completed".to_string(),
            DrainOutcome::StillQueued { error } => format!("still queued: {}", error),
            DrainOutcome::Skipped => "skipped (needs attention)".to_string(),
            DrainOutcome::Failed { error } => format!("failed: {}", error),
            DrainOutcome::Cancelled => "cancelled".to_string(),
        };
        Self {
            entry: result.entry_id.to_string(),
            operation: result.operation.to_string(),
            branch: result.target_branch.clone().unwrap_or_else(|| "-".to_string()),
            result: truncate(&outcome, 60),
        }
    }
}

pub(crate) async fn handle_recover(
    settings: EngineSettings,
    output: OutputFormat,
    cancel: CancellationToken,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let reporter = Arc::new(ProgressReporter::new());
    let progress = match output {
        OutputFormat::Table => Some(reporter.as_callback()),
        OutputFormat::Json => None,
    };

    let engine = build_engine(settings, progress, Some(cancel)).await?;
    let results = engine.drain_recovery().await;
    reporter.finish();
    let results = results?;

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&results)?),
        OutputFormat::Table if results.is_empty() => println!("Recovery queue is empty."),
        OutputFormat::Table => print_rows(results.iter().map(DrainRow::from).collect(), output)?,
    }

    let failed = results
        .iter()
        .any(|r| matches!(r.outcome, DrainOutcome::Failed { .. }));
    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

#[cfg(test)]
mod tests {
    use chronosync::OwedOperation;
    use uuid::Uuid;

    use super::*;

    #[test]
    fn rows_show_branch_or_placeholder() {
        let row = DrainRow::from(&DrainResult {
            entry_id: Uuid::new_v4(),
            operation: OwedOperation::FullSync,
            target_branch: None,
            outcome: DrainOutcome::Completed,
        });
        assert_eq!(row.branch, "-");
        assert_eq!(row.result, "completed");

        let row = DrainRow::from(&DrainResult {
            entry_id: Uuid::new_v4(),
            operation: OwedOperation::Push,
            target_branch: Some("main".to_string()),
            outcome: DrainOutcome::StillQueued {
                error: "remote unreachable".to_string(),
            },
        });
        assert_eq!(row.branch, "main");
        assert_eq!(row.result, "still queued: remote unreachable");
    }
}
