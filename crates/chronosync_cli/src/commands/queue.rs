use chronosync::{EngineSettings, QueueStats, RecoveryEntryModel};
use uuid::Uuid;

use super::shared::{OutputFormat, build_engine, format_time, print_rows, truncate};

#[derive(Debug, Clone, serde::Serialize, tabled::Tabled)]
pub(crate) struct EntryRow {
    #[tabled(rename = "Id")]
    pub id: String,
    #[tabled(rename = "Queued")]
    pub queued: String,
    #[tabled(rename = "Operation")]
    pub operation: String,
    #[tabled(rename = "Branch")]
    pub branch: String,
    #[tabled(rename = "Eligible")]
    pub eligible: String,
    #[tabled(rename = "Attempts")]
    pub attempts: i32,
    #[tabled(rename = "Last Error")]
    pub last_error: String,
}

impl From<&RecoveryEntryModel> for EntryRow {
    fn from(entry: &RecoveryEntryModel) -> Self {
        Self {
            id: entry.id.to_string(),
            queued: format_time(entry.enqueued_at.to_utc()),
            operation: entry.operation.to_string(),
            branch: entry.target_branch.clone().unwrap_or_else(|| "-".to_string()),
            eligible: if entry.retry_eligible { "yes" } else { "no" }.to_string(),
            attempts: entry.attempts,
            last_error: truncate(entry.last_error.as_deref().unwrap_or(&entry.reason), 50),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, tabled::Tabled)]
pub(crate) struct StatRow {
    #[tabled(rename = "Metric")]
    pub metric: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

fn stat_rows(stats: &QueueStats) -> Vec<StatRow> {
    let row = |metric: &str, value: String| StatRow {
        metric: metric.to_string(),
        value,
    };
    let mut rows = vec![
        row("Total", stats.total.to_string()),
        row("Eligible for retry", stats.eligible.to_string()),
        row("Needs attention", stats.ineligible.to_string()),
        row("Attempts so far", stats.total_attempts.to_string()),
        row(
            "Oldest entry",
            stats
                .oldest
                .map(|at| format_time(at.to_utc()))
                .unwrap_or_else(|| "-".to_string()),
        ),
    ];
    rows.extend(
        stats
            .by_operation
            .iter()
            .map(|(op, count)| row(&format!("  {}", op), count.to_string())),
    );
    rows
}

pub(crate) async fn handle_list(
    settings: EngineSettings,
    output: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let engine = build_engine(settings, None, None).await?;
    let entries = engine.queue().all().await?;

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        OutputFormat::Table if entries.is_empty() => println!("Recovery queue is empty."),
        OutputFormat::Table => print_rows(entries.iter().map(EntryRow::from).collect(), output)?,
    }
    Ok(())
}

pub(crate) async fn handle_stats(
    settings: EngineSettings,
    output: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let engine = build_engine(settings, None, None).await?;
    let stats = engine.queue().stats().await?;

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
        OutputFormat::Table => print_rows(stat_rows(&stats), output)?,
    }
    Ok(())
}

pub(crate) async fn handle_retry(
    settings: EngineSettings,
    id: Uuid,
) -> Result<(), Box<dyn std::error::Error>> {
    let engine = build_engine(settings, None, None).await?;
    let entry = engine.queue().mark_eligible(id).await?;
    tracing::info!(%id, operation = %entry.operation, "Queue entry re-armed");
    println!(
        "Entry {} ({}) will be retried on the next `chronosync recover`.",
        entry.id, entry.operation
    );
    Ok(())
}
