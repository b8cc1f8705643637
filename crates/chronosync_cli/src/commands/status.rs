use chronosync::{Assessment, EngineSettings, HealthStatus, StatusOverview};
use console::style;

use super::shared::{OutputFormat, build_engine, format_time, print_rows};

#[derive(Debug, Clone, serde::Serialize, tabled::Tabled)]
pub(crate) struct CheckRow {
    #[tabled(rename = "Check")]
    pub check: &'static str,
    #[tabled(rename = "Status")]
    pub status: &'static str,
}

pub(crate) async fn handle_status(
    settings: EngineSettings,
    output: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let engine = build_engine(settings, None, None).await?;
    let overview = engine.overview().await?;

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&overview)?),
        OutputFormat::Table => print_overview(&overview)?,
    }
    Ok(())
}

fn check_rows(health: &HealthStatus) -> Vec<CheckRow> {
    let mark = |ok: bool| if ok { "ok" } else { "FAILED" };
    vec![
        CheckRow {
            check: "No operation in progress",
            status: mark(health.lock_free),
        },
        CheckRow {
            check: "Working tree readable",
            status: mark(health.status_ok),
        },
        CheckRow {
            check: "Network reachable",
            status: mark(health.network_reachable),
        },
        CheckRow {
            check: "Remote reachable",
            status: mark(health.remote_reachable),
        },
    ]
}

fn assessment_label(assessment: Assessment) -> &'static str {
    match assessment {
        Assessment::Healthy => "healthy",
        Assessment::RepositoryUnavailable => "repository unavailable",
        Assessment::Offline => "offline",
    }
}

fn print_overview(overview: &StatusOverview) -> Result<(), serde_json::Error> {
    let health = &overview.health;
    let label = assessment_label(health.assessment());
    let label = match health.assessment() {
        Assessment::Healthy => style(label).green().bold(),
        _ => style(label).yellow().bold(),
    };
    println!("Health: {} (checked {})", label, format_time(health.checked_at));
    print_rows(check_rows(health), OutputFormat::Table)?;
    for issue in &health.issues {
        println!("  {} {}", style("!").yellow(), issue);
    }

    let queue = &overview.queue;
    println!(
        "\nRecovery queue: {} entr{} ({} eligible, {} need attention)",
        queue.total,
        if queue.total == 1 { "y" } else { "ies" },
        queue.eligible,
        queue.ineligible
    );

    match &overview.fallback {
        Some(marker) => println!(
            "Fallback mode: since {} ({})",
            format_time(marker.entered_at),
            marker.reason
        ),
        None => println!("Fallback mode: inactive"),
    }

    match &overview.last_run {
        Some(run) => println!(
            "Last run: {} at {}",
            run.outcome,
            format_time(run.finished_at)
        ),
        None => println!("Last run: never"),
    }
    Ok(())
}
