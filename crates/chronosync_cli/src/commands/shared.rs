//! Helpers shared by the subcommands.

use std::sync::Arc;

use chronosync::{Engine, EngineSettings, GitCli, LocalRepo, ProgressCallback, TcpProbe, db};
use chrono::{DateTime, Local, Utc};
use tokio_util::sync::CancellationToken;

/// Output format for command results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum OutputFormat {
    /// Display as a formatted table (default)
    #[default]
    Table,
    /// Output as JSON
    Json,
}

/// Validate settings, open the repository and its state database, and build
/// an engine around them.
pub(crate) async fn build_engine(
    settings: EngineSettings,
    progress: Option<Arc<ProgressCallback>>,
    cancel: Option<CancellationToken>,
) -> Result<Engine, Box<dyn std::error::Error>> {
    let config = settings.validate()?;

    let git = Arc::new(GitCli::open(config.repo_path(), config.command_timeout()).await?);
    let state_dir = config.state_dir(&git.git_dir());
    tracing::debug!(state_dir = %state_dir.display(), "Opening state database");
    let database = db::open_state(&state_dir).await?;

    let probe = TcpProbe::new(
        config.health().probe_hosts.clone(),
        config.health().connect_timeout,
    );

    let mut builder = Engine::builder()
        .local(git.clone())
        .remote(git)
        .network(Arc::new(probe))
        .database(Arc::new(database))
        .state_dir(state_dir)
        .config(config);
    if let Some(progress) = progress {
        builder = builder.progress(progress);
    }
    if let Some(cancel) = cancel {
        builder = builder.cancel_token(cancel);
    }

    Ok(builder.build()?)
}

/// Render rows as a rounded table or pretty JSON.
pub(crate) fn print_rows<T>(rows: Vec<T>, format: OutputFormat) -> Result<(), serde_json::Error>
where
    T: tabled::Tabled + serde::Serialize,
{
    match format {
        OutputFormat::Table => {
            let mut table = tabled::Table::new(rows);
            table.with(tabled::settings::Style::rounded());
            println!("{}", table);
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
    }
    Ok(())
}

/// Local-time timestamp for tables.
pub(crate) fn format_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Cap a string for a table cell.
pub(crate) fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}
