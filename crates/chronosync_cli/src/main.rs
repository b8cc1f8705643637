//! Chronosync CLI - command-line front end for the synchronization engine.

mod commands;
mod config;
mod progress;
mod shutdown;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use console::Term;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::commands::shared::OutputFormat;

#[derive(Parser)]
#[command(name = "chronosync")]
#[command(version)]
#[command(about = "Temporal-priority synchronization for git working copies")]
#[command(
    long_about = "Chronosync keeps a local working copy in step with its remote branches \
without asking a human to resolve conflicts. Divergent branches are settled by a \
priority rule (automated commits first, then fresher manual edits, then the remote). \
When the remote cannot be reached the work is reconciled locally and owed \
operations are queued until the next recovery pass."
)]
#[command(after_long_help = r#"EXAMPLES
    Synchronize the configured branches:
        $ chronosync sync

    Synchronize two branches of another checkout, printing JSON:
        $ chronosync --repo ~/notes sync --branch main --branch drafts --output json

    Retry work left over from an offline run:
        $ chronosync recover

    Re-arm a queue entry that needed manual attention:
        $ chronosync queue retry 5b0c6c0e-3f43-4d8a-8a9c-0b3b9a0f6d21

CONFIGURATION
    Chronosync reads configuration from:
      1. ~/.config/chronosync/config.toml (or $XDG_CONFIG_HOME/chronosync/config.toml)
      2. ./chronosync.toml
      3. Environment variables (CHRONOSYNC_ prefix, "__" between sections)
      4. .env file in current directory

ENVIRONMENT VARIABLES
    CHRONOSYNC_REPOSITORY__PATH        Working copy to synchronize
    CHRONOSYNC_REPOSITORY__BRANCHES    Comma-separated branch list
    CHRONOSYNC_SYNC__PUSH              Push after local-favored resolutions
    CHRONOSYNC_HEALTH__PROBE_HOSTS     Comma-separated host:port list for reachability
"#)]
pub(crate) struct Cli {
    /// Working copy to operate on (overrides repository.path)
    #[arg(short = 'C', long, global = true, value_name = "PATH")]
    repo: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one synchronization pass over the configured branches
    Sync {
        /// Branch to synchronize (repeatable; overrides repository.branches)
        #[arg(short, long = "branch", value_name = "BRANCH")]
        branches: Vec<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },
    /// Show repository health, queue depth and fallback state
    Status {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },
    /// Retry owed operations from the recovery queue
    Recover {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },
    /// Inspect or re-arm recovery queue entries
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
    /// List recent runs
    History {
        /// Number of runs to show
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: u64,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
    /// Generate man page(s)
    Man {
        /// Output directory for man pages (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum QueueAction {
    /// List every queued entry
    List {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },
    /// Summarize queued entries by operation and eligibility
    Stats {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },
    /// Make an entry eligible for automatic retry again
    Retry {
        /// Entry id as shown by `queue list`
        id: Uuid,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Structured logging only when not attached to a terminal
    if !Term::stdout().is_term() {
        let env_filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::new("chronosync=info,chronosync_cli=info"),
        };

        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }

    let cli = Cli::parse();

    // Commands that need neither configuration nor a repository
    match &cli.command {
        Commands::Completions { shell } => {
            commands::meta::handle_completions(*shell)?;
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Man { output } => {
            commands::meta::handle_man(output.clone())?;
            return Ok(ExitCode::SUCCESS);
        }
        _ => {}
    }

    let mut settings = config::load()?;
    config::apply_overrides(&mut settings, cli.repo.clone(), Vec::new());

    let cancel = shutdown::setup_shutdown_handler();

    match cli.command {
        Commands::Sync { branches, output } => {
            config::apply_overrides(&mut settings, None, branches);
            return commands::sync::handle_sync(settings, output, cancel).await;
        }
        Commands::Status { output } => {
            commands::status::handle_status(settings, output).await?;
        }
        Commands::Recover { output } => {
            return commands::recover::handle_recover(settings, output, cancel).await;
        }
        Commands::Queue { action } => match action {
            QueueAction::List { output } => commands::queue::handle_list(settings, output).await?,
            QueueAction::Stats { output } => {
                commands::queue::handle_stats(settings, output).await?
            }
            QueueAction::Retry { id } => commands::queue::handle_retry(settings, id).await?,
        },
        Commands::History { limit, output } => {
            commands::history::handle_history(settings, limit, output).await?;
        }
        Commands::Completions { .. } | Commands::Man { .. } => {}
    }

    Ok(ExitCode::SUCCESS)
}
