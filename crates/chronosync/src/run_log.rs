//! Persistent run log and run history.
//!
//! Every line written through [`RunLogger`] is mirrored to `tracing` and
//! stored in the `run_log` table keyed by run id. Finished runs are stored
//! whole in `sync_run`.

use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::entity::run_log::{self, LogLevel};
use crate::entity::sync_run;
use crate::error::StorageError;
use crate::sync::RunReport;

type Result<T> = std::result::Result<T, StorageError>;

/// Writes log lines for one run.
#[derive(Clone)]
pub struct RunLogger {
    db: Arc<DatabaseConnection>,
    run_id: Uuid,
}

impl RunLogger {
    pub fn new(db: Arc<DatabaseConnection>, run_id: Uuid) -> Self {
        Self { db, run_id }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub async fn log(
        &self,
        level: LogLevel,
        branch: Option<&str>,
        message: impl Into<String>,
    ) -> Result<()> {
        let message = message.into();
        let run_id = self.run_id;
        let branch_field = branch.unwrap_or("-");
        match level {
            LogLevel::Debug => debug!(%run_id, branch = branch_field, "{message}"),
            LogLevel::Info => info!(%run_id, branch = branch_field, "{message}"),
            LogLevel::Warn => warn!(%run_id, branch = branch_field, "{message}"),
            LogLevel::Error => error!(%run_id, branch = branch_field, "{message}"),
        }

        run_log::ActiveModel {
            run_id: Set(run_id),
            recorded_at: Set(Utc::now().fixed_offset()),
            level: Set(level),
            branch: Set(branch.map(str::to_string)),
            message: Set(message),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await?;
        Ok(())
    }

    pub async fn info(&self, branch: Option<&str>, message: impl Into<String>) -> Result<()> {
        self.log(LogLevel::Info, branch, message).await
    }

    pub async fn warn(&self, branch: Option<&str>, message: impl Into<String>) -> Result<()> {
        self.log(LogLevel::Warn, branch, message).await
    }

    pub async fn error(&self, branch: Option<&str>, message: impl Into<String>) -> Result<()> {
        self.log(LogLevel::Error, branch, message).await
    }
}

/// Log lines for a run, in insertion order.
pub async fn entries(db: &DatabaseConnection, run_id: Uuid) -> Result<Vec<run_log::Model>> {
    Ok(run_log::Entity::find()
        .filter(run_log::Column::RunId.eq(run_id))
        .order_by_asc(run_log::Column::Id)
        .all(db)
        .await?)
}

/// Store a finished run.
pub async fn save_run(db: &DatabaseConnection, report: &RunReport) -> Result<()> {
    let json = serde_json::to_value(report).map_err(|source| StorageError::Malformed {
        path: "sync_run.report".into(),
        source,
    })?;
    sync_run::ActiveModel {
        id: Set(report.run_id),
        started_at: Set(report.started_at.fixed_offset()),
        finished_at: Set(report.finished_at.fixed_offset()),
        outcome: Set(report.outcome.as_str().to_string()),
        report: Set(json),
    }
    .insert(db)
    .await?;
    Ok(())
}

/// Most recent runs, newest first.
pub async fn recent_runs(db: &DatabaseConnection, limit: u64) -> Result<Vec<RunReport>> {
    let rows = sync_run::Entity::find()
        .order_by_desc(sync_run::Column::StartedAt)
        .limit(limit)
        .all(db)
        .await?;
    rows.into_iter().map(decode_report).collect()
}

pub async fn find_run(db: &DatabaseConnection, run_id: Uuid) -> Result<Option<RunReport>> {
    sync_run::Entity::find_by_id(run_id)
        .one(db)
        .await?
        .map(decode_report)
        .transpose()
}

fn decode_report(row: sync_run::Model) -> Result<RunReport> {
    serde_json::from_value(row.report).map_err(|source| StorageError::Malformed {
        path: format!("sync_run/{}", row.id).into(),
        source,
    })
}
