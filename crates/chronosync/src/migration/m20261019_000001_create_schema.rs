//! Initial migration: recovery queue, run log and run history.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        self.create_recovery_queue(manager).await?;
        self.create_run_log(manager).await?;
        self.create_sync_run(manager).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SyncRun::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(RunLog::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(RecoveryQueue::Table).to_owned())
            .await?;
        Ok(())
    }
}

impl Migration {
    async fn create_recovery_queue(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(RecoveryQueue::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RecoveryQueue::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(RecoveryQueue::EnqueuedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RecoveryQueue::Operation)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(RecoveryQueue::Reason).text().not_null())
                    .col(ColumnDef::new(RecoveryQueue::TargetBranch).string().null())
                    .col(ColumnDef::new(RecoveryQueue::TargetCommit).string().null())
                    .col(
                        ColumnDef::new(RecoveryQueue::RetryEligible)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(RecoveryQueue::Attempts)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(RecoveryQueue::LastError).text().null())
                    .col(
                        ColumnDef::new(RecoveryQueue::LastAttemptAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(RecoveryQueue::RunId).uuid().null())
                    .to_owned(),
            )
            .await?;

        // Drain order
        manager
            .create_index(
                Index::create()
                    .name("idx_recovery_queue_enqueued_at")
                    .table(RecoveryQueue::Table)
                    .col(RecoveryQueue::EnqueuedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn create_run_log(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(RunLog::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RunLog::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(RunLog::RunId).uuid().not_null())
                    .col(
                        ColumnDef::new(RunLog::RecordedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(RunLog::Level).string().not_null())
                    .col(ColumnDef::new(RunLog::Branch).string().null())
                    .col(ColumnDef::new(RunLog::Message).text().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_run_log_run_id")
                    .table(RunLog::Table)
                    .col(RunLog::RunId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn create_sync_run(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SyncRun::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(SyncRun::Id).uuid().not_null().primary_key())
                    .col(
                        ColumnDef::new(SyncRun::StartedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SyncRun::FinishedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(SyncRun::Outcome).string().not_null())
                    .col(ColumnDef::new(SyncRun::Report).json().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_sync_run_started_at")
                    .table(SyncRun::Table)
                    .col(SyncRun::StartedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
#[sea_orm(iden = "recovery_queue")]
enum RecoveryQueue {
    Table,
    Id,
    EnqueuedAt,
    Operation,
    Reason,
    TargetBranch,
    TargetCommit,
    RetryEligible,
    Attempts,
    LastError,
    LastAttemptAt,
    RunId,
}

#[derive(DeriveIden)]
#[sea_orm(iden = "run_log")]
enum RunLog {
    Table,
    Id,
    RunId,
    RecordedAt,
    Level,
    Branch,
    Message,
}

#[derive(DeriveIden)]
#[sea_orm(iden = "sync_run")]
enum SyncRun {
    Table,
    Id,
    StartedAt,
    FinishedAt,
    Outcome,
    Report,
}
