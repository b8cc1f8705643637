//! Common re-exports for convenient entity usage.

pub use super::owed_operation::OwedOperation;
pub use super::recovery_entry::{
    ActiveModel as RecoveryEntryActiveModel, Column as RecoveryEntryColumn,
    Entity as RecoveryEntry, Model as RecoveryEntryModel,
};
pub use super::run_log::{
    ActiveModel as RunLogActiveModel, Column as RunLogColumn, Entity as RunLog, LogLevel,
    Model as RunLogModel,
};
pub use super::sync_run::{
    ActiveModel as SyncRunActiveModel, Column as SyncRunColumn, Entity as SyncRun,
    Model as SyncRunModel,
};
