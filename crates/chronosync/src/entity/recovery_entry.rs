//! RecoveryEntry entity - one unit of synchronization work still owed.
//!
//! Rows are only ever deleted once their operation has been confirmed
//! successful.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::owed_operation::OwedOperation;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "recovery_queue")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub enqueued_at: DateTimeWithTimeZone,

    pub operation: OwedOperation,

    /// Why the work was deferred.
    #[sea_orm(column_type = "Text")]
    pub reason: String,

    /// Branch the operation targets, if any.
    pub target_branch: Option<String>,

    /// Commit the local branch pointed at when the entry was queued.
    pub target_commit: Option<String>,

    /// Whether the drain pass should retry this entry automatically.
    pub retry_eligible: bool,

    /// Drain attempts made so far.
    pub attempts: i32,

    #[sea_orm(column_type = "Text", nullable)]
    pub last_error: Option<String>,

    pub last_attempt_at: Option<DateTimeWithTimeZone>,

    /// Run that queued the entry.
    pub run_id: Option<Uuid>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
