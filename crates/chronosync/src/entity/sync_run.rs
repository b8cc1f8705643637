//! SyncRun entity - one row per completed run, holding its full report.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sync_run")]
pub struct Model {
    /// The run id.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub started_at: DateTimeWithTimeZone,

    pub finished_at: DateTimeWithTimeZone,

    /// Outcome tag (e.g. `fully_synchronized`).
    pub outcome: String,

    /// The serialized `RunReport`.
    #[sea_orm(column_type = "Json")]
    pub report: Json,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
