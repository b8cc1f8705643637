use std::fmt;

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Work owed to the remote once conditions improve.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
pub enum OwedOperation {
    /// Reconcile one branch with its upstream.
    #[sea_orm(string_value = "branch_sync")]
    BranchSync,
    /// Run a complete synchronization, owed after fallback mode.
    #[sea_orm(string_value = "full_sync")]
    FullSync,
    /// Push one branch.
    #[sea_orm(string_value = "push")]
    Push,
}

impl fmt::Display for OwedOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BranchSync => f.write_str("branch_sync"),
            Self::FullSync => f.write_str("full_sync"),
            Self::Push => f.write_str("push"),
        }
    }
}
