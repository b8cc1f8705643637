//! SeaORM entity definitions for the chronosync state database.

pub mod owed_operation;
pub mod prelude;
pub mod recovery_entry;
pub mod run_log;
pub mod sync_run;
