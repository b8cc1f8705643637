//! Recovery queue: durable record of synchronization work owed once
//! conditions improve, and the drain pass that retries it.

mod drain;
mod queue;

pub use drain::{DrainOutcome, DrainResult, drain_and_retry};
pub use queue::{NewRecoveryEntry, QueueStats, RecoveryQueue};
