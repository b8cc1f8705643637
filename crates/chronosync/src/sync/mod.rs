//! Synchronization runs.
//!
//! # Module Structure
//!
//! - [`types`] - Run report types: `RunReport`, `BranchOutcome`, `RunOutcome`
//! - [`progress`] - Progress reporting: `SyncProgress`, `ProgressCallback`, `emit()`
//! - [`engine`] - The orchestrator: `Engine::synchronize()`, `Engine::drain_recovery()`

pub mod engine;
mod progress;
mod types;

pub use types::{
    BranchOutcome, BranchReport, FatalContext, PushStatus, RunOutcome, RunReport,
};

pub use progress::{ProgressCallback, SyncProgress, emit};

pub use engine::{Engine, EngineBuildError, EngineBuilder, StatusOverview};
