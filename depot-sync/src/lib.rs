//! # depot-sync
//!
//! The sync/install engine: staged atomic installs, staleness tracking,
//! per-unit sync cycles, and concurrent multi-unit orchestration.
//!
//! Build [`SyncUnit`]s from connected replica sets, then drive them with
//! [`orchestrator::run_units`] against a process-lifetime [`ModTimeCursor`].

pub mod cursor;
pub mod error;
pub mod installer;
pub mod orchestrator;
pub mod unit;

pub use cursor::ModTimeCursor;
pub use error::SyncError;
pub use orchestrator::{run_units, AttemptedFlag, RunReport};
pub use unit::SyncUnit;
