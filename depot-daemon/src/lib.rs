//! # depot-daemon
//!
//! Scheduling and observability around the sync engine: one-shot and
//! interval runs, Prometheus metrics, and the metrics/health HTTP server.

pub mod error;
pub mod metrics;
pub mod scheduler;
pub mod server;

pub use error::DaemonError;
pub use metrics::SyncMetrics;
pub use scheduler::{run_forever, run_once, Scheduler};
pub use server::serve;
