//! Error types for depot-daemon.

use thiserror::Error;

/// Error surface for scheduler construction, cycles, metrics, and the HTTP
/// server.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("config error: {0}")]
    Config(#[from] depot_core::ConfigError),

    #[error("store error: {0}")]
    Store(#[from] depot_store::StoreError),

    #[error("sync error: {0}")]
    Sync(#[from] depot_sync::SyncError),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("HTTP server error: {0}")]
    Http(String),
}
