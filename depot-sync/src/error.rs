//! Error types for depot-sync.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use depot_store::StoreError;

/// All errors that can arise from one sync cycle.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An error from replica resolution or fetching.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed gzip/tar stream.
    #[error("reading archive: {0}")]
    Archive(#[source] std::io::Error),

    /// The archive carried an entry that is neither a regular file nor a
    /// directory.
    #[error("unsupported archive entry type for '{path}'")]
    UnsupportedEntry { path: PathBuf },

    /// An entry path that would land outside the staging root.
    #[error("entry path escapes the install root: '{path}'")]
    UnsafePath { path: PathBuf },

    /// A post-install command exited non-zero.
    #[error(
        "executing '{command}' failed with status {status:?} (stdout: {stdout}, stderr: {stderr})"
    )]
    Command {
        command: String,
        status: Option<i32>,
        stdout: String,
        stderr: String,
    },

    /// The shell itself could not be spawned.
    #[error("spawning '{shell}': {source}")]
    Spawn {
        shell: String,
        #[source]
        source: std::io::Error,
    },

    /// The unit's wall-clock budget ran out mid-cycle.
    #[error("sync '{unit}' exceeded its {}s deadline", .timeout.as_secs())]
    DeadlineExceeded { unit: String, timeout: Duration },

    /// A sibling unit failed first and this unit was told to stop.
    #[error("sync '{unit}' canceled after a sibling failure")]
    Canceled { unit: String },

    /// A spawned task could not be joined.
    #[error("sync task join failure: {0}")]
    Join(String),
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
