//! Error types for depot-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from configuration loading and validation.
///
/// Every variant is fatal at startup; depot never runs with a partially
/// valid configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure (file not found, permission denied, etc.).
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on load — includes file path and line context from serde_yaml.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The same replica name appeared in more than one config file.
    #[error("duplicated replica name '{0}'")]
    DuplicateReplica(String),

    /// The same sync name appeared in more than one config file.
    #[error("duplicated sync name '{0}'")]
    DuplicateSync(String),

    /// A sync declared neither `archive` nor `tree`.
    #[error("sync '{0}': either archive or tree must be specified")]
    MissingSource(String),

    /// A sync declared both `archive` and `tree`.
    #[error("sync '{0}': archive and tree are mutually exclusive")]
    ConflictingSource(String),

    /// A sync declared an empty replica list.
    #[error("sync '{0}': at least one replica is required")]
    EmptyReplicas(String),

    /// A sync referenced a replica name that is not defined anywhere.
    #[error("sync '{sync}' references unknown replica '{replica}'")]
    UnknownReplica { sync: String, replica: String },
}

/// Convenience constructor for [`ConfigError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}
