//! Error types for depot-store.

use thiserror::Error;

/// All errors that can arise from object-storage access.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The object does not exist in the queried replica. Per-replica signal;
    /// the resolver swallows these while other replicas may still answer.
    #[error("object not found: {key}")]
    NotFound { key: String },

    /// A replica index outside the configured set was passed to a fetch
    /// call. Should not occur in correct operation — indices come from
    /// [`crate::ReplicaSet::find_newest`] on the same set.
    #[error("replica index {index} out of bounds for {len} replicas")]
    BadIndex { index: usize, len: usize },

    /// No replica produced a matching object: either the object is absent
    /// everywhere, or every replica that could have answered failed. The
    /// genuine (non-not-found) errors collected along the way are carried.
    #[error("no replica holds '{target}'; collected errors: [{}]", .errors.join("; "))]
    NoReplica { target: String, errors: Vec<String> },

    /// A listed key did not carry the prefix it was listed under.
    #[error("key '{key}' does not carry expected prefix '{prefix}'")]
    UnexpectedKey { key: String, prefix: String },

    /// Client construction or request failure against one replica.
    #[error("{op} '{key}' at {endpoint}: {message}")]
    Backend {
        endpoint: String,
        op: &'static str,
        key: String,
        message: String,
    },
}

impl StoreError {
    /// True for the per-replica "object absent" signal the resolver ignores.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}
