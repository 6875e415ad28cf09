//! The object-storage capability seam.
//!
//! The resolver and fetcher only ever need `{stat, list, get}`, so that is
//! the whole trait; the concrete client behind a replica is swappable
//! without touching the resolution logic.

use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncRead;

use crate::error::StoreError;

/// A streaming object body.
pub type ObjectReader = Pin<Box<dyn AsyncRead + Send>>;

/// One object as seen during resolution. Transient, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub last_modified: DateTime<Utc>,
}

/// Minimal capability set one replica must provide.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Describe a single object. Absence is [`StoreError::NotFound`].
    async fn stat(&self, key: &str) -> Result<ObjectInfo, StoreError>;

    /// Describe every object whose key starts with `prefix`.
    /// An empty result is not an error.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StoreError>;

    /// Open a single object for streaming reads.
    async fn get(&self, key: &str) -> Result<ObjectReader, StoreError>;
}
