//! Replica resolution and content fetching.
//!
//! A [`ReplicaSet`] holds an ordered list of stores; list position is a
//! stable index, reused between the freshness check and the fetch call.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use depot_core::ReplicaConfig;

use crate::error::StoreError;
use crate::object::{ObjectReader, ObjectStore};
use crate::s3::S3Store;

/// What a sync pulls from its replicas: one exact object, or every object
/// under a key prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteTarget {
    Key(String),
    Prefix(String),
}

impl RemoteTarget {
    pub fn describe(&self) -> &str {
        match self {
            RemoteTarget::Key(key) => key,
            RemoteTarget::Prefix(prefix) => prefix,
        }
    }
}

/// One fetched object under a prefix, keyed relative to that prefix.
pub struct PrefixEntry {
    pub relative_key: String,
    pub body: ObjectReader,
}

struct Replica {
    label: String,
    store: Arc<dyn ObjectStore>,
}

/// An ordered set of replicas holding redundant copies of the same content.
pub struct ReplicaSet {
    replicas: Vec<Replica>,
}

impl ReplicaSet {
    /// Connect an S3 client per configured replica, preserving order.
    pub async fn connect(configs: &[ReplicaConfig]) -> Result<Self, StoreError> {
        let mut replicas = Vec::with_capacity(configs.len());
        for config in configs {
            let store = S3Store::connect(config).await?;
            replicas.push(Replica {
                label: format!("{}/{}", config.host, config.bucket),
                store: Arc::new(store),
            });
        }
        Ok(Self { replicas })
    }

    /// Assemble a set from already-built stores. The resolver only sees the
    /// capability trait, so tests plug in [`crate::MemoryStore`] here.
    pub fn from_stores(stores: Vec<(String, Arc<dyn ObjectStore>)>) -> Self {
        Self {
            replicas: stores
                .into_iter()
                .map(|(label, store)| Replica { label, store })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.replicas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }

    /// Indices are unsigned, so a negative index is unrepresentable; anything
    /// at or past the replica count is rejected the same way.
    fn replica_at(&self, index: usize) -> Result<&Replica, StoreError> {
        self.replicas.get(index).ok_or(StoreError::BadIndex {
            index,
            len: self.replicas.len(),
        })
    }

    // -----------------------------------------------------------------------
    // Resolution
    // -----------------------------------------------------------------------

    /// Find the most recently modified object matching `target` across all
    /// replicas. Returns its modification time and the replica index to
    /// fetch from. Ties keep the first (configuration-order) index.
    ///
    /// A replica failing with anything other than not-found does not abort
    /// the scan; its error is recorded and only surfaced — inside
    /// [`StoreError::NoReplica`] — when no replica produces a hit.
    pub async fn find_newest(
        &self,
        target: &RemoteTarget,
    ) -> Result<(DateTime<Utc>, usize), StoreError> {
        match target {
            RemoteTarget::Key(key) => self.find_newest_key(key).await,
            RemoteTarget::Prefix(prefix) => self.find_newest_prefix(prefix).await,
        }
    }

    async fn find_newest_key(&self, key: &str) -> Result<(DateTime<Utc>, usize), StoreError> {
        let mut newest: Option<(DateTime<Utc>, usize)> = None;
        let mut errors = Vec::new();

        for (index, replica) in self.replicas.iter().enumerate() {
            match replica.store.stat(key).await {
                Ok(info) => {
                    if newest.map_or(true, |(t, _)| info.last_modified > t) {
                        newest = Some((info.last_modified, index));
                    }
                }
                Err(err) if err.is_not_found() => continue,
                Err(err) => {
                    tracing::debug!(replica = %replica.label, key, error = %err, "stat failed");
                    errors.push(format!("{}: {err}", replica.label));
                }
            }
        }

        newest.ok_or(StoreError::NoReplica {
            target: key.to_string(),
            errors,
        })
    }

    async fn find_newest_prefix(&self, prefix: &str) -> Result<(DateTime<Utc>, usize), StoreError> {
        let prefix = normalize_prefix(prefix);
        let mut newest: Option<(DateTime<Utc>, usize)> = None;
        let mut errors = Vec::new();

        for (index, replica) in self.replicas.iter().enumerate() {
            let objects = match replica.store.list(&prefix).await {
                Ok(objects) => objects,
                Err(err) if err.is_not_found() => continue,
                Err(err) => {
                    tracing::debug!(replica = %replica.label, prefix, error = %err, "list failed");
                    errors.push(format!("{}: {err}", replica.label));
                    continue;
                }
            };
            for info in objects {
                if info.key == prefix {
                    continue; // directory marker, not a file
                }
                if newest.map_or(true, |(t, _)| info.last_modified > t) {
                    newest = Some((info.last_modified, index));
                }
            }
        }

        newest.ok_or(StoreError::NoReplica {
            target: prefix,
            errors,
        })
    }

    // -----------------------------------------------------------------------
    // Fetching
    // -----------------------------------------------------------------------

    /// Stream a single object from the replica chosen by `find_newest`.
    pub async fn fetch_object(&self, key: &str, index: usize) -> Result<ObjectReader, StoreError> {
        self.replica_at(index)?.store.get(key).await
    }

    /// Stream every object under `prefix` from the chosen replica as
    /// `(relative key, body)` pairs.
    ///
    /// Entries arrive through the returned channel one at a time; after the
    /// first hard error that error is delivered and nothing further is
    /// emitted. Dropping the receiver stops the producer at its next send.
    pub fn fetch_prefix(
        &self,
        prefix: &str,
        index: usize,
    ) -> Result<mpsc::Receiver<Result<PrefixEntry, StoreError>>, StoreError> {
        let replica = self.replica_at(index)?;
        let store = replica.store.clone();
        let prefix = normalize_prefix(prefix);
        let (tx, rx) = mpsc::channel(1);

        tokio::spawn(async move {
            let objects = match store.list(&prefix).await {
                Ok(objects) => objects,
                Err(err) => {
                    let _ = tx.send(Err(err)).await;
                    return;
                }
            };
            for info in objects {
                if info.key == prefix {
                    continue;
                }
                // Verified strip: a listed key must carry the prefix it was
                // listed under.
                let Some(relative) = info.key.strip_prefix(&prefix) else {
                    let _ = tx
                        .send(Err(StoreError::UnexpectedKey {
                            key: info.key.clone(),
                            prefix: prefix.clone(),
                        }))
                        .await;
                    return;
                };
                let entry = match store.get(&info.key).await {
                    Ok(body) => PrefixEntry {
                        relative_key: relative.to_string(),
                        body,
                    },
                    Err(err) => {
                        let _ = tx.send(Err(err)).await;
                        return;
                    }
                };
                if tx.send(Ok(entry)).await.is_err() {
                    return;
                }
            }
        });

        Ok(rx)
    }
}

fn normalize_prefix(prefix: &str) -> String {
    if prefix.ends_with('/') {
        prefix.to_string()
    } else {
        format!("{prefix}/")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
