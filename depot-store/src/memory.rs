//! In-memory object store.
//!
//! Backs tests and local experimentation; no depot code path depends on a
//! real endpoint being reachable.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::object::{ObjectInfo, ObjectReader, ObjectStore};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    last_modified: DateTime<Utc>,
}

/// A replica held entirely in memory, keyed like a bucket.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, StoredObject>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an object.
    pub fn put(&self, key: &str, data: impl Into<Vec<u8>>, last_modified: DateTime<Utc>) {
        let mut objects = self.objects.lock().expect("memory store lock");
        objects.insert(
            key.to_string(),
            StoredObject {
                data: data.into(),
                last_modified,
            },
        );
    }

    pub fn is_empty(&self) -> bool {
        self.objects.lock().expect("memory store lock").is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn stat(&self, key: &str) -> Result<ObjectInfo, StoreError> {
        let objects = self.objects.lock().expect("memory store lock");
        objects
            .get(key)
            .map(|obj| ObjectInfo {
                key: key.to_string(),
                last_modified: obj.last_modified,
            })
            .ok_or_else(|| StoreError::NotFound {
                key: key.to_string(),
            })
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StoreError> {
        let objects = self.objects.lock().expect("memory store lock");
        Ok(objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, obj)| ObjectInfo {
                key: key.clone(),
                last_modified: obj.last_modified,
            })
            .collect())
    }

    async fn get(&self, key: &str) -> Result<ObjectReader, StoreError> {
        let objects = self.objects.lock().expect("memory store lock");
        let obj = objects.get(key).ok_or_else(|| StoreError::NotFound {
            key: key.to_string(),
        })?;
        Ok(Box::pin(Cursor::new(obj.data.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn stat_reports_absence_as_not_found() {
        let store = MemoryStore::new();
        let err = store.stat("missing").await.expect_err("absent key");
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn get_streams_stored_bytes() {
        let store = MemoryStore::new();
        store.put("a/b.txt", b"hello".to_vec(), Utc::now());

        let mut body = store.get("a/b.txt").await.expect("get");
        let mut buf = Vec::new();
        body.read_to_end(&mut buf).await.expect("read");
        assert_eq!(buf, b"hello");
    }

    #[tokio::test]
    async fn list_filters_by_prefix_in_key_order() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.put("rules/b.yml", b"b".to_vec(), now);
        store.put("rules/a.yml", b"a".to_vec(), now);
        store.put("other/c.yml", b"c".to_vec(), now);

        let listed = store.list("rules/").await.expect("list");
        let keys: Vec<&str> = listed.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["rules/a.yml", "rules/b.yml"]);
    }
}
