use cairn_types::{ID_FIELD, Record};
use std::sync::Arc;

use super::error::{StorageError, StorageResult};
use super::query::{Filter, ListQuery};
use super::traits::{Collection, StorageBackend};

pub const KEYVALUE_COLLECTION: &str = "__keyvalue";

/// Key/object store on top of any storage backend. Keys are record ids of a
/// reserved collection.
#[derive(Clone)]
pub struct KeyValueStore {
    storage: Arc<dyn StorageBackend>,
    collection: Collection,
}

impl KeyValueStore {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self::with_collection(storage, KEYVALUE_COLLECTION)
    }

    pub fn with_collection(storage: Arc<dyn StorageBackend>, name: impl Into<String>) -> Self {
        Self {
            storage,
            collection: Collection::new(name),
        }
    }

    pub async fn ping(&self) -> StorageResult<()> {
        self.storage.ping().await
    }

    pub async fn get(&self, key: &str) -> StorageResult<Record> {
        self.storage.get(&self.collection, key).await
    }

    /// Store `value` under `key`, replacing any previous value.
    pub async fn set(&self, key: &str, mut value: Record) -> StorageResult<Record> {
        value.insert(ID_FIELD, key);
        match self.storage.get(&self.collection, key).await {
            Ok(_) => self.storage.update(&self.collection, key, value, None).await,
            Err(StorageError::RecordNotFound { .. }) => {
                match self.storage.create(&self.collection, value.clone()).await {
                    // Lost a race against another writer of the same key.
                    Err(StorageError::Unicity { field, .. }) if field == ID_FIELD => {
                        self.storage.update(&self.collection, key, value, None).await
                    }
                    other => other,
                }
            }
            Err(e) => Err(e),
        }
    }

    pub async fn delete(&self, key: &str) -> StorageResult<Record> {
        self.storage.delete(&self.collection, key, None).await
    }

    pub async fn find(&self, filters: Vec<Filter>) -> StorageResult<Vec<Record>> {
        let query = ListQuery {
            filters,
            ..ListQuery::default()
        };
        let (records, _) = self.storage.get_all(&self.collection, &query).await?;
        Ok(records)
    }

    /// Delete every key.
    pub async fn flush(&self) -> StorageResult<Vec<Record>> {
        self.storage.delete_all(&self.collection, &[]).await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::storage::{Comparison, MemoryBackend};
    use serde_json::json;

    fn store() -> KeyValueStore {
        KeyValueStore::new(Arc::new(MemoryBackend::new()))
    }

    fn value(v: serde_json::Value) -> Record {
        Record::try_from(v).unwrap()
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let kv = store();
        kv.set("session", value(json!({"user": "alice"}))).await.unwrap();

        let stored = kv.get("session").await.unwrap();
        assert_eq!(stored.id(), Some("session"));
        assert_eq!(stored.get("user"), Some(&json!("alice")));
    }

    #[tokio::test]
    async fn test_set_overwrites_existing_key() {
        let kv = store();
        let first = kv.set("session", value(json!({"user": "alice"}))).await.unwrap();
        let second = kv.set("session", value(json!({"user": "bob"}))).await.unwrap();

        assert!(second.last_modified() > first.last_modified());
        assert_eq!(kv.get("session").await.unwrap().get("user"), Some(&json!("bob")));
    }

    #[tokio::test]
    async fn test_delete_and_missing_keys() {
        let kv = store();
        assert!(matches!(
            kv.get("nothing").await,
            Err(StorageError::RecordNotFound { .. })
        ));

        kv.set("session", value(json!({"user": "alice"}))).await.unwrap();
        let tombstone = kv.delete("session").await.unwrap();
        assert!(tombstone.is_deleted());
        assert!(kv.get("session").await.is_err());
    }

    #[tokio::test]
    async fn test_find_and_flush() {
        let kv = store();
        kv.set("a", value(json!({"kind": "cache"}))).await.unwrap();
        kv.set("b", value(json!({"kind": "session"}))).await.unwrap();
        kv.set("c", value(json!({"kind": "cache"}))).await.unwrap();

        let caches = kv
            .find(vec![Filter::new("kind", "cache", Comparison::Eq)])
            .await
            .unwrap();
        assert_eq!(caches.len(), 2);

        let flushed = kv.flush().await.unwrap();
        assert_eq!(flushed.len(), 3);
        assert!(kv.find(Vec::new()).await.unwrap().is_empty());
    }
}
