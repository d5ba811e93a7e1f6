use cairn_types::Record;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{ClientResult, ResourceClient};

/// Record client that keeps the last seen version of each record and
/// revalidates it with `If-Modified-Since` instead of refetching it.
pub struct CachedResourceClient {
    client: ResourceClient,
    cache: RwLock<HashMap<String, Record>>,
}

impl CachedResourceClient {
    pub fn new(client: ResourceClient) -> Self {
        Self {
            client,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn inner(&self) -> &ResourceClient {
        &self.client
    }

    pub async fn get(&self, id: &str) -> ClientResult<Record> {
        let cached = {
            let cache = self.cache.read().await;
            cache.get(id).cloned()
        };

        let Some(cached) = cached else {
            let record = self.client.get(id).await?;
            self.store(&record).await;
            return Ok(record);
        };

        let since = cached.last_modified().unwrap_or_default();
        match self.client.get_if_modified(id, since).await {
            Ok(None) => {
                debug!("Serving {} from cache", id);
                Ok(cached)
            }
            Ok(Some(fresh)) => {
                self.store(&fresh).await;
                Ok(fresh)
            }
            Err(e) => {
                if e.is_not_found() {
                    self.invalidate(id).await;
                }
                Err(e)
            }
        }
    }

    /// Replace a record, guarded by the cached version when there is one.
    pub async fn update(&self, id: &str, data: &Value) -> ClientResult<Record> {
        let expected = self.cached_version(id).await;
        let result = self.client.update(id, data, expected).await;
        self.refresh(id, result).await
    }

    /// Patch a record, guarded by the cached version when there is one.
    pub async fn patch(&self, id: &str, changes: &Value) -> ClientResult<Record> {
        let expected = self.cached_version(id).await;
        let result = self.client.patch(id, changes, expected).await;
        self.refresh(id, result).await
    }

    pub async fn delete(&self, id: &str) -> ClientResult<Record> {
        let expected = self.cached_version(id).await;
        let result = self.client.delete(id, expected).await;
        self.invalidate(id).await;
        result
    }

    pub async fn invalidate(&self, id: &str) {
        self.cache.write().await.remove(id);
    }

    pub async fn clear_cache(&self) {
        self.cache.write().await.clear();
    }

    async fn cached_version(&self, id: &str) -> Option<u64> {
        let cache = self.cache.read().await;
        cache.get(id).and_then(Record::last_modified)
    }

    async fn store(&self, record: &Record) {
        if let Some(id) = record.id() {
            let mut cache = self.cache.write().await;
            cache.insert(id.to_string(), record.clone());
        }
    }

    /// Keep the cache in line with the outcome of a write. A rejected write
    /// means the cached copy can no longer be trusted.
    async fn refresh(&self, id: &str, result: ClientResult<Record>) -> ClientResult<Record> {
        match &result {
            Ok(record) => self.store(record).await,
            Err(_) => self.invalidate(id).await,
        }
        result
    }
}
