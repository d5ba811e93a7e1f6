//! In-memory storage backend.
//!
//! Every collection lives behind one [`tokio::sync::RwLock`]; each write holds
//! the write guard from the unicity check until the record is inserted, with
//! no `.await` in between, so concurrent writers are serialised and a
//! cancelled call never leaves a partial write behind.

use async_trait::async_trait;
use cairn_types::{DELETED_FIELD, ID_FIELD, MODIFIED_FIELD, Record};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::error::{StorageError, StorageResult};
use super::query::{self, Filter, ListQuery};
use super::traits::{Collection, StorageBackend};

#[derive(Default)]
struct CollectionData {
    /// Live records and tombstones, by id
    records: HashMap<String, Record>,
    timestamp: Option<u64>,
}

impl CollectionData {
    fn bump_timestamp(&mut self) -> u64 {
        let next = query::next_timestamp(self.timestamp.unwrap_or(0));
        self.timestamp = Some(next);
        next
    }

    fn live(&self, id: &str) -> Option<&Record> {
        self.records.get(id).filter(|record| !record.is_deleted())
    }

    fn check_version(&self, id: &str, if_match: Option<u64>) -> StorageResult<()> {
        let current = self
            .live(id)
            .ok_or_else(|| StorageError::not_found(id))?
            .last_modified()
            .unwrap_or(0);
        match if_match {
            Some(expected) if expected != current => {
                Err(StorageError::ModifiedMeanwhile { current })
            }
            _ => Ok(()),
        }
    }

    fn tombstone(&mut self, id: &str) -> Record {
        let timestamp = self.bump_timestamp();
        let tombstone = Record::tombstone(id, timestamp);
        self.records.insert(id.to_string(), tombstone.clone());
        tombstone
    }
}

/// Process-local backend, cheaply cloneable. All clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    collections: Arc<RwLock<HashMap<String, CollectionData>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn ping(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn flush(&self) -> StorageResult<()> {
        self.collections.write().await.clear();
        debug!("Flushed memory backend");
        Ok(())
    }

    async fn collection_timestamp(&self, collection: &Collection) -> StorageResult<u64> {
        let mut collections = self.collections.write().await;
        let data = collections.entry(collection.name.clone()).or_default();
        Ok(*data.timestamp.get_or_insert_with(query::now_millis))
    }

    async fn create(&self, collection: &Collection, mut record: Record) -> StorageResult<Record> {
        let id = match record.id() {
            Some(id) => id.to_string(),
            None => Uuid::new_v4().to_string(),
        };
        record.insert(ID_FIELD, id.clone());
        record.remove(DELETED_FIELD);

        let mut collections = self.collections.write().await;
        let data = collections.entry(collection.name.clone()).or_default();

        if let Some(existing) = data.live(&id) {
            return Err(StorageError::Unicity {
                field: ID_FIELD.to_string(),
                record: existing.clone(),
            });
        }
        if let Some((field, existing)) =
            query::find_conflict(data.records.values(), &record, &collection.unique_fields, None)
        {
            return Err(StorageError::Unicity {
                field,
                record: existing,
            });
        }

        let timestamp = data.bump_timestamp();
        record.insert(MODIFIED_FIELD, timestamp);
        data.records.insert(id, record.clone());
        Ok(record)
    }

    async fn get(&self, collection: &Collection, id: &str) -> StorageResult<Record> {
        let collections = self.collections.read().await;
        collections
            .get(&collection.name)
            .and_then(|data| data.live(id))
            .cloned()
            .ok_or_else(|| StorageError::not_found(id))
    }

    async fn update(
        &self,
        collection: &Collection,
        id: &str,
        mut record: Record,
        if_match: Option<u64>,
    ) -> StorageResult<Record> {
        record.insert(ID_FIELD, id);
        record.remove(DELETED_FIELD);

        let mut collections = self.collections.write().await;
        let data = collections
            .get_mut(&collection.name)
            .ok_or_else(|| StorageError::not_found(id))?;

        data.check_version(id, if_match)?;
        if let Some((field, existing)) = query::find_conflict(
            data.records.values(),
            &record,
            &collection.unique_fields,
            Some(id),
        ) {
            return Err(StorageError::Unicity {
                field,
                record: existing,
            });
        }

        let timestamp = data.bump_timestamp();
        record.insert(MODIFIED_FIELD, timestamp);
        data.records.insert(id.to_string(), record.clone());
        Ok(record)
    }

    async fn delete(
        &self,
        collection: &Collection,
        id: &str,
        if_match: Option<u64>,
    ) -> StorageResult<Record> {
        let mut collections = self.collections.write().await;
        let data = collections
            .get_mut(&collection.name)
            .ok_or_else(|| StorageError::not_found(id))?;

        data.check_version(id, if_match)?;
        Ok(data.tombstone(id))
    }

    async fn delete_all(
        &self,
        collection: &Collection,
        filters: &[Filter],
    ) -> StorageResult<Vec<Record>> {
        let mut collections = self.collections.write().await;
        let Some(data) = collections.get_mut(&collection.name) else {
            return Ok(Vec::new());
        };

        let mut ids: Vec<String> = data
            .records
            .values()
            .filter(|record| !record.is_deleted())
            .filter(|record| filters.iter().all(|filter| filter.matches(record)))
            .filter_map(|record| record.id().map(str::to_owned))
            .collect();
        ids.sort();

        Ok(ids.iter().map(|id| data.tombstone(id)).collect())
    }

    async fn get_all(
        &self,
        collection: &Collection,
        query: &ListQuery,
    ) -> StorageResult<(Vec<Record>, usize)> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(&collection.name)
            .map(|data| query::select(data.records.values(), query))
            .unwrap_or_default())
    }
}
