use async_trait::async_trait;
use cairn_types::{DELETED_FIELD, ID_FIELD, MODIFIED_FIELD, Record};
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::config::StorageConfig;
use super::error::{StorageError, StorageResult};
use super::query::{self, Filter, ListQuery};
use super::traits::{Collection, StorageBackend};

/// Backend keeping one JSON document per record on an object store
/// (`{collection}/records/{id}.json`), tombstones included.
///
/// Each write is a single object `put`, so a record and the unique values it
/// holds are committed together. Writes are serialised per instance: unicity
/// is guaranteed as long as one instance writes to the store.
///
/// `delete_all` is one `put` per matching record, not one atomic write. A call
/// interrupted part way (a timeout, a store failure) keeps the tombstones it
/// already wrote; calling it again with the same filters deletes the rest.
pub struct ObjectStoreBackend {
    store: Arc<dyn ObjectStore>,
    write_lock: Mutex<()>,
}

impl ObjectStoreBackend {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    pub fn from_config(config: &StorageConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn ObjectStore> = match config {
            StorageConfig::Memory => Arc::new(InMemory::new()),
            StorageConfig::Local { path } => {
                info!("Initializing local storage at: {:?}", path);
                Arc::new(LocalFileSystem::new_with_prefix(path)?)
            }
            StorageConfig::S3 {
                bucket,
                region,
                endpoint,
                access_key_id,
                secret_access_key,
                allow_http,
            } => {
                info!("Initializing S3 storage in bucket: {}", bucket);
                let mut builder = AmazonS3Builder::new()
                    .with_bucket_name(bucket)
                    .with_allow_http(*allow_http);
                if let Some(region) = region {
                    builder = builder.with_region(region);
                }
                if let Some(endpoint) = endpoint {
                    builder = builder.with_endpoint(endpoint);
                }
                if let Some(key) = access_key_id {
                    builder = builder.with_access_key_id(key);
                }
                if let Some(secret) = secret_access_key {
                    builder = builder.with_secret_access_key(secret);
                }
                Arc::new(builder.build()?)
            }
        };

        Ok(Self::new(store))
    }

    fn records_path(&self, collection: &Collection) -> Path {
        Path::from(collection.name.as_str()).child("records")
    }

    fn record_path(&self, collection: &Collection, id: &str) -> Path {
        self.records_path(collection).child(format!("{id}.json"))
    }

    async fn read_record(&self, path: &Path) -> StorageResult<Option<Record>> {
        match self.store.get(path).await {
            Ok(result) => {
                let bytes = result.bytes().await?;
                Ok(Some(serde_json::from_slice(&bytes)?))
            }
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_record(&self, collection: &Collection, record: &Record) -> StorageResult<()> {
        let id = record
            .id()
            .ok_or_else(|| StorageError::Backend("record has no id".to_string()))?;
        let json = serde_json::to_vec(record)?;
        self.store
            .put(&self.record_path(collection, id), PutPayload::from(json))
            .await?;
        Ok(())
    }

    /// Every stored document of the collection, tombstones included.
    async fn read_all(&self, collection: &Collection) -> StorageResult<Vec<Record>> {
        let prefix = self.records_path(collection);
        let listing: object_store::Result<Vec<Path>> = self
            .store
            .list(Some(&prefix))
            .map_ok(|meta| meta.location)
            .try_collect()
            .await;
        let locations = match listing {
            Ok(locations) => locations,
            Err(object_store::Error::NotFound { .. }) => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::with_capacity(locations.len());
        for location in locations {
            if location.extension() != Some("json") {
                continue;
            }
            if let Some(record) = self.read_record(&location).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn read_live(&self, collection: &Collection, id: &str) -> StorageResult<Record> {
        self.read_record(&self.record_path(collection, id))
            .await?
            .filter(|record| !record.is_deleted())
            .ok_or_else(|| StorageError::not_found(id))
    }

    fn max_timestamp(records: &[Record]) -> Option<u64> {
        records.iter().filter_map(Record::last_modified).max()
    }

    fn check_version(current: &Record, if_match: Option<u64>) -> StorageResult<()> {
        let current = current.last_modified().unwrap_or(0);
        match if_match {
            Some(expected) if expected != current => {
                Err(StorageError::ModifiedMeanwhile { current })
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl StorageBackend for ObjectStoreBackend {
    async fn ping(&self) -> StorageResult<()> {
        self.store.list_with_delimiter(None).await?;
        Ok(())
    }

    async fn flush(&self) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        let locations: Vec<Path> = self
            .store
            .list(None)
            .map_ok(|meta| meta.location)
            .try_collect()
            .await?;
        for location in &locations {
            self.store.delete(location).await?;
        }
        debug!("Flushed {} objects", locations.len());
        Ok(())
    }

    async fn collection_timestamp(&self, collection: &Collection) -> StorageResult<u64> {
        let records = self.read_all(collection).await?;
        Ok(Self::max_timestamp(&records).unwrap_or_else(query::now_millis))
    }

    #[instrument(skip(self, record), fields(collection = %collection.name))]
    async fn create(&self, collection: &Collection, mut record: Record) -> StorageResult<Record> {
        let id = match record.id() {
            Some(id) => id.to_string(),
            None => Uuid::new_v4().to_string(),
        };
        record.insert(ID_FIELD, id.clone());
        record.remove(DELETED_FIELD);

        let _guard = self.write_lock.lock().await;
        let records = self.read_all(collection).await?;

        if let Some(existing) = records
            .iter()
            .find(|r| r.id() == Some(id.as_str()) && !r.is_deleted())
        {
            return Err(StorageError::Unicity {
                field: ID_FIELD.to_string(),
                record: existing.clone(),
            });
        }
        if let Some((field, existing)) =
            query::find_conflict(&records, &record, &collection.unique_fields, None)
        {
            return Err(StorageError::Unicity {
                field,
                record: existing,
            });
        }

        let timestamp = query::next_timestamp(Self::max_timestamp(&records).unwrap_or(0));
        record.insert(MODIFIED_FIELD, timestamp);
        self.write_record(collection, &record).await?;
        debug!("Created record {}", id);
        Ok(record)
    }

    async fn get(&self, collection: &Collection, id: &str) -> StorageResult<Record> {
        self.read_live(collection, id).await
    }

    #[instrument(skip(self, record), fields(collection = %collection.name))]
    async fn update(
        &self,
        collection: &Collection,
        id: &str,
        mut record: Record,
        if_match: Option<u64>,
    ) -> StorageResult<Record> {
        record.insert(ID_FIELD, id);
        record.remove(DELETED_FIELD);

        let _guard = self.write_lock.lock().await;
        let records = self.read_all(collection).await?;
        let current = records
            .iter()
            .find(|r| r.id() == Some(id) && !r.is_deleted())
            .ok_or_else(|| StorageError::not_found(id))?;
        Self::check_version(current, if_match)?;

        if let Some((field, existing)) =
            query::find_conflict(&records, &record, &collection.unique_fields, Some(id))
        {
            return Err(StorageError::Unicity {
                field,
                record: existing,
            });
        }

        let timestamp = query::next_timestamp(Self::max_timestamp(&records).unwrap_or(0));
        record.insert(MODIFIED_FIELD, timestamp);
        self.write_record(collection, &record).await?;
        Ok(record)
    }

    #[instrument(skip(self), fields(collection = %collection.name))]
    async fn delete(
        &self,
        collection: &Collection,
        id: &str,
        if_match: Option<u64>,
    ) -> StorageResult<Record> {
        let _guard = self.write_lock.lock().await;
        let current = self.read_live(collection, id).await?;
        Self::check_version(&current, if_match)?;

        let records = self.read_all(collection).await?;
        let timestamp = query::next_timestamp(Self::max_timestamp(&records).unwrap_or(0));
        let tombstone = Record::tombstone(id, timestamp);
        self.write_record(collection, &tombstone).await?;
        Ok(tombstone)
    }

    async fn delete_all(
        &self,
        collection: &Collection,
        filters: &[Filter],
    ) -> StorageResult<Vec<Record>> {
        let _guard = self.write_lock.lock().await;
        let records = self.read_all(collection).await?;
        let mut timestamp = Self::max_timestamp(&records).unwrap_or(0);

        let mut ids: Vec<&str> = records
            .iter()
            .filter(|record| !record.is_deleted())
            .filter(|record| filters.iter().all(|filter| filter.matches(record)))
            .filter_map(Record::id)
            .collect();
        ids.sort_unstable();

        let mut deleted = Vec::with_capacity(ids.len());
        for id in ids {
            timestamp = query::next_timestamp(timestamp);
            let tombstone = Record::tombstone(id, timestamp);
            self.write_record(collection, &tombstone).await?;
            deleted.push(tombstone);
        }
        Ok(deleted)
    }

    async fn get_all(
        &self,
        collection: &Collection,
        query: &ListQuery,
    ) -> StorageResult<(Vec<Record>, usize)> {
        let records = self.read_all(collection).await?;
        Ok(query::select(&records, query))
    }
}
