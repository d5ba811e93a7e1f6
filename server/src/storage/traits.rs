use async_trait::async_trait;
use cairn_types::Record;

use super::error::StorageResult;
use super::query::{Filter, ListQuery};

/// Identifies a record collection and the fields that must hold unique
/// values among its live records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection {
    pub name: String,
    pub unique_fields: Vec<String>,
}

impl Collection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unique_fields: Vec::new(),
        }
    }

    pub fn with_unique_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unique_fields = fields.into_iter().map(Into::into).collect();
        self
    }
}

/// Persistence contract shared by every backend.
///
/// Writes stamp `last_modified` with a value strictly greater than any other
/// timestamp of the collection. The unicity check and the write it guards run
/// as one atomic step.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn ping(&self) -> StorageResult<()>;

    /// Remove every collection.
    async fn flush(&self) -> StorageResult<()>;

    /// Highest `last_modified` ever assigned in the collection, tombstones included.
    async fn collection_timestamp(&self, collection: &Collection) -> StorageResult<u64>;

    /// Store a new record. An `id` is generated when the record has none.
    ///
    /// # Errors
    /// Returns `StorageError::Unicity` when a live record already uses the
    /// same `id` or the same value for one of the unique fields.
    async fn create(&self, collection: &Collection, record: Record) -> StorageResult<Record>;

    async fn get(&self, collection: &Collection, id: &str) -> StorageResult<Record>;

    /// Replace a live record.
    ///
    /// # Arguments
    /// * `if_match` - When set, the stored `last_modified` must be equal to it,
    ///   otherwise `StorageError::ModifiedMeanwhile` is returned and nothing is written.
    async fn update(
        &self,
        collection: &Collection,
        id: &str,
        record: Record,
        if_match: Option<u64>,
    ) -> StorageResult<Record>;

    /// Replace a live record by its tombstone and return the tombstone.
    ///
    /// Deleting an id that is unknown or already deleted is `RecordNotFound`,
    /// so a retried delete reports not found.
    async fn delete(
        &self,
        collection: &Collection,
        id: &str,
        if_match: Option<u64>,
    ) -> StorageResult<Record>;

    /// Tombstone every live record matching `filters` and return the tombstones.
    ///
    /// Backends without multi-record writes may stop part way; records already
    /// tombstoned stay deleted and a repeated call only returns the others.
    async fn delete_all(&self, collection: &Collection, filters: &[Filter])
        -> StorageResult<Vec<Record>>;

    /// Matching records for the query, with the number of records matching
    /// its filters before pagination and limit are applied.
    async fn get_all(
        &self,
        collection: &Collection,
        query: &ListQuery,
    ) -> StorageResult<(Vec<Record>, usize)>;
}
