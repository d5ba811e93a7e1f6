use cairn_types::{ID_FIELD, MODIFIED_FIELD, Record, ValidationIssue};
use futures::stream::{self, Stream, TryStreamExt};
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use super::definition::ResourceDefinition;
use super::error::{DEFAULT_RETRY_AFTER, ResourceError, ResourceResult};
use super::query::{ListRequest, encode_token};
use crate::id::IdGenerator;
use crate::storage::{Collection, Filter, ListQuery, StorageBackend, StorageResult, values_equal};

/// Generated ids are retried this many times when they collide with an existing record.
pub const MAX_ID_ATTEMPTS: usize = 3;

pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    Created(Record),
    /// The client supplied the id of a record that already exists.
    Existing(Record),
}

impl CreateOutcome {
    pub fn record(&self) -> &Record {
        match self {
            Self::Created(record) | Self::Existing(record) => record,
        }
    }

    pub fn into_record(self) -> Record {
        match self {
            Self::Created(record) | Self::Existing(record) => record,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// One page of a collection listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub records: Vec<Record>,
    /// Records matching the filters, over all pages
    pub total: usize,
    /// Token of the following page, if there is one
    pub next_token: Option<String>,
}

/// Maps CRUD intents on one resource onto the storage backend.
///
/// Holds no mutable state: every consistency decision is taken by the
/// backend's atomic write path.
pub struct ResourceController {
    definition: ResourceDefinition,
    collection: Collection,
    storage: Arc<dyn StorageBackend>,
    id_generator: Arc<dyn IdGenerator>,
    timeout: Duration,
    retry_after: u64,
}

impl ResourceController {
    /// `default_generator` is used unless the definition carries its own.
    pub fn new(
        definition: ResourceDefinition,
        storage: Arc<dyn StorageBackend>,
        default_generator: Arc<dyn IdGenerator>,
    ) -> Self {
        let id_generator = definition
            .id_generator
            .clone()
            .unwrap_or(default_generator);
        Self {
            collection: definition.collection(),
            definition,
            storage,
            id_generator,
            timeout: DEFAULT_BACKEND_TIMEOUT,
            retry_after: DEFAULT_RETRY_AFTER,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after = secs;
        self
    }

    pub fn definition(&self) -> &ResourceDefinition {
        &self.definition
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn known_fields(&self) -> Vec<String> {
        self.definition.validator.known_fields()
    }

    pub fn is_valid_id(&self, id: &str) -> bool {
        self.id_generator.is_valid(id)
    }

    /// Run a backend call under the configured timeout.
    async fn call<T, F>(&self, operation: &str, call: F) -> ResourceResult<T>
    where
        F: Future<Output = StorageResult<T>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result.map_err(|e| ResourceError::from(e).with_retry_after(self.retry_after)),
            Err(_) => {
                error!(
                    resource = %self.definition.name,
                    "Backend {} timed out after {:?}", operation, self.timeout
                );
                Err(ResourceError::unavailable(format!("{operation} timed out"))
                    .with_retry_after(self.retry_after))
            }
        }
    }

    fn validate(&self, raw: &Value) -> ResourceResult<Record> {
        self.definition
            .validator
            .validate(raw)
            .map_err(ResourceError::Validation)
    }

    fn check_version(record: &Record, expected: Option<u64>) -> ResourceResult<()> {
        match expected {
            Some(expected) if record.last_modified() != Some(expected) => {
                Err(ResourceError::PreconditionFailed)
            }
            _ => Ok(()),
        }
    }

    /// Reject changes to read-only fields; carry over the omitted ones.
    fn enforce_read_only(
        &self,
        input: &Value,
        record: &mut Record,
        old: &Record,
    ) -> ResourceResult<()> {
        let mut issues = Vec::new();
        for field in self.definition.validator.read_only_fields() {
            let previous = old.get(&field).cloned();
            let supplied = input.get(&field).is_some();
            match (supplied, previous) {
                (true, previous) => {
                    let unchanged = match (record.get(&field), previous.as_ref()) {
                        (Some(new), Some(prev)) => values_equal(new, prev),
                        (None, None) => true,
                        _ => false,
                    };
                    if !unchanged {
                        issues.push(ValidationIssue::body(
                            field.clone(),
                            format!("Cannot modify {field}"),
                        ));
                    }
                }
                (false, Some(previous)) => {
                    record.insert(field, previous);
                }
                (false, None) => {}
            }
        }
        if issues.is_empty() {
            Ok(())
        } else {
            Err(ResourceError::Validation(issues))
        }
    }

    /// Validate `raw` as the next version of `old`.
    fn replacement(&self, raw: Value, old: &Record) -> ResourceResult<Record> {
        let raw = self.definition.hooks.preprocess(raw)?;
        let mut record = self.validate(&raw)?;
        self.enforce_read_only(&raw, &mut record, old)?;
        self.definition.hooks.process_record(record, Some(old))
    }

    #[instrument(skip(self, raw), fields(resource = %self.definition.name))]
    pub async fn create(&self, raw: Value) -> ResourceResult<CreateOutcome> {
        let raw = self.definition.hooks.preprocess(raw)?;
        let record = self.validate(&raw)?;
        let record = self.definition.hooks.process_record(record, None)?;

        let supplied = record.id().map(str::to_string);
        if let Some(id) = &supplied {
            if !self.id_generator.is_valid(id) {
                return Err(ResourceError::invalid(ValidationIssue::body(
                    ID_FIELD,
                    format!("{id} is not a valid record id"),
                )));
            }
        }

        for attempt in 1..=MAX_ID_ATTEMPTS {
            let mut candidate = record.clone();
            if supplied.is_none() {
                candidate.insert(ID_FIELD, self.id_generator.generate());
            }

            match self
                .call("create", self.storage.create(&self.collection, candidate))
                .await
            {
                Ok(stored) => {
                    info!(id = stored.id().unwrap_or_default(), "Record created");
                    return Ok(CreateOutcome::Created(stored));
                }
                Err(ResourceError::Conflict { field, record: existing }) if field == ID_FIELD => {
                    if supplied.is_some() {
                        debug!("Record id already in use, returning existing record");
                        return Ok(CreateOutcome::Existing(existing));
                    }
                    warn!(attempt, "Generated id collides with an existing record");
                }
                Err(e) => return Err(e),
            }
        }

        error!(
            resource = %self.definition.name,
            "Could not generate a unique id after {} attempts", MAX_ID_ATTEMPTS
        );
        Err(ResourceError::unavailable("id generation exhausted").with_retry_after(self.retry_after))
    }

    #[instrument(skip(self), fields(resource = %self.definition.name))]
    pub async fn get(&self, id: &str) -> ResourceResult<Record> {
        if !self.is_valid_id(id) {
            return Err(ResourceError::NotFound);
        }
        self.call("get", self.storage.get(&self.collection, id)).await
    }

    /// Replace an existing record.
    #[instrument(skip(self, raw), fields(resource = %self.definition.name))]
    pub async fn update(
        &self,
        id: &str,
        raw: Value,
        expected: Option<u64>,
    ) -> ResourceResult<Record> {
        let old = self.get(id).await?;
        Self::check_version(&old, expected)?;
        let record = self.replacement(raw, &old)?;
        let updated = self
            .call("update", self.storage.update(&self.collection, id, record, expected))
            .await?;
        info!(id, "Record replaced");
        Ok(updated)
    }

    /// Replace the record, or create it under `id` when it does not exist.
    /// Returns the stored record and whether it was created.
    #[instrument(skip(self, raw), fields(resource = %self.definition.name))]
    pub async fn upsert(
        &self,
        id: &str,
        raw: Value,
        expected: Option<u64>,
    ) -> ResourceResult<(Record, bool)> {
        if !self.is_valid_id(id) {
            return Err(ResourceError::NotFound);
        }

        // A concurrent creation of the same id turns the second pass into an update.
        for _ in 0..2 {
            match self.get(id).await {
                Ok(_) => {
                    let record = self.update(id, raw.clone(), expected).await?;
                    return Ok((record, false));
                }
                Err(ResourceError::NotFound) => {}
                Err(e) => return Err(e),
            }

            if expected.is_some() {
                return Err(ResourceError::PreconditionFailed);
            }

            let raw = self.definition.hooks.preprocess(raw.clone())?;
            let mut record = self.validate(&raw)?;
            if record.id().is_some_and(|supplied| supplied != id) {
                return Err(ResourceError::invalid(ValidationIssue::body(
                    ID_FIELD,
                    format!("Cannot modify {ID_FIELD}"),
                )));
            }
            record.insert(ID_FIELD, id);
            let record = self.definition.hooks.process_record(record, None)?;

            match self
                .call("create", self.storage.create(&self.collection, record))
                .await
            {
                Ok(stored) => {
                    info!(id, "Record created");
                    return Ok((stored, true));
                }
                Err(ResourceError::Conflict { field, .. }) if field == ID_FIELD => continue,
                Err(e) => return Err(e),
            }
        }
        Err(ResourceError::PreconditionFailed)
    }

    /// Merge `changes` into the record. When the merge changes nothing the
    /// stored record is returned and no write happens.
    #[instrument(skip(self, changes), fields(resource = %self.definition.name))]
    pub async fn patch(
        &self,
        id: &str,
        changes: Value,
        expected: Option<u64>,
    ) -> ResourceResult<Record> {
        let old = self.get(id).await?;
        Self::check_version(&old, expected)?;

        let Value::Object(changes) = changes else {
            return Err(ResourceError::invalid(ValidationIssue::body(
                "data",
                format!("{changes} is not an object"),
            )));
        };

        let mut merged: Map<String, Value> = old.clone().into_inner();
        merged.remove(MODIFIED_FIELD);
        merged.extend(changes);

        let record = self.replacement(Value::Object(merged), &old)?;

        let content = |record: &Record| {
            let mut fields = record.fields().clone();
            fields.remove(MODIFIED_FIELD);
            fields
        };
        if content(&record) == content(&old) {
            debug!(id, "Patch changes nothing");
            return Ok(old);
        }

        let updated = self
            .call("update", self.storage.update(&self.collection, id, record, expected))
            .await?;
        info!(id, "Record patched");
        Ok(updated)
    }

    /// Delete a record and return its tombstone.
    #[instrument(skip(self), fields(resource = %self.definition.name))]
    pub async fn delete(&self, id: &str, expected: Option<u64>) -> ResourceResult<Record> {
        let old = self.get(id).await?;
        Self::check_version(&old, expected)?;
        self.definition.hooks.pre_delete(&old)?;
        let tombstone = self
            .call("delete", self.storage.delete(&self.collection, id, expected))
            .await?;
        info!(id, "Record deleted");
        Ok(tombstone)
    }

    /// Delete every record matching `filters`, provided the collection was
    /// not modified after `expected`.
    #[instrument(skip(self, filters), fields(resource = %self.definition.name))]
    pub async fn delete_all(
        &self,
        filters: Vec<Filter>,
        expected: Option<u64>,
    ) -> ResourceResult<Vec<Record>> {
        self.check_collection_unmodified(expected).await?;

        let query = ListQuery {
            filters: filters.clone(),
            ..ListQuery::default()
        };
        let (doomed, _) = self
            .call("get_all", self.storage.get_all(&self.collection, &query))
            .await?;
        for record in &doomed {
            self.definition.hooks.pre_delete(record)?;
        }

        let tombstones = self
            .call("delete_all", self.storage.delete_all(&self.collection, &filters))
            .await?;
        info!(count = tombstones.len(), "Records deleted");
        Ok(tombstones)
    }

    /// Current timestamp of the collection.
    pub async fn timestamp(&self) -> ResourceResult<u64> {
        self.call(
            "collection_timestamp",
            self.storage.collection_timestamp(&self.collection),
        )
        .await
    }

    /// `PreconditionFailed` when the collection changed after `expected`.
    pub async fn check_collection_unmodified(&self, expected: Option<u64>) -> ResourceResult<()> {
        if let Some(expected) = expected {
            let current = self.timestamp().await?;
            if current > expected {
                return Err(ResourceError::PreconditionFailed);
            }
        }
        Ok(())
    }

    #[instrument(skip(self, request), fields(resource = %self.definition.name))]
    pub async fn list(&self, request: &ListRequest) -> ResourceResult<Page> {
        // One extra record tells whether a next page exists.
        let query = ListQuery {
            filters: request.filters.clone(),
            sorting: request.sorting.clone(),
            pagination_rules: request.pagination_rules(),
            limit: request.limit.map(|limit| limit.saturating_add(1)),
            include_deleted: request.include_deleted(),
        };
        let (mut records, total) = self
            .call("get_all", self.storage.get_all(&self.collection, &query))
            .await?;

        let next_token = match request.limit {
            Some(limit) if records.len() > limit => {
                records.truncate(limit);
                records
                    .last()
                    .map(|last| encode_token(&request.sorting, last))
            }
            _ => None,
        };
        debug!(count = records.len(), total, "Listed records");

        Ok(Page {
            records,
            total,
            next_token,
        })
    }

    async fn next_page(
        &self,
        request: ListRequest,
    ) -> ResourceResult<(Vec<Record>, Option<ListRequest>)> {
        let page = self.list(&request).await?;
        let next = match page.next_token {
            Some(_) => page.records.last().map(|last| ListRequest {
                token: Some(
                    request
                        .sorting
                        .iter()
                        .map(|sort| {
                            let value = last.get(&sort.field).cloned().unwrap_or(Value::Null);
                            (sort.field.clone(), value)
                        })
                        .collect(),
                ),
                ..request.clone()
            }),
            None => None,
        };
        Ok((page.records, next))
    }

    /// Every record matching `request`, fetched lazily `page_size` at a time.
    /// Starts after `request.token` when it is set.
    pub fn stream(
        &self,
        mut request: ListRequest,
        page_size: usize,
    ) -> impl Stream<Item = ResourceResult<Record>> + '_ {
        request.limit = Some(page_size.max(1));
        stream::try_unfold(Some(request), move |state| async move {
            let Some(request) = state else {
                return Ok::<_, ResourceError>(None);
            };
            let (records, next) = self.next_page(request).await?;
            let page = stream::iter(records.into_iter().map(Ok::<Record, ResourceError>));
            Ok(Some((page, next)))
        })
        .try_flatten()
    }
}
