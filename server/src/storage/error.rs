use cairn_types::Record;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Record not found: {id}")]
    RecordNotFound { id: String },

    #[error("Unicity constraint violated on field {field}")]
    Unicity { field: String, record: Record },

    #[error("Record was modified meanwhile (current version {current})")]
    ModifiedMeanwhile { current: u64 },

    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::RecordNotFound { id: id.into() }
    }
}

impl From<object_store::Error> for StorageError {
    fn from(err: object_store::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Backend(format!("Serialization error: {err}"))
    }
}

pub type StorageResult<T> = Result<T, StorageError>;
