use cairn_types::{Errno, Record, ValidationIssue};
use thiserror::Error;
use tracing::error;

use crate::storage::StorageError;

/// Outcome of a failed resource operation.
///
/// Every storage failure is translated into one of these kinds before it
/// reaches the error envelope, so raw backend messages never leak.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("{}", first_description(.0))]
    Validation(Vec<ValidationIssue>),

    #[error("Conflict of field {field} on record {}", .record.id().unwrap_or_default())]
    Conflict { field: String, record: Record },

    #[error("Resource was modified meanwhile")]
    PreconditionFailed,

    #[error("The resource you are looking for could not be found.")]
    NotFound,

    #[error("Service unavailable due to high load, please retry later.")]
    BackendUnavailable { reason: String, retry_after: u64 },

    #[error("A programmatic error occured, developers have been informed.")]
    Unknown(String),
}

fn first_description(issues: &[ValidationIssue]) -> &str {
    issues
        .first()
        .map(|issue| issue.description.as_str())
        .unwrap_or("Invalid parameters")
}

pub type ResourceResult<T> = Result<T, ResourceError>;

/// Default `Retry-After` hint, in seconds.
pub const DEFAULT_RETRY_AFTER: u64 = 30;

impl ResourceError {
    pub fn invalid(issue: ValidationIssue) -> Self {
        Self::Validation(vec![issue])
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            reason: reason.into(),
            retry_after: DEFAULT_RETRY_AFTER,
        }
    }

    /// Replace the retry hint of a backend failure.
    pub fn with_retry_after(self, secs: u64) -> Self {
        match self {
            Self::BackendUnavailable { reason, .. } => Self::BackendUnavailable {
                reason,
                retry_after: secs,
            },
            other => other,
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::Conflict { .. } => 409,
            Self::PreconditionFailed => 412,
            Self::NotFound => 404,
            Self::BackendUnavailable { .. } => 503,
            Self::Unknown(_) => 500,
        }
    }

    pub fn errno(&self) -> Errno {
        match self {
            Self::Validation(_) => Errno::InvalidParameters,
            Self::Conflict { .. } => Errno::ConstraintViolated,
            Self::PreconditionFailed => Errno::ModifiedMeanwhile,
            Self::NotFound => Errno::InvalidResourceId,
            Self::BackendUnavailable { .. } => Errno::Backend,
            Self::Unknown(_) => Errno::Undefined,
        }
    }
}

impl From<StorageError> for ResourceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::RecordNotFound { .. } => Self::NotFound,
            StorageError::Unicity { field, record } => Self::Conflict { field, record },
            StorageError::ModifiedMeanwhile { .. } => Self::PreconditionFailed,
            StorageError::Backend(reason) => {
                error!("Storage backend failure: {}", reason);
                Self::unavailable(reason)
            }
        }
    }
}
