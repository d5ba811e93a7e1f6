//! Error envelope builder: every failure leaves the service as an
//! [`ErrorEnvelope`] with a stable `errno`.

use axum::http::StatusCode;
use cairn_types::{Errno, ErrorEnvelope};
use serde_json::{Value, json};

use crate::resource::ResourceError;

/// Static reference included in every error envelope.
pub const ERRORS_REFERENCE: &str = "https://cairn.readthedocs.io/en/latest/api/errors.html";

pub fn format_error(
    status: StatusCode,
    errno: Errno,
    message: impl Into<String>,
    details: Option<Value>,
) -> ErrorEnvelope {
    ErrorEnvelope {
        code: status.as_u16(),
        errno: errno.as_u16(),
        error: status.canonical_reason().unwrap_or("Unknown").to_string(),
        message: message.into(),
        info: Some(ERRORS_REFERENCE.to_string()),
        details,
    }
}

impl From<&ResourceError> for ErrorEnvelope {
    fn from(err: &ResourceError) -> Self {
        let status =
            StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let details = match err {
            ResourceError::Validation(issues) => serde_json::to_value(issues).ok(),
            ResourceError::Conflict { field, record } => Some(json!({
                "field": field,
                "record": record,
            })),
            ResourceError::BackendUnavailable { retry_after, .. } => {
                Some(json!({ "retry_after": retry_after }))
            }
            ResourceError::PreconditionFailed
            | ResourceError::NotFound
            | ResourceError::Unknown(_) => None,
        };
        format_error(status, err.errno(), err.to_string(), details)
    }
}
