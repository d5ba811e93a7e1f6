use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use cairn_types::{Errno, ErrorEnvelope, Location, ValidationIssue};

use crate::errors::format_error;
use crate::resource::ResourceError;

#[derive(Debug)]
pub enum ApiError {
    Resource(ResourceError),
    UnknownResource(String),
    MethodNotAllowed,
    /// 304, carrying the timestamp the client already has
    NotModified { last_modified: u64 },
}

impl ApiError {
    pub fn invalid_body(name: Option<&str>, description: impl Into<String>) -> Self {
        Self::Resource(ResourceError::invalid(ValidationIssue {
            location: Location::Body,
            name: name.map(str::to_string),
            description: description.into(),
        }))
    }

    pub fn invalid_header(name: &str, description: impl Into<String>) -> Self {
        Self::Resource(ResourceError::invalid(ValidationIssue {
            location: Location::Header,
            name: Some(name.to_string()),
            description: description.into(),
        }))
    }
}

impl From<ResourceError> for ApiError {
    fn from(err: ResourceError) -> Self {
        Self::Resource(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let envelope = match &self {
            ApiError::Resource(err) => ErrorEnvelope::from(err),
            ApiError::UnknownResource(path) => format_error(
                StatusCode::NOT_FOUND,
                Errno::MissingResource,
                format!("Unknown resource '{path}'"),
                None,
            ),
            ApiError::MethodNotAllowed => format_error(
                StatusCode::METHOD_NOT_ALLOWED,
                Errno::MethodNotAllowed,
                "Method not allowed on this endpoint.",
                None,
            ),
            ApiError::NotModified { last_modified } => {
                let mut response = StatusCode::NOT_MODIFIED.into_response();
                response
                    .headers_mut()
                    .insert(header::LAST_MODIFIED, HeaderValue::from(*last_modified));
                return response;
            }
        };

        let status =
            StatusCode::from_u16(envelope.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = (status, Json(envelope)).into_response();

        if let ApiError::Resource(ResourceError::BackendUnavailable { retry_after, .. }) = &self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(*retry_after));
        }
        response
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use axum::body::to_bytes;

    async fn envelope(response: Response) -> ErrorEnvelope {
        let body = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_resource_errors_use_their_status() {
        let response = ApiError::from(ResourceError::NotFound).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let envelope = envelope(response).await;
        assert_eq!(envelope.errno, 110);
        assert_eq!(envelope.error, "Not Found");
    }

    #[tokio::test]
    async fn test_unknown_resource() {
        let response = ApiError::UnknownResource("/unicorns".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(envelope(response).await.errno, 111);
    }

    #[tokio::test]
    async fn test_method_not_allowed() {
        let response = ApiError::MethodNotAllowed.into_response();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(envelope(response).await.errno, 115);
    }

    #[tokio::test]
    async fn test_backend_failure_sets_retry_after() {
        let err = ResourceError::unavailable("down").with_retry_after(9);
        let response = ApiError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[header::RETRY_AFTER], "9");
    }

    #[tokio::test]
    async fn test_not_modified_has_no_body() {
        let response = ApiError::NotModified { last_modified: 42 }.into_response();
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
        assert_eq!(response.headers()[header::LAST_MODIFIED], "42");
        let body = to_bytes(response.into_body(), 1024).await.unwrap();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_header_location() {
        let response = ApiError::invalid_header("If-Match", "Invalid value").into_response();
        let envelope = envelope(response).await;
        let issues = envelope.validation_issues().unwrap();
        assert_eq!(issues[0].location, Location::Header);
    }
}
