use axum::body::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::ApiError;

/// Envelope of request and response payloads
#[derive(Debug, Serialize, Deserialize)]
pub struct DataResponse<T> {
    pub data: T,
}

/// Response for the root endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct HelloResponse {
    pub hello: String,
    pub version: String,
    pub url: String,
    pub documentation: String,
}

/// Response for the heartbeat endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub status: String,
    pub storage: bool,
    pub timestamp: String,
}

/// Extract the `data` member of a `{"data": ...}` request body.
pub fn parse_payload(body: &Bytes) -> Result<Value, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ApiError::invalid_body(Some("data"), "data is missing"));
    }

    let payload: Value = serde_json::from_slice(body)
        .map_err(|e| ApiError::invalid_body(None, format!("Invalid JSON request body: {e}")))?;

    let Value::Object(mut payload) = payload else {
        return Err(ApiError::invalid_body(
            None,
            "Invalid JSON request body: expected an object",
        ));
    };

    if let Some(key) = payload.keys().find(|key| key.as_str() != "data") {
        return Err(ApiError::invalid_body(
            Some(key.as_str()),
            format!("{key} is not allowed"),
        ));
    }

    payload
        .remove("data")
        .ok_or_else(|| ApiError::invalid_body(Some("data"), "data is missing"))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::resource::ResourceError;
    use serde_json::json;

    fn description(err: ApiError) -> String {
        match err {
            ApiError::Resource(ResourceError::Validation(issues)) => issues[0].description.clone(),
            other => panic!("expected a validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_payload() {
        let data = parse_payload(&Bytes::from(r#"{"data": {"name": "Cep"}}"#)).unwrap();
        assert_eq!(data, json!({"name": "Cep"}));
    }

    #[test]
    fn test_parse_payload_errors() {
        assert_eq!(description(parse_payload(&Bytes::new()).unwrap_err()), "data is missing");
        assert_eq!(description(parse_payload(&Bytes::from("{}")).unwrap_err()), "data is missing");
        assert_eq!(
            description(parse_payload(&Bytes::from(r#"{"data": {}, "permissions": {}}"#)).unwrap_err()),
            "permissions is not allowed"
        );
        assert!(
            description(parse_payload(&Bytes::from("{\"data\": ")).unwrap_err())
                .starts_with("Invalid JSON request body: ")
        );
    }
}
