use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use cairn_types::Record;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::{
    dto::{DataResponse, HeartbeatResponse, HelloResponse, parse_payload},
    error::{ApiError, ApiResult},
    state::AppState,
};
use crate::resource::{ListRequest, ResourceError, extract_filters};

pub const TOTAL_RECORDS: HeaderName = HeaderName::from_static("total-records");
pub const NEXT_PAGE: HeaderName = HeaderName::from_static("next-page");
const IF_MODIFIED_SINCE: &str = "If-Modified-Since";
const IF_UNMODIFIED_SINCE: &str = "If-Unmodified-Since";

type Params = Vec<(String, String)>;

/// Millisecond timestamp carried by a conditional request header.
fn timestamp_header(headers: &HeaderMap, name: &str) -> ApiResult<Option<u64>> {
    let Some(value) = headers.get(name) else {
        return Ok(None);
    };
    value
        .to_str()
        .ok()
        .map(|raw| raw.trim().trim_matches('"'))
        .and_then(|raw| raw.parse::<u64>().ok())
        .map(Some)
        .ok_or_else(|| ApiError::invalid_header(name, format!("Invalid value for {name}")))
}

fn base_url(headers: &HeaderMap) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("localhost");
    if host.contains("://") {
        host.trim_end_matches('/').to_string()
    } else {
        format!("http://{}", host.strip_suffix(":80").unwrap_or(host))
    }
}

/// Absolute URL of the page following the current one.
fn next_page_url(headers: &HeaderMap, uri: &Uri, params: &[(String, String)], limit: usize, token: &str) -> String {
    let mut query = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in params {
        if key != "_limit" && key != "_token" {
            query.append_pair(key, value);
        }
    }
    query.append_pair("_limit", &limit.to_string());
    query.append_pair("_token", token);
    format!("{}{}?{}", base_url(headers), uri.path(), query.finish())
}

fn with_timestamp(mut response: Response, timestamp: Option<u64>) -> Response {
    if let Some(timestamp) = timestamp {
        response
            .headers_mut()
            .insert(header::LAST_MODIFIED, HeaderValue::from(timestamp));
    }
    response
}

fn record_response(status: StatusCode, record: Record) -> Response {
    let timestamp = record.last_modified();
    with_timestamp((status, Json(DataResponse { data: record })).into_response(), timestamp)
}

/// GET /
pub async fn hello(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Json<HelloResponse> {
    let settings = &state.settings;
    Json(HelloResponse {
        hello: settings.project_name.clone(),
        version: settings.project_version.clone(),
        url: format!("{}/", base_url(&headers)),
        documentation: settings.project_docs.clone(),
    })
}

/// GET /__heartbeat__
#[instrument(skip(state))]
pub async fn heartbeat(State(state): State<Arc<AppState>>) -> Response {
    let healthy = match state.storage.ping().await {
        Ok(()) => true,
        Err(e) => {
            warn!("Storage heartbeat failed: {}", e);
            false
        }
    };
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = HeartbeatResponse {
        status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
        storage: healthy,
        timestamp: chrono::Utc::now().to_rfc3339(),
    };
    (status, Json(body)).into_response()
}

/// GET /:collection
#[instrument(skip(state, headers, uri))]
pub async fn collection_get(
    State(state): State<Arc<AppState>>,
    Path(collection): Path<String>,
    Query(params): Query<Params>,
    headers: HeaderMap,
    uri: Uri,
) -> ApiResult<Response> {
    let resource = state.resource(&collection)?;
    let timestamp = resource.timestamp().await?;

    if let Some(since) = timestamp_header(&headers, IF_MODIFIED_SINCE)? {
        if timestamp <= since {
            return Err(ApiError::NotModified {
                last_modified: timestamp,
            });
        }
    }
    if let Some(expected) = timestamp_header(&headers, IF_UNMODIFIED_SINCE)? {
        if timestamp > expected {
            return Err(ResourceError::PreconditionFailed.into());
        }
    }

    let request = ListRequest::from_params(
        &params,
        &resource.known_fields(),
        state.settings.paginate_by,
    )?;
    let page = resource.list(&request).await?;

    let mut response = with_timestamp(
        Json(DataResponse { data: page.records }).into_response(),
        Some(timestamp),
    );
    let response_headers = response.headers_mut();
    response_headers.insert(TOTAL_RECORDS, HeaderValue::from(page.total));
    if let (Some(token), Some(limit)) = (page.next_token, request.limit) {
        let next = next_page_url(&headers, &uri, &params, limit, &token);
        if let Ok(value) = HeaderValue::from_str(&next) {
            response_headers.insert(NEXT_PAGE, value);
        }
    }
    Ok(response)
}

/// POST /:collection
#[instrument(skip(state, headers, body))]
pub async fn collection_post(
    State(state): State<Arc<AppState>>,
    Path(collection): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let resource = state.resource(&collection)?;
    resource
        .check_collection_unmodified(timestamp_header(&headers, IF_UNMODIFIED_SINCE)?)
        .await?;

    let data = parse_payload(&body)?;
    let outcome = resource.create(data).await?;
    let status = if outcome.is_created() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok(record_response(status, outcome.into_record()))
}

/// DELETE /:collection
#[instrument(skip(state, headers))]
pub async fn collection_delete(
    State(state): State<Arc<AppState>>,
    Path(collection): Path<String>,
    Query(params): Query<Params>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let resource = state.resource(&collection)?;
    if !state.settings.delete_collection_enabled {
        return Err(ApiError::MethodNotAllowed);
    }

    let filters = extract_filters(&params, &resource.known_fields())?;
    let expected = timestamp_header(&headers, IF_UNMODIFIED_SINCE)?;
    let deleted = resource.delete_all(filters, expected).await?;
    info!("Deleted {} records from {}", deleted.len(), collection);

    let timestamp = resource.timestamp().await?;
    Ok(with_timestamp(
        Json(DataResponse { data: deleted }).into_response(),
        Some(timestamp),
    ))
}

/// GET /:collection/:id
#[instrument(skip(state, headers))]
pub async fn record_get(
    State(state): State<Arc<AppState>>,
    Path((collection, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let resource = state.resource(&collection)?;
    let record = resource.get(&id).await?;
    let timestamp = record.last_modified().unwrap_or_default();

    if let Some(since) = timestamp_header(&headers, IF_MODIFIED_SINCE)? {
        if timestamp <= since {
            return Err(ApiError::NotModified {
                last_modified: timestamp,
            });
        }
    }
    if let Some(expected) = timestamp_header(&headers, IF_UNMODIFIED_SINCE)? {
        if timestamp > expected {
            return Err(ResourceError::PreconditionFailed.into());
        }
    }

    Ok(record_response(StatusCode::OK, record))
}

/// PUT /:collection/:id
/// Replace a record, creating it when needed
#[instrument(skip(state, headers, body))]
pub async fn record_put(
    State(state): State<Arc<AppState>>,
    Path((collection, id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let resource = state.resource(&collection)?;
    let expected = timestamp_header(&headers, IF_UNMODIFIED_SINCE)?;
    let data = parse_payload(&body)?;

    let (record, created) = resource.upsert(&id, data, expected).await?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok(record_response(status, record))
}

/// PATCH /:collection/:id
#[instrument(skip(state, headers, body))]
pub async fn record_patch(
    State(state): State<Arc<AppState>>,
    Path((collection, id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let resource = state.resource(&collection)?;
    let expected = timestamp_header(&headers, IF_UNMODIFIED_SINCE)?;
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ApiError::invalid_body(None, "Empty body"));
    }
    let changes: Value = parse_payload(&body)?;

    let record = resource.patch(&id, changes, expected).await?;
    Ok(record_response(StatusCode::OK, record))
}

/// DELETE /:collection/:id
#[instrument(skip(state, headers))]
pub async fn record_delete(
    State(state): State<Arc<AppState>>,
    Path((collection, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let resource = state.resource(&collection)?;
    let expected = timestamp_header(&headers, IF_UNMODIFIED_SINCE)?;
    let tombstone = resource.delete(&id, expected).await?;
    Ok(record_response(StatusCode::OK, tombstone))
}

/// Fallback for paths matching no route
pub async fn unknown_resource(uri: Uri) -> ApiError {
    ApiError::UnknownResource(uri.path().to_string())
}
