use cairn_types::{Errno, ErrorEnvelope, Record};
use reqwest::{header, Client as ReqwestClient, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

pub mod cached;

pub use cached::CachedResourceClient;

const TOTAL_RECORDS: &str = "Total-Records";
const NEXT_PAGE: &str = "Next-Page";

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The server answered with an error envelope.
    #[error("{0}")]
    Envelope(ErrorEnvelope),

    /// Non-success answer whose body is not an error envelope.
    #[error("Unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Envelope(envelope) => Some(envelope.code),
            Self::UnexpectedStatus { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            Self::Decode(_) => None,
        }
    }

    pub fn errno(&self) -> Option<Errno> {
        match self {
            Self::Envelope(envelope) => envelope.errno(),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND.as_u16())
    }

    /// Seconds the server asked to wait before retrying a transient failure.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::Envelope(envelope) if envelope.errno() == Some(Errno::Backend) => envelope
                .details
                .as_ref()
                .and_then(|details| details.get("retry_after"))
                .and_then(Value::as_u64),
            _ => None,
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Deserialize)]
struct DataResponse<T> {
    data: T,
}

#[derive(Serialize)]
struct DataRequest<'a> {
    data: &'a Value,
}

/// One page of a collection listing.
#[derive(Debug, Clone, Default)]
pub struct RecordList {
    pub records: Vec<Record>,
    pub total: Option<u64>,
    /// Collection timestamp at the time of the listing
    pub last_modified: Option<u64>,
    /// Absolute URL of the following page
    pub next_page: Option<String>,
}

/// Client for one collection of a cairn server
#[derive(Clone)]
pub struct ResourceClient {
    client: ReqwestClient,
    base_url: String,
    collection: String,
}

impl ResourceClient {
    /// Create a new client for `collection` (for example `"mushrooms"`)
    pub fn new(base_url: impl Into<String>, collection: impl Into<String>) -> ClientResult<Self> {
        let client = ReqwestClient::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            collection: collection.into().trim_matches('/').to_string(),
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn collection_url(&self) -> String {
        format!("{}/{}", self.base_url, self.collection)
    }

    fn record_url(&self, id: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.collection, id)
    }

    /// Create a record. Returns the stored record, or the existing one when
    /// `data` names an id that is already taken.
    pub async fn create(&self, data: &Value) -> ClientResult<Record> {
        let request = self
            .client
            .post(self.collection_url())
            .json(&DataRequest { data });
        send_record(request).await
    }

    /// Fetch a record by id
    pub async fn get(&self, id: &str) -> ClientResult<Record> {
        send_record(self.client.get(self.record_url(id))).await
    }

    /// Fetch a record only if it changed after `since`.
    /// Returns `None` when the server answers 304 Not Modified.
    pub async fn get_if_modified(&self, id: &str, since: u64) -> ClientResult<Option<Record>> {
        let response = self
            .client
            .get(self.record_url(id))
            .header(header::IF_MODIFIED_SINCE, since.to_string())
            .send()
            .await?;
        if response.status() == StatusCode::NOT_MODIFIED {
            debug!("{} unchanged since {}", id, since);
            return Ok(None);
        }
        let body: DataResponse<Record> = decode(response).await?;
        Ok(Some(body.data))
    }

    /// Replace a record, creating it when it does not exist yet.
    /// With `expected`, the write only happens if the stored version matches.
    pub async fn update(&self, id: &str, data: &Value, expected: Option<u64>) -> ClientResult<Record> {
        let request = self
            .client
            .put(self.record_url(id))
            .json(&DataRequest { data });
        send_record(precondition(request, expected)).await
    }

    /// Merge `changes` into an existing record
    pub async fn patch(&self, id: &str, changes: &Value, expected: Option<u64>) -> ClientResult<Record> {
        let request = self
            .client
            .patch(self.record_url(id))
            .json(&DataRequest { data: changes });
        send_record(precondition(request, expected)).await
    }

    /// Delete a record. Returns its tombstone.
    pub async fn delete(&self, id: &str, expected: Option<u64>) -> ClientResult<Record> {
        let request = self.client.delete(self.record_url(id));
        send_record(precondition(request, expected)).await
    }

    /// List the collection with querystring filters, sorting and pagination
    /// parameters (`_sort`, `_limit`, `_since`, `min_size`...)
    pub async fn list(&self, params: &[(&str, &str)]) -> ClientResult<RecordList> {
        let request = self.client.get(self.collection_url()).query(params);
        fetch_list(request).await
    }

    /// Follow the `Next-Page` link of a listing, if any
    pub async fn next_page(&self, page: &RecordList) -> ClientResult<Option<RecordList>> {
        match &page.next_page {
            Some(url) => fetch_list(self.client.get(url)).await.map(Some),
            None => Ok(None),
        }
    }

    /// Fetch every page of a listing
    pub async fn list_all(&self, params: &[(&str, &str)]) -> ClientResult<Vec<Record>> {
        let mut page = self.list(params).await?;
        let mut records = std::mem::take(&mut page.records);
        while let Some(mut next) = self.next_page(&page).await? {
            records.append(&mut next.records);
            page = next;
        }
        Ok(records)
    }

    /// Delete every record matching the filters. Returns the tombstones.
    pub async fn delete_all(&self, params: &[(&str, &str)]) -> ClientResult<Vec<Record>> {
        let response = self
            .client
            .delete(self.collection_url())
            .query(params)
            .send()
            .await?;
        let body: DataResponse<Vec<Record>> = decode(response).await?;
        Ok(body.data)
    }

    /// Check if the service and its storage are healthy
    pub async fn heartbeat(&self) -> ClientResult<bool> {
        let url = format!("{}/__heartbeat__", self.base_url);

        let response = self.client.get(&url).send().await?;

        Ok(response.status() == StatusCode::OK)
    }
}

fn precondition(request: RequestBuilder, expected: Option<u64>) -> RequestBuilder {
    match expected {
        Some(timestamp) => request.header(header::IF_UNMODIFIED_SINCE, timestamp.to_string()),
        None => request,
    }
}

fn header_u64(response: &Response, name: &str) -> Option<u64> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim_matches('"').parse().ok())
}

async fn send_record(request: RequestBuilder) -> ClientResult<Record> {
    let response = request.send().await?;
    let body: DataResponse<Record> = decode(response).await?;
    Ok(body.data)
}

async fn fetch_list(request: RequestBuilder) -> ClientResult<RecordList> {
    let response = request.send().await?;
    let total = header_u64(&response, TOTAL_RECORDS);
    let last_modified = header_u64(&response, header::LAST_MODIFIED.as_str());
    let next_page = response
        .headers()
        .get(NEXT_PAGE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let body: DataResponse<Vec<Record>> = decode(response).await?;
    Ok(RecordList {
        records: body.data,
        total,
        last_modified,
        next_page,
    })
}

async fn decode<T: DeserializeOwned>(response: Response) -> ClientResult<T> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(match serde_json::from_str::<ErrorEnvelope>(&body) {
            Ok(envelope) => ClientError::Envelope(envelope),
            Err(_) => ClientError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            },
        });
    }
    Ok(serde_json::from_str(&body)?)
}
