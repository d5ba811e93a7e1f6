use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

pub const ID_FIELD: &str = "id";
pub const MODIFIED_FIELD: &str = "last_modified";
pub const DELETED_FIELD: &str = "deleted";

/// A resource record: a JSON object that carries at least `id` and
/// `last_modified` once it has been stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(&self) -> Option<&str> {
        self.0.get(ID_FIELD).and_then(Value::as_str)
    }

    pub fn last_modified(&self) -> Option<u64> {
        self.0.get(MODIFIED_FIELD).and_then(Value::as_u64)
    }

    /// True for the tombstone a backend leaves behind after a deletion.
    pub fn is_deleted(&self) -> bool {
        self.0
            .get(DELETED_FIELD)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(field.into(), value.into())
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }

    /// Build the tombstone that replaces this record on deletion.
    pub fn tombstone(id: impl Into<String>, last_modified: u64) -> Self {
        let mut record = Self::new();
        record.insert(ID_FIELD, id.into());
        record.insert(MODIFIED_FIELD, last_modified);
        record.insert(DELETED_FIELD, true);
        record
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        Value::Object(record.0)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("record must be a JSON object, got {0}")]
pub struct NotAnObject(pub Value);

impl TryFrom<Value> for Record {
    type Error = NotAnObject;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(NotAnObject(other)),
        }
    }
}

/// Where in the request an invalid value was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Location {
    Body,
    Querystring,
    Path,
    Header,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Location::Body => "body",
            Location::Querystring => "querystring",
            Location::Path => "path",
            Location::Header => "header",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub location: Location,
    pub name: Option<String>,
    pub description: String,
}

impl ValidationIssue {
    pub fn body(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            location: Location::Body,
            name: Some(name.into()),
            description: description.into(),
        }
    }

    pub fn querystring(name: Option<String>, description: impl Into<String>) -> Self {
        Self {
            location: Location::Querystring,
            name,
            description: description.into(),
        }
    }
}

/// Application error numbers. These are part of the public contract:
/// a value is never renumbered nor reused once shipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Errno {
    BadJson = 106,
    InvalidParameters = 107,
    MissingParameters = 108,
    InvalidPostedData = 109,
    InvalidResourceId = 110,
    MissingResource = 111,
    ModifiedMeanwhile = 114,
    MethodNotAllowed = 115,
    ConstraintViolated = 122,
    Backend = 201,
    Undefined = 999,
}

impl Errno {
    pub const ALL: [Errno; 11] = [
        Errno::BadJson,
        Errno::InvalidParameters,
        Errno::MissingParameters,
        Errno::InvalidPostedData,
        Errno::InvalidResourceId,
        Errno::MissingResource,
        Errno::ModifiedMeanwhile,
        Errno::MethodNotAllowed,
        Errno::ConstraintViolated,
        Errno::Backend,
        Errno::Undefined,
    ];

    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn from_u16(value: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|errno| errno.as_u16() == value)
    }
}

/// JSON body of every error response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub code: u16,
    pub errno: u16,
    pub error: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorEnvelope {
    pub fn errno(&self) -> Option<Errno> {
        Errno::from_u16(self.errno)
    }

    /// Per-field issues of a validation error, if the details carry them.
    pub fn validation_issues(&self) -> Option<Vec<ValidationIssue>> {
        self.details
            .clone()
            .and_then(|details| serde_json::from_value(details).ok())
    }
}

impl fmt::Display for ErrorEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} (errno {}): {}", self.code, self.error, self.errno, self.message)
    }
}
