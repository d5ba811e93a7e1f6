//! Record validation against a list of field specifications.
//!
//! A [`Schema`] is a pure function from raw JSON input to either a
//! validated [`Record`] or the ordered list of issues found.

use cairn_types::{ID_FIELD, MODIFIED_FIELD, Record, ValidationIssue};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::storage::now_millis;

pub const URL_MAX_LENGTH: usize = 2048;

/// Contract of the record validator consumed by resources.
pub trait RecordValidator: Send + Sync {
    fn validate(&self, raw: &Value) -> Result<Record, Vec<ValidationIssue>>;

    /// Fields that may be used to filter or sort records.
    fn known_fields(&self) -> Vec<String>;

    /// Fields that cannot change once the record exists.
    fn read_only_fields(&self) -> Vec<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Integer,
    Number,
    Boolean,
    /// Trimmed absolute URL, at most [`URL_MAX_LENGTH`] characters
    Url,
    /// Epoch milliseconds, defaulting to the current time
    Timestamp,
    Object,
    Array,
    Any,
}

impl FieldKind {
    fn coerce(self, value: &Value) -> Result<Value, String> {
        let accepted = match self {
            Self::String => value.is_string(),
            Self::Integer | Self::Timestamp => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::Any => true,
            Self::Url => return coerce_url(value),
        };
        if accepted {
            Ok(value.clone())
        } else {
            Err(format!("{value} is not {}", self.article()))
        }
    }

    fn article(self) -> &'static str {
        match self {
            Self::String => "a string",
            Self::Integer | Self::Timestamp => "an integer",
            Self::Number => "a number",
            Self::Boolean => "a boolean",
            Self::Object => "an object",
            Self::Array => "an array",
            Self::Url | Self::Any => "a valid value",
        }
    }
}

fn coerce_url(value: &Value) -> Result<Value, String> {
    let Some(raw) = value.as_str() else {
        return Err(format!("{value} is not a string"));
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("Shorter than minimum length 1".to_string());
    }
    if trimmed.chars().count() > URL_MAX_LENGTH {
        return Err(format!("Longer than maximum length {URL_MAX_LENGTH}"));
    }
    url::Url::parse(trimmed).map_err(|_| "Must be a URL".to_string())?;
    Ok(Value::String(trimmed.to_string()))
}

pub type FieldCheck = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

#[derive(Debug, Error)]
#[error("Invalid JSON schema for field {field}: {reason}")]
pub struct SchemaError {
    pub field: String,
    pub reason: String,
}

#[derive(Clone)]
pub struct FieldSpec {
    name: String,
    kind: FieldKind,
    required: bool,
    default: Option<Value>,
    read_only: bool,
    check: Option<FieldCheck>,
    json_schema: Option<Arc<jsonschema::Validator>>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            default: None,
            read_only: false,
            check: None,
            json_schema: None,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::String)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Integer)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Boolean)
    }

    pub fn url(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Url)
    }

    pub fn timestamp(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Timestamp)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Extra check run on values that passed the type check.
    pub fn check<F>(mut self, check: F) -> Self
    where
        F: Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    {
        self.check = Some(Arc::new(check));
        self
    }

    /// Constrain values with a JSON Schema document.
    pub fn json_schema(mut self, schema: &Value) -> Result<Self, SchemaError> {
        let validator = jsonschema::validator_for(schema).map_err(|e| SchemaError {
            field: self.name.clone(),
            reason: e.to_string(),
        })?;
        self.json_schema = Some(Arc::new(validator));
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn missing_value(&self) -> Option<Value> {
        match (&self.default, self.kind) {
            (Some(default), _) => Some(default.clone()),
            (None, FieldKind::Timestamp) => Some(Value::from(now_millis())),
            (None, _) => None,
        }
    }

    fn validate_value(&self, value: &Value) -> Result<Value, String> {
        let value = self.kind.coerce(value)?;
        if let Some(check) = &self.check {
            check(&value)?;
        }
        if let Some(validator) = &self.json_schema {
            if let Some(error) = validator.validate(&value).err().and_then(|mut errors| errors.next()) {
                return Err(error.to_string());
            }
        }
        Ok(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownFields {
    #[default]
    Reject,
    Preserve,
}

#[derive(Clone, Default)]
pub struct Schema {
    fields: Vec<FieldSpec>,
    unknown: UnknownFields,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, spec: FieldSpec) -> Self {
        self.fields.push(spec);
        self
    }

    pub fn unknown_fields(mut self, policy: UnknownFields) -> Self {
        self.unknown = policy;
        self
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }
}

impl RecordValidator for Schema {
    fn validate(&self, raw: &Value) -> Result<Record, Vec<ValidationIssue>> {
        let Value::Object(input) = raw else {
            return Err(vec![ValidationIssue {
                location: cairn_types::Location::Body,
                name: None,
                description: format!("{raw} is not an object"),
            }]);
        };

        let mut record = Record::new();
        let mut issues = Vec::new();

        match input.get(ID_FIELD) {
            Some(Value::String(id)) => {
                record.insert(ID_FIELD, id.clone());
            }
            Some(other) => issues.push(ValidationIssue::body(
                ID_FIELD,
                format!("{other} is not a string"),
            )),
            None => {}
        }

        for spec in &self.fields {
            match input.get(&spec.name) {
                Some(value) if !value.is_null() || spec.kind == FieldKind::Any => {
                    match spec.validate_value(value) {
                        Ok(value) => {
                            record.insert(spec.name.clone(), value);
                        }
                        Err(description) => {
                            issues.push(ValidationIssue::body(spec.name.clone(), description));
                        }
                    }
                }
                _ => match spec.missing_value() {
                    Some(value) => {
                        record.insert(spec.name.clone(), value);
                    }
                    None if spec.required => issues.push(ValidationIssue::body(
                        spec.name.clone(),
                        format!("{} is missing", spec.name),
                    )),
                    None => {}
                },
            }
        }

        for (name, value) in input {
            let declared = self.fields.iter().any(|spec| &spec.name == name);
            if declared || name == ID_FIELD || name == MODIFIED_FIELD {
                continue;
            }
            match self.unknown {
                UnknownFields::Reject => {
                    issues.push(ValidationIssue::body(name.clone(), format!("{name} is not allowed")));
                }
                UnknownFields::Preserve => {
                    record.insert(name.clone(), value.clone());
                }
            }
        }

        if issues.is_empty() {
            Ok(record)
        } else {
            Err(issues)
        }
    }

    fn known_fields(&self) -> Vec<String> {
        let mut fields = vec![ID_FIELD.to_string(), MODIFIED_FIELD.to_string()];
        fields.extend(self.fields.iter().map(|spec| spec.name.clone()));
        fields
    }

    fn read_only_fields(&self) -> Vec<String> {
        let mut fields = vec![ID_FIELD.to_string()];
        fields.extend(
            self.fields
                .iter()
                .filter(|spec| spec.read_only)
                .map(|spec| spec.name.clone()),
        );
        fields
    }
}
