//! Querystring handling for collection listings: filters, sorting and
//! pagination tokens.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use cairn_types::{MODIFIED_FIELD, Record, ValidationIssue};
use serde_json::{Map, Value};

use super::error::{ResourceError, ResourceResult};
use crate::storage::{Comparison, Direction, Filter, Sort};

/// Parsed listing parameters, ready to be handed to the controller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListRequest {
    pub filters: Vec<Filter>,
    pub sorting: Vec<Sort>,
    pub limit: Option<usize>,
    /// Sort-field values of the last record of the previous page.
    pub token: Option<Map<String, Value>>,
}

impl ListRequest {
    pub fn from_params(
        params: &[(String, String)],
        known_fields: &[String],
        paginate_by: Option<usize>,
    ) -> ResourceResult<Self> {
        let filters = extract_filters(params, known_fields)?;
        let sorting = extract_sorting(param(params, "_sort"), known_fields)?;

        let limit = match param(params, "_limit") {
            Some(raw) => Some(raw.trim().parse::<usize>().map_err(|_| {
                invalid_query(None, "_limit should be an integer")
            })?),
            None => paginate_by,
        };

        let token = param(params, "_token").map(decode_token).transpose()?;

        Ok(Self {
            filters,
            sorting,
            limit,
            token,
        })
    }

    /// Change polling: tombstones are listed whenever `last_modified` is filtered on.
    pub fn include_deleted(&self) -> bool {
        self.filters.iter().any(|f| f.field == MODIFIED_FIELD)
    }

    pub fn pagination_rules(&self) -> Vec<Vec<Filter>> {
        self.token
            .as_ref()
            .map(|last| build_pagination_rules(&self.sorting, last))
            .unwrap_or_default()
    }
}

fn param<'a>(params: &'a [(String, String)], name: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.as_str())
}

fn invalid_query(name: Option<&str>, description: impl Into<String>) -> ResourceError {
    ResourceError::invalid(ValidationIssue::querystring(
        name.map(str::to_string),
        description,
    ))
}

/// Interpret a querystring value as the JSON value it spells.
pub fn native_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    match trimmed {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "null" => return Value::Null,
        _ => {}
    }
    if let Ok(int) = trimmed.parse::<i64>() {
        return Value::from(int);
    }
    if let Ok(float) = trimmed.parse::<f64>() {
        if float.is_finite() {
            return Value::from(float);
        }
    }
    Value::String(raw.to_string())
}

const OPERATOR_PREFIXES: [(&str, Comparison); 6] = [
    ("min_", Comparison::Min),
    ("max_", Comparison::Max),
    ("not_", Comparison::Not),
    ("lt_", Comparison::Lt),
    ("gt_", Comparison::Gt),
    ("in_", Comparison::In),
];

pub fn extract_filters(
    params: &[(String, String)],
    known_fields: &[String],
) -> ResourceResult<Vec<Filter>> {
    let mut filters = Vec::new();

    for (param, raw) in params {
        let param = param.trim();

        if param == "_since" || param == "_to" {
            let value = native_value(raw);
            if !(value.is_i64() || value.is_u64()) {
                return Err(invalid_query(
                    Some(param),
                    format!("Invalid value for {param}"),
                ));
            }
            let operator = if param == "_since" {
                Comparison::Gt
            } else {
                Comparison::Lt
            };
            filters.push(Filter::new(MODIFIED_FIELD, value, operator));
            continue;
        }
        if param.starts_with('_') {
            continue;
        }

        let (field, operator) = OPERATOR_PREFIXES
            .iter()
            .find_map(|(prefix, operator)| {
                param
                    .strip_prefix(prefix)
                    .filter(|field| !field.is_empty())
                    .map(|field| (field, *operator))
            })
            .unwrap_or((param, Comparison::Eq));

        if !known_fields.iter().any(|known| known == field) {
            return Err(invalid_query(
                None,
                format!("Unknown filter field '{param}'"),
            ));
        }

        let value = if operator == Comparison::In {
            Value::Array(raw.split(',').map(native_value).collect())
        } else {
            native_value(raw)
        };
        filters.push(Filter::new(field, value, operator));
    }

    Ok(filters)
}

/// Parse `_sort`, always ending with a sort on `last_modified` so pages are stable.
pub fn extract_sorting(raw: Option<&str>, known_fields: &[String]) -> ResourceResult<Vec<Sort>> {
    let mut sorting = Vec::new();

    for spec in raw.unwrap_or_default().split(',') {
        let spec = spec.trim();
        if spec.is_empty() {
            continue;
        }
        let (field, direction) = match spec.strip_prefix('-') {
            Some(field) => (field, Direction::Desc),
            None => (spec.trim_start_matches('+'), Direction::Asc),
        };
        if !known_fields.iter().any(|known| known == field) {
            return Err(invalid_query(None, format!("Unknown sort field '{field}'")));
        }
        sorting.push(Sort {
            field: field.to_string(),
            direction,
        });
    }

    if !sorting.iter().any(|sort| sort.field == MODIFIED_FIELD) {
        sorting.push(Sort::desc(MODIFIED_FIELD));
    }
    Ok(sorting)
}

/// Filters selecting the records that come after `last` in `sorting` order.
///
/// For sort keys `(a, b, c)` this yields the disjunction
/// `c after last.c && a == last.a && b == last.b`, `b after last.b && a == last.a`,
/// `a after last.a`.
pub fn build_pagination_rules(sorting: &[Sort], last: &Map<String, Value>) -> Vec<Vec<Filter>> {
    let mut rules = Vec::new();
    for depth in (1..=sorting.len()).rev() {
        let (equal, rest) = sorting[..depth].split_at(depth - 1);
        let mut rule: Vec<Filter> = equal
            .iter()
            .map(|sort| {
                let value = last.get(&sort.field).cloned().unwrap_or(Value::Null);
                Filter::new(sort.field.clone(), value, Comparison::Eq)
            })
            .collect();
        let pivot = &rest[0];
        let operator = match pivot.direction {
            Direction::Asc => Comparison::Gt,
            Direction::Desc => Comparison::Lt,
        };
        let value = last.get(&pivot.field).cloned().unwrap_or(Value::Null);
        rule.push(Filter::new(pivot.field.clone(), value, operator));
        rules.push(rule);
    }
    rules
}

/// URL-safe base64 JSON object holding the sort-field values of `last`.
pub fn encode_token(sorting: &[Sort], last: &Record) -> String {
    let token: Map<String, Value> = sorting
        .iter()
        .map(|sort| {
            let value = last.get(&sort.field).cloned().unwrap_or(Value::Null);
            (sort.field.clone(), value)
        })
        .collect();
    URL_SAFE_NO_PAD.encode(Value::Object(token).to_string())
}

pub fn decode_token(raw: &str) -> ResourceResult<Map<String, Value>> {
    let invalid = || invalid_query(None, "_token should be valid base64 JSON encoded");
    let bytes = URL_SAFE_NO_PAD
        .decode(raw.trim().trim_end_matches('='))
        .map_err(|_| invalid())?;
    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => Ok(map),
        _ => Err(invalid()),
    }
}
