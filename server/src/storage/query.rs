//! Filtering, sorting and unicity rules shared by the storage backends.

use cairn_types::{ID_FIELD, MODIFIED_FIELD, Record};
use chrono::Utc;
use serde_json::Value;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Not,
    Lt,
    Gt,
    /// Greater than or equal
    Min,
    /// Lower than or equal
    Max,
    /// Equal to one of the values of an array
    In,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub value: Value,
    pub operator: Comparison,
}

impl Filter {
    pub fn new(field: impl Into<String>, value: impl Into<Value>, operator: Comparison) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
            operator,
        }
    }

    pub fn matches(&self, record: &Record) -> bool {
        let actual = record.get(&self.field).unwrap_or(&Value::Null);
        match self.operator {
            Comparison::Eq => values_equal(actual, &self.value),
            Comparison::Not => !values_equal(actual, &self.value),
            Comparison::Lt => compare_values(actual, &self.value) == Some(Ordering::Less),
            Comparison::Gt => compare_values(actual, &self.value) == Some(Ordering::Greater),
            Comparison::Min => matches!(
                compare_values(actual, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Comparison::Max => matches!(
                compare_values(actual, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Comparison::In => match &self.value {
                Value::Array(candidates) => candidates.iter().any(|v| values_equal(actual, v)),
                single => values_equal(actual, single),
            },
        }
    }

    /// Position check used by pagination rules. Compares in the order of
    /// [`sort_records`], so a missing or null value sorts before any other.
    pub fn matches_position(&self, record: &Record) -> bool {
        let actual = record.get(&self.field).unwrap_or(&Value::Null);
        let ordering = sort_order(actual, &self.value);
        match self.operator {
            Comparison::Eq => ordering == Ordering::Equal,
            Comparison::Lt => ordering == Ordering::Less,
            Comparison::Gt => ordering == Ordering::Greater,
            Comparison::Min => ordering != Ordering::Less,
            Comparison::Max => ordering != Ordering::Greater,
            Comparison::Not | Comparison::In => self.matches(record),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub field: String,
    pub direction: Direction,
}

impl Sort {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Desc,
        }
    }
}

/// Parameters of a `get_all` call.
///
/// `pagination_rules` is a disjunction of conjunctions: a record is part of
/// the page when it matches every filter of at least one rule.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListQuery {
    pub filters: Vec<Filter>,
    pub sorting: Vec<Sort>,
    pub pagination_rules: Vec<Vec<Filter>>,
    pub limit: Option<usize>,
    pub include_deleted: bool,
}

pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => compare_values(a, b) == Some(Ordering::Equal),
        _ => a == b,
    }
}

/// Order between two values of the same JSON type. `None` when the types differ.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(x), Some(y)) = (x.as_u64(), y.as_u64()) {
                Some(x.cmp(&y))
            } else if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
                Some(x.cmp(&y))
            } else {
                x.as_f64()?.partial_cmp(&y.as_f64()?)
            }
        }
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order used for sorting: values of different types are ordered by type.
fn sort_order(a: &Value, b: &Value) -> Ordering {
    compare_values(a, b).unwrap_or_else(|| type_rank(a).cmp(&type_rank(b)))
}

pub fn sort_records(records: &mut [Record], sorting: &[Sort]) {
    records.sort_by(|a, b| {
        for sort in sorting {
            let left = a.get(&sort.field).unwrap_or(&Value::Null);
            let right = b.get(&sort.field).unwrap_or(&Value::Null);
            let ordering = match sort.direction {
                Direction::Asc => sort_order(left, right),
                Direction::Desc => sort_order(right, left),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

fn matches_pagination(record: &Record, rules: &[Vec<Filter>]) -> bool {
    rules.is_empty()
        || rules
            .iter()
            .any(|rule| rule.iter().all(|filter| filter.matches_position(record)))
}

/// Apply a list query to a set of records.
pub fn select<'a, I>(records: I, query: &ListQuery) -> (Vec<Record>, usize)
where
    I: IntoIterator<Item = &'a Record>,
{
    let mut matching: Vec<Record> = records
        .into_iter()
        .filter(|record| query.include_deleted || !record.is_deleted())
        .filter(|record| query.filters.iter().all(|filter| filter.matches(record)))
        .cloned()
        .collect();
    let total = matching.len();

    sort_records(&mut matching, &query.sorting);

    let mut page: Vec<Record> = matching
        .into_iter()
        .filter(|record| matches_pagination(record, &query.pagination_rules))
        .collect();
    if let Some(limit) = query.limit {
        page.truncate(limit);
    }
    (page, total)
}

/// First live record, other than `exclude_id`, sharing a unique field value
/// with `candidate`. A missing or null value never conflicts.
pub fn find_conflict<'a, I>(
    records: I,
    candidate: &Record,
    unique_fields: &[String],
    exclude_id: Option<&str>,
) -> Option<(String, Record)>
where
    I: IntoIterator<Item = &'a Record>,
{
    for existing in records {
        if existing.is_deleted() || (exclude_id.is_some() && existing.id() == exclude_id) {
            continue;
        }
        for field in unique_fields {
            if field == ID_FIELD || field == MODIFIED_FIELD {
                continue;
            }
            match (candidate.get(field), existing.get(field)) {
                (Some(wanted), Some(taken)) if !wanted.is_null() && values_equal(wanted, taken) => {
                    return Some((field.clone(), existing.clone()));
                }
                _ => {}
            }
        }
    }
    None
}

pub fn now_millis() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}

/// Timestamp for the next write of a collection whose current timestamp is `current`.
pub fn next_timestamp(current: u64) -> u64 {
    now_millis().max(current.saturating_add(1))
}
