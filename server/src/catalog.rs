//! Resources served by the stock binary.

use cairn_types::Record;
use serde_json::Value;

use crate::resource::{ResourceDefinition, ResourceHooks, ResourceResult};
use crate::schema::{FieldSpec, Schema};

pub fn mushroom() -> ResourceDefinition {
    let schema = Schema::new()
        .field(FieldSpec::string("name").required())
        .field(FieldSpec::integer("size"))
        .field(FieldSpec::timestamp("picked_at").read_only());
    ResourceDefinition::new("mushroom", schema)
}

/// Titles default to the bookmarked URL.
struct BookmarkHooks;

impl ResourceHooks for BookmarkHooks {
    fn process_record(&self, mut new: Record, _old: Option<&Record>) -> ResourceResult<Record> {
        let untitled = new
            .get("title")
            .and_then(Value::as_str)
            .is_none_or(|title| title.trim().is_empty());
        if untitled {
            if let Some(url) = new.get("url").cloned() {
                new.insert("title", url);
            }
        }
        Ok(new)
    }
}

pub fn bookmark() -> ResourceDefinition {
    let schema = Schema::new()
        .field(FieldSpec::url("url").required())
        .field(FieldSpec::string("title"))
        .field(FieldSpec::boolean("archived").default_value(false));
    ResourceDefinition::new("bookmark", schema)
        .unique_fields(["url"])
        .hooks(BookmarkHooks)
}

pub fn defaults() -> Vec<ResourceDefinition> {
    vec![mushroom(), bookmark()]
}
