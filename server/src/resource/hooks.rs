use cairn_types::Record;
use serde_json::Value;

use super::error::ResourceResult;

/// Customisation points of a resource, invoked by the generic controller.
///
/// All methods default to pass-through.
pub trait ResourceHooks: Send + Sync {
    /// Transform the raw input before it is validated.
    fn preprocess(&self, raw: Value) -> ResourceResult<Value> {
        Ok(raw)
    }

    /// Adjust a validated record before it is stored. `old` is the previous
    /// version on update, `None` on creation.
    fn process_record(&self, new: Record, _old: Option<&Record>) -> ResourceResult<Record> {
        Ok(new)
    }

    /// Veto the deletion of a record.
    fn pre_delete(&self, _record: &Record) -> ResourceResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHooks;

impl ResourceHooks for DefaultHooks {}
