mod backend;
mod config;
mod error;
mod keyvalue;
mod memory;
mod query;
mod traits;

#[cfg(test)]
mod tests;

pub use backend::ObjectStoreBackend;
pub use config::{BackendFactory, BackendRegistry, StorageConfig};
pub use error::{StorageError, StorageResult};
pub use keyvalue::{KEYVALUE_COLLECTION, KeyValueStore};
pub use memory::MemoryBackend;
pub use query::{
    Comparison, Direction, Filter, ListQuery, Sort, compare_values, now_millis, values_equal,
};
pub use traits::{Collection, StorageBackend};
