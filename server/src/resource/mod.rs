mod controller;
mod definition;
mod error;
mod hooks;
mod query;


pub use controller::{
    CreateOutcome, DEFAULT_BACKEND_TIMEOUT, MAX_ID_ATTEMPTS, Page, ResourceController,
};
pub use definition::ResourceDefinition;
pub use error::{DEFAULT_RETRY_AFTER, ResourceError, ResourceResult};
pub use hooks::{DefaultHooks, ResourceHooks};
pub use query::{
    ListRequest, build_pagination_rules, decode_token, encode_token, extract_filters,
    extract_sorting, native_value,
};
