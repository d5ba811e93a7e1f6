//! Cairn: REST resources over pluggable storage backends, with unique
//! fields, optimistic concurrency on `last_modified` and a stable JSON
//! error protocol.

pub mod catalog;
pub mod errors;
pub mod http;
pub mod id;
pub mod resource;
pub mod schema;
pub mod settings;
pub mod storage;
