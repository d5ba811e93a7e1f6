//! Record identifier generation.
//!
//! Generators only propose identifiers: the storage backend remains the
//! authority on unicity and rejects an id already in use.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> String;

    /// Whether `id` could have been produced by this generator.
    /// Used to reject malformed ids before reaching the backend.
    fn is_valid(&self, id: &str) -> bool {
        !id.is_empty()
    }
}

/// Closures returning a fresh id are generators. Every string is accepted as valid.
impl<F> IdGenerator for F
where
    F: Fn() -> String + Send + Sync,
{
    fn generate(&self) -> String {
        self()
    }
}

/// Only the lowercase hyphenated form is accepted, so one UUID cannot be
/// stored under several spellings.
fn is_canonical_uuid(id: &str) -> bool {
    Uuid::try_parse(id).is_ok_and(|uuid| uuid.hyphenated().to_string() == id)
}

/// Random UUID v4, the default.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn generate(&self) -> String {
        Uuid::new_v4().to_string()
    }

    fn is_valid(&self, id: &str) -> bool {
        is_canonical_uuid(id)
    }
}

/// UUID v7: ids sort by creation time.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeOrderedGenerator;

impl IdGenerator for TimeOrderedGenerator {
    fn generate(&self) -> String {
        Uuid::now_v7().to_string()
    }

    fn is_valid(&self, id: &str) -> bool {
        is_canonical_uuid(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdGeneratorKind {
    #[default]
    Uuid4,
    Uuid7,
}

impl IdGeneratorKind {
    pub fn build(self) -> Arc<dyn IdGenerator> {
        match self {
            Self::Uuid4 => Arc::new(UuidGenerator),
            Self::Uuid7 => Arc::new(TimeOrderedGenerator),
        }
    }
}

impl FromStr for IdGeneratorKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "uuid4" | "uuid" => Ok(Self::Uuid4),
            "uuid7" | "time-ordered" => Ok(Self::Uuid7),
            other => anyhow::bail!("Unknown id generator: {other}. Must be 'uuid4' or 'uuid7'"),
        }
    }
}

impl fmt::Display for IdGeneratorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uuid4 => f.write_str("uuid4"),
            Self::Uuid7 => f.write_str("uuid7"),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_uuid_generator_produces_distinct_valid_ids() {
        let generator = UuidGenerator;
        let ids: HashSet<String> = (0..100).map(|_| generator.generate()).collect();
        assert_eq!(ids.len(), 100);
        assert!(ids.iter().all(|id| generator.is_valid(id)));
        assert!(!generator.is_valid("not-a-uuid"));
    }

    #[test]
    fn test_only_canonical_uuids_are_valid() {
        let id = "6b3c0a3e-3f7e-4c1a-9d2b-5e8f7a6b4c3d";
        for generator in [&UuidGenerator as &dyn IdGenerator, &TimeOrderedGenerator] {
            assert!(generator.is_valid(id));
            assert!(!generator.is_valid("6b3c0a3e3f7e4c1a9d2b5e8f7a6b4c3d"));
            assert!(!generator.is_valid("{6b3c0a3e-3f7e-4c1a-9d2b-5e8f7a6b4c3d}"));
            assert!(!generator.is_valid("urn:uuid:6b3c0a3e-3f7e-4c1a-9d2b-5e8f7a6b4c3d"));
            assert!(!generator.is_valid("6B3C0A3E-3F7E-4C1A-9D2B-5E8F7A6B4C3D"));
        }
    }

    #[test]
    fn test_time_ordered_ids_sort_by_creation() {
        let generator = TimeOrderedGenerator;
        let first = generator.generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = generator.generate();
        assert!(first < second);
    }

    #[test]
    fn test_closures_are_generators() {
        let generator = || "fixed".to_string();
        assert_eq!(generator.generate(), "fixed");
        assert!(generator.is_valid("anything"));
        assert!(!generator.is_valid(""));
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("uuid4".parse::<IdGeneratorKind>().unwrap(), IdGeneratorKind::Uuid4);
        assert_eq!("UUID7".parse::<IdGeneratorKind>().unwrap(), IdGeneratorKind::Uuid7);
        assert!("snowflake".parse::<IdGeneratorKind>().is_err());
        assert_eq!(IdGeneratorKind::Uuid7.to_string(), "uuid7");
    }
}
