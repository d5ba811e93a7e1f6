use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use super::backend::ObjectStoreBackend;
use super::memory::MemoryBackend;
use super::traits::StorageBackend;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StorageConfig {
    Memory,
    Local {
        path: PathBuf,
    },
    S3 {
        bucket: String,
        region: Option<String>,
        endpoint: Option<String>,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
        allow_http: bool,
    },
}

impl StorageConfig {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self::Local { path: path.into() }
    }

    pub fn s3(
        bucket: impl Into<String>,
        region: Option<String>,
        endpoint: Option<String>,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
        allow_http: bool,
    ) -> Self {
        Self::S3 {
            bucket: bucket.into(),
            region,
            endpoint,
            access_key_id,
            secret_access_key,
            allow_http,
        }
    }

    /// Registry key of the backend this configuration selects.
    pub fn backend_key(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Local { .. } => "local",
            Self::S3 { .. } => "s3",
        }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolve the configuration from a variable lookup (`STORAGE_BACKEND`,
    /// `STORAGE_PATH` and the `AWS_*` variables).
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let backend = lookup("STORAGE_BACKEND").unwrap_or_else(|| "local".to_string());

        match backend.as_str() {
            "memory" => Ok(Self::Memory),
            "local" => {
                let path = lookup("STORAGE_PATH").unwrap_or_else(|| "./data".to_string());
                Ok(Self::local(path))
            }
            "s3" => {
                let bucket = lookup("AWS_BUCKET")
                    .ok_or_else(|| anyhow::anyhow!("AWS_BUCKET is required for S3 backend"))?;
                let allow_http = lookup("AWS_ALLOW_HTTP")
                    .unwrap_or_else(|| "false".to_string())
                    .parse::<bool>()
                    .unwrap_or(false);

                Ok(Self::s3(
                    bucket,
                    lookup("AWS_REGION"),
                    lookup("AWS_ENDPOINT"),
                    lookup("AWS_ACCESS_KEY_ID"),
                    lookup("AWS_SECRET_ACCESS_KEY"),
                    allow_http,
                ))
            }
            _ => anyhow::bail!(
                "Unknown storage backend: {}. Must be 'memory', 'local' or 's3'",
                backend
            ),
        }
    }
}

pub type BackendFactory = fn(&StorageConfig) -> anyhow::Result<Arc<dyn StorageBackend>>;

/// Maps a configuration key to the constructor of its backend.
/// Resolved once at startup.
#[derive(Default)]
pub struct BackendRegistry {
    factories: HashMap<&'static str, BackendFactory>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("memory", |_| Ok(Arc::new(MemoryBackend::new())));
        registry.register("local", object_store_factory);
        registry.register("s3", object_store_factory);
        registry
    }

    pub fn register(&mut self, key: &'static str, factory: BackendFactory) -> &mut Self {
        self.factories.insert(key, factory);
        self
    }

    pub fn build(&self, config: &StorageConfig) -> anyhow::Result<Arc<dyn StorageBackend>> {
        let key = config.backend_key();
        let factory = self
            .factories
            .get(key)
            .ok_or_else(|| anyhow::anyhow!("No storage backend registered for '{}'", key))?;
        factory(config)
    }
}

fn object_store_factory(config: &StorageConfig) -> anyhow::Result<Arc<dyn StorageBackend>> {
    Ok(Arc::new(ObjectStoreBackend::from_config(config)?))
}
