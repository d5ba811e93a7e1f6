use clap::{ArgAction, Parser};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::id::IdGeneratorKind;
use crate::resource::{DEFAULT_BACKEND_TIMEOUT, DEFAULT_RETRY_AFTER};
use crate::storage::StorageConfig;

/// Cairn - REST resources over pluggable storage.
#[derive(Debug, Parser)]
#[command(name = "cairn-server")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Address the HTTP server binds to.
    #[arg(long, env = "BIND_ADDRESS", default_value = "0.0.0.0:3000")]
    pub bind_address: SocketAddr,

    /// Storage backend: memory, local or s3.
    #[arg(long, env = "STORAGE_BACKEND")]
    pub storage_backend: Option<String>,

    /// Root directory of the local backend.
    #[arg(long, env = "STORAGE_PATH")]
    pub storage_path: Option<PathBuf>,

    /// Record id generator: uuid4 or uuid7.
    #[arg(long, env = "ID_GENERATOR", default_value_t = IdGeneratorKind::Uuid4)]
    pub id_generator: IdGeneratorKind,

    /// Default page size of collection listings.
    #[arg(long, env = "PAGINATE_BY")]
    pub paginate_by: Option<usize>,

    #[arg(long, env = "DELETE_COLLECTION_ENABLED", default_value_t = true, action = ArgAction::Set)]
    pub delete_collection_enabled: bool,

    /// Timeout of each storage call, in milliseconds.
    #[arg(long, env = "BACKEND_TIMEOUT_MS", default_value_t = 5000)]
    pub backend_timeout_ms: u64,

    /// Retry-After hint sent with backend failures, in seconds.
    #[arg(long, env = "RETRY_AFTER_SECONDS", default_value_t = DEFAULT_RETRY_AFTER)]
    pub retry_after_seconds: u64,

    #[arg(long, env = "PROJECT_NAME", default_value = "cairn")]
    pub project_name: String,

    #[arg(long, env = "PROJECT_DOCS", default_value = "https://cairn.readthedocs.io/")]
    pub project_docs: String,
}

/// Runtime settings of the service.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub bind_address: SocketAddr,
    pub storage: StorageConfig,
    pub id_generator: IdGeneratorKind,
    pub paginate_by: Option<usize>,
    pub delete_collection_enabled: bool,
    pub backend_timeout: Duration,
    pub retry_after: u64,
    pub project_name: String,
    pub project_docs: String,
    pub project_version: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 3000)),
            storage: StorageConfig::Memory,
            id_generator: IdGeneratorKind::default(),
            paginate_by: None,
            delete_collection_enabled: true,
            backend_timeout: DEFAULT_BACKEND_TIMEOUT,
            retry_after: DEFAULT_RETRY_AFTER,
            project_name: "cairn".to_string(),
            project_docs: "https://cairn.readthedocs.io/".to_string(),
            project_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl Settings {
    /// Settings from the command line, falling back to the environment.
    pub fn from_args() -> anyhow::Result<Self> {
        Cli::parse().into_settings(|name| std::env::var(name).ok())
    }
}

impl Cli {
    /// `lookup` resolves the storage variables the flags do not cover (S3 credentials).
    pub fn into_settings<F>(self, lookup: F) -> anyhow::Result<Settings>
    where
        F: Fn(&str) -> Option<String>,
    {
        let storage_backend = self.storage_backend;
        let storage_path = self
            .storage_path
            .map(|path| path.to_string_lossy().into_owned());
        let storage = StorageConfig::from_lookup(|name| match name {
            "STORAGE_BACKEND" => storage_backend.clone(),
            "STORAGE_PATH" => storage_path.clone(),
            other => lookup(other),
        })?;

        if self.paginate_by == Some(0) {
            anyhow::bail!("PAGINATE_BY must be greater than zero");
        }

        Ok(Settings {
            bind_address: self.bind_address,
            storage,
            id_generator: self.id_generator,
            paginate_by: self.paginate_by,
            delete_collection_enabled: self.delete_collection_enabled,
            backend_timeout: Duration::from_millis(self.backend_timeout_ms),
            retry_after: self.retry_after_seconds,
            project_name: self.project_name,
            project_docs: self.project_docs,
            project_version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["cairn-server"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_flags_build_settings() {
        let settings = parse(&[
            "--bind-address",
            "127.0.0.1:8888",
            "--storage-backend",
            "local",
            "--storage-path",
            "/tmp/cairn",
            "--id-generator",
            "uuid7",
            "--paginate-by",
            "25",
            "--delete-collection-enabled",
            "false",
            "--backend-timeout-ms",
            "250",
        ])
        .into_settings(|_| None)
        .unwrap();

        assert_eq!(settings.bind_address, "127.0.0.1:8888".parse().unwrap());
        assert_eq!(settings.storage, StorageConfig::local("/tmp/cairn"));
        assert_eq!(settings.id_generator, IdGeneratorKind::Uuid7);
        assert_eq!(settings.paginate_by, Some(25));
        assert!(!settings.delete_collection_enabled);
        assert_eq!(settings.backend_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_s3_credentials_come_from_lookup() {
        let settings = parse(&["--storage-backend", "s3"])
            .into_settings(|name| match name {
                "AWS_BUCKET" => Some("records".to_string()),
                "AWS_REGION" => Some("eu-west-3".to_string()),
                _ => None,
            })
            .unwrap();
        match settings.storage {
            StorageConfig::S3 { bucket, region, .. } => {
                assert_eq!(bucket, "records");
                assert_eq!(region.as_deref(), Some("eu-west-3"));
            }
            other => panic!("expected S3 storage, got {other:?}"),
        }

        assert!(parse(&["--storage-backend", "s3"]).into_settings(|_| None).is_err());
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(Cli::try_parse_from(["cairn-server", "--id-generator", "snowflake"]).is_err());
        assert!(
            parse(&["--storage-backend", "memory", "--paginate-by", "0"])
                .into_settings(|_| None)
                .is_err()
        );
    }
}
