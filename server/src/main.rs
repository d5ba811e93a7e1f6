use anyhow::Result;
use cairn_server::{catalog, http, settings::Settings, storage::BackendRegistry};
use std::sync::Arc;
use tracing::{Level, info};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()),
        )
        .init();

    info!("Starting Cairn server");

    let settings = Settings::from_args()?;
    info!(
        "Using {} storage with {} ids",
        settings.storage.backend_key(),
        settings.id_generator
    );

    if let cairn_server::storage::StorageConfig::Local { path } = &settings.storage {
        std::fs::create_dir_all(path)?;
    }

    let storage = BackendRegistry::with_defaults().build(&settings.storage)?;
    storage.ping().await?;

    let bind_address = settings.bind_address;
    let state = http::AppState::new(settings, storage, catalog::defaults());

    http::start_server(Arc::new(state), bind_address).await?;

    Ok(())
}
