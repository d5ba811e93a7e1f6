use anyhow::Result;
use axum::{
    Router,
    routing::get,
};
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use super::{handlers, state::AppState};

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handlers::hello))
        // Health checks
        .route("/__heartbeat__", get(handlers::heartbeat))
        .route("/health", get(handlers::heartbeat))
        // Resource endpoints
        .route(
            "/:collection",
            get(handlers::collection_get)
                .post(handlers::collection_post)
                .delete(handlers::collection_delete),
        )
        .route(
            "/:collection/:id",
            get(handlers::record_get)
                .put(handlers::record_put)
                .patch(handlers::record_patch)
                .delete(handlers::record_delete),
        )
        .fallback(handlers::unknown_resource)
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Serve the application on an already bound listener.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    let app = build_router(state);
    info!("Server listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

pub async fn start_server(state: Arc<AppState>, bind_address: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(bind_address).await?;
    serve(listener, state).await
}
