//! Router assembly and server lifecycle.

use crate::routes;
use crate::state::AppState;
use anyhow::{Context, Result};
use axum::Router;
use axum::routing::{delete, get, post, put};
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Assemble the full route table over shared state.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/models/status", get(routes::models_status))
        .route("/queries", post(routes::queries::execute_query))
        .route(
            "/selection/contexts/{id}/status",
            get(routes::selection::context_status),
        )
        .route(
            "/selection/contexts/{id}/content",
            post(routes::selection::add_content),
        )
        .route(
            "/selection/contexts/{id}/content/{cid}",
            delete(routes::selection::remove_content),
        )
        .route(
            "/selection/contexts/{id}/content/{cid}/relevance",
            put(routes::selection::set_relevance),
        )
        .route(
            "/selection/projects/{pid}/suggestions",
            post(routes::selection::suggest),
        )
        .route(
            "/selection/content/{id}/similar",
            get(routes::selection::find_similar),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until ctrl-c.
pub async fn serve(state: AppState, host: &str, port: u16) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .context("Failed to parse socket address")?;

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("ContextNexus API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;
    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install ctrl-c handler");
    }
}
