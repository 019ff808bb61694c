//! HTTP gateway server.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use axum::{
    Router,
    routing::{delete, get, post},
};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

use confab_agent::Orchestrator;
use confab_config::ServerConfig;

use crate::routes;

/// Application state shared across routes.
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator,
            started_at: Instant::now(),
        }
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/chat/stream", post(routes::chat_stream))
        .route("/chat", post(routes::chat))
        .route("/chat/tool-confirm", post(routes::tool_confirm))
        .route("/session/:id", get(routes::session_stats))
        .route("/session/:id/pending", get(routes::pending))
        .route("/session/:id/events", get(routes::session_events))
        .route("/session/:id/clear", delete(routes::clear_session))
        .route("/tools", get(routes::tools))
        .route("/health", get(routes::health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until ctrl-c.
#[instrument(skip_all, fields(addr = %config.socket_addr()))]
pub async fn start_server(config: &ServerConfig, orchestrator: Orchestrator) -> Result<()> {
    let app = build_router(Arc::new(AppState::new(orchestrator)));

    let listener = TcpListener::bind(config.socket_addr()).await?;
    info!("Gateway HTTP server listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Gateway HTTP server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
