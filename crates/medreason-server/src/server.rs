//! Router assembly and the listening loop.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use medreason_core::ServerConfig;
use medreason_llm::{GenerationService, LlmError};
use tokio::sync::oneshot;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::handlers;
use crate::state::AppState;

/// Build the router with the body limit from `config`.
pub fn build_router(state: AppState, config: &ServerConfig) -> Router {
    Router::new()
        .route("/", post(handlers::generate))
        .route("/generate", post(handlers::generate))
        .route("/health", get(handlers::health))
        .layer(DefaultBodyLimit::max(config.max_payload_size))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until Ctrl-C.
pub async fn serve(config: &ServerConfig, state: AppState) -> std::io::Result<()> {
    let app = build_router(state, config);
    let listener = tokio::net::TcpListener::bind(config.socket_address()).await?;

    info!(address = %listener.local_addr()?, "medreason server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

/// Load the model in the background. Failures that a retry cannot fix are
/// sent on the returned channel; others are logged and left to the first
/// request.
pub fn spawn_preload(service: Arc<GenerationService>) -> oneshot::Receiver<LlmError> {
    let (fatal_tx, fatal_rx) = oneshot::channel();
    tokio::spawn(async move {
        info!("Preloading model in background");
        match service.preload().await {
            Ok(()) => {}
            Err(e) if e.is_unrecoverable() => {
                error!(error = %e, "Model preload failed permanently");
                let _ = fatal_tx.send(e);
            }
            Err(e) => error!(error = %e, "Model preload failed, will retry on first request"),
        }
    });
    fatal_rx
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            warn!(error = %e, "Cannot listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}
