//! HTTP surface
//!
//! - `POST /remove-background` runs the [`RemovalPipeline`]
//! - `GET /health` is a liveness check
//!
//! Responses above `gzip_min_size` bytes are gzip compressed when the client
//! accepts it.

pub mod error;
pub mod handlers;
pub mod types;

use crate::{
    config::{InitMode, ServerConfig},
    error::Result,
    pipeline::RemovalPipeline,
};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::{
    compression::{predicate::SizeAbove, CompressionLayer},
    trace::TraceLayer,
};
use tracing::info;

pub use error::ApiError;

/// State shared by all handlers
#[derive(Clone)]
pub struct AppState {
    pub pipeline: RemovalPipeline,
}

impl AppState {
    #[must_use]
    pub fn new(pipeline: RemovalPipeline) -> Self {
        Self { pipeline }
    }
}

/// Build the application router with compression, tracing and body limits
pub fn router(state: AppState, config: &ServerConfig) -> Router {
    Router::new()
        .route("/remove-background", post(handlers::remove_background))
        .route("/health", get(handlers::health_check))
        .with_state(state)
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(CompressionLayer::new().compress_when(SizeAbove::new(config.gzip_min_size)))
        .layer(TraceLayer::new_for_http())
}

/// Load the model (unless lazy), bind and serve until Ctrl-C or SIGTERM
pub async fn serve(config: ServerConfig, pipeline: RemovalPipeline) -> Result<()> {
    config.validate()?;

    if config.init_mode == InitMode::Eager {
        info!("Loading model before accepting connections");
        pipeline.initialize().await?;
    }

    let app = router(AppState::new(pipeline), &config);
    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        std::io::Error::new(e.kind(), format!("Failed to bind {}: {}", addr, e))
    })?;

    info!("Starting server on port {}", config.port);
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl-C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}
