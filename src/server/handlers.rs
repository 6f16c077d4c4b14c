//! Route handlers

use super::{
    error::ApiError,
    types::{HealthResponse, RemoveBackgroundRequest, RemoveBackgroundResponse},
    AppState,
};
use axum::{extract::rejection::JsonRejection, extract::State, Json};
use tracing::info;

/// `GET /health`: always healthy, independent of model state
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}

/// `POST /remove-background`
pub async fn remove_background(
    State(state): State<AppState>,
    payload: Result<Json<RemoveBackgroundRequest>, JsonRejection>,
) -> Result<Json<RemoveBackgroundResponse>, ApiError> {
    info!("Processing background removal request");

    let Json(request) = payload?;
    let image = state
        .pipeline
        .remove_background(request.image.unwrap_or_default())
        .await?;

    Ok(Json(RemoveBackgroundResponse { image }))
}
