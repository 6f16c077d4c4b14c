//! Maps library errors onto `{"detail": ...}` responses

use super::types::ErrorResponse;
use crate::error::BgRemovalError;
use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

/// Error returned by HTTP handlers
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    pub fn new<S: Into<String>>(status: StatusCode, detail: S) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub fn detail(&self) -> &str {
        &self.detail
    }
}

impl From<BgRemovalError> for ApiError {
    fn from(error: BgRemovalError) -> Self {
        let status = StatusCode::from_u16(error.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self::new(status, error.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    /// Oversized bodies keep axum's 413; every other rejection is a 400
    fn from(rejection: JsonRejection) -> Self {
        let status = match rejection.status() {
            StatusCode::PAYLOAD_TOO_LARGE => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::BAD_REQUEST,
        };
        Self::new(status, rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!("Error processing request: {}", self.detail);
        } else {
            tracing::warn!(status = self.status.as_u16(), "Rejected request: {}", self.detail);
        }

        let body = ErrorResponse {
            detail: self.detail,
        };
        (self.status, Json(body)).into_response()
    }
}
