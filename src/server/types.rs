//! JSON bodies exchanged over HTTP

use serde::{Deserialize, Serialize};

/// `POST /remove-background` request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoveBackgroundRequest {
    /// Base64 image, optionally prefixed with a `data:` URI header.
    /// Missing or `null` is treated the same as an empty string.
    #[serde(default)]
    pub image: Option<String>,
}

/// `POST /remove-background` success response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveBackgroundResponse {
    /// Base64 encoded RGBA PNG
    pub image: String,
}

/// `GET /health` response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

impl HealthResponse {
    #[must_use]
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
        }
    }
}

/// Body of every non-2xx response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
}
