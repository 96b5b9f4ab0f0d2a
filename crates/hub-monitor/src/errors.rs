//! Monitoring endpoint error types.
//!
//! Errors map to HTTP status codes via `IntoResponse`. Clients receive a
//! short generic message in `{"error": ...}`; the underlying cause is logged.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::observability::registry::RegistryError;

/// Monitoring endpoint error type.
///
/// - Metrics, Internal: 500 Internal Server Error
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Metrics export failed: {0}")]
    Metrics(#[from] RegistryError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MonitorError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            MonitorError::Metrics(_) | MonitorError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for MonitorError {
    fn into_response(self) -> Response {
        let message = match &self {
            MonitorError::Metrics(err) => {
                tracing::error!(target: "hub.metrics", error = %err, "Metrics export failed");
                "Failed to export metrics"
            }
            MonitorError::Internal(reason) => {
                tracing::error!(target: "hub.http", reason = %reason, "Internal error");
                "An internal error occurred"
            }
        };

        (
            self.status_code(),
            Json(ErrorResponse {
                error: message.to_string(),
            }),
        )
            .into_response()
    }
}
