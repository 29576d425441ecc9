//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use event_store::EventStoreError;
use thiserror::Error;

/// API-level error type that maps to HTTP responses.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found.
    #[error("{0}")]
    NotFound(String),

    /// Bad request from the client.
    #[error("{0}")]
    BadRequest(String),

    /// Event store failure.
    #[error(transparent)]
    Store(#[from] EventStoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Store(err) => store_error_status(err),
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "internal server error");
        }

        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

fn store_error_status(err: &EventStoreError) -> StatusCode {
    match err {
        EventStoreError::EventNotFound(_) => StatusCode::NOT_FOUND,
        EventStoreError::DuplicateVersion { .. } | EventStoreError::InvalidTransition { .. } => {
            StatusCode::CONFLICT
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
