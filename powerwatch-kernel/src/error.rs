//! Erreurs des handlers HTTP.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("unknown server: {0}")]
    NotFound(String),
    #[error("cache backend unavailable")]
    CacheUnavailable,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(name) => {
                (StatusCode::NOT_FOUND, format!("Server not found: {}", name))
            }
            AppError::CacheUnavailable => {
                (StatusCode::SERVICE_UNAVAILABLE, "Cache unavailable".to_string())
            }
            AppError::Internal(e) => {
                error!(error = ?e, "internal error while handling request");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
