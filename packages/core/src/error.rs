use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::store::StoreError;

/// Unified application error.
///
/// This ensures all service layers (config, network, parsing, storage)
/// fail in a predictable and debuggable way.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

/// The only error `ModuleRunner::execute` surfaces to its caller.
///
/// Everything else (storage, cache, notification) is contained inside the
/// runner; a module's own failure comes back as an error-status result.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RunnerError {
    #[error("Module not found: {module_id}")]
    ModuleNotFound { module_id: String },
}

impl From<RunnerError> for AppError {
    fn from(err: RunnerError) -> Self {
        AppError::NotFound(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Network(_) => StatusCode::BAD_GATEWAY,
            AppError::Config(_)
            | AppError::Parse(_)
            | AppError::Database(_)
            | AppError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }

        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
