use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("Please enter a valid Groq API key")]
    InvalidApiKey,

    #[error("Database file not found: {0}")]
    DatabaseFileMissing(String),

    #[error("Database connection failed: {0}")]
    Connection(String),

    #[error("Connect to a database first")]
    NotConnected,

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidApiKey => StatusCode::UNAUTHORIZED,
            AppError::DatabaseFileMissing(_) | AppError::Connection(_) => StatusCode::BAD_GATEWAY,
            AppError::NotConnected => StatusCode::CONFLICT,
            AppError::UnknownTable(_) => StatusCode::NOT_FOUND,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::warn!(error = %self, "request rejected");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
