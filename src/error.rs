use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed, missing or out-of-range input.
    #[error("{0}")]
    Validation(String),
    #[error("Product not found")]
    NotFound,
    /// Raised at startup only, once every connection attempt has failed.
    #[error("database unreachable after {attempts} attempts: {source}")]
    StoreUnavailable { attempts: u32, source: sqlx::Error },
    #[error("image storage unavailable: {0}")]
    BlobUnavailable(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::StoreUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            AppError::BlobUnavailable(_) => StatusCode::BAD_GATEWAY,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl From<MultipartRejection> for AppError {
    fn from(rejection: MultipartRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = match &self {
            AppError::Database(_) | AppError::Internal(_) => {
                error!(error = %self, "request failed");
                "Internal server error".to_string()
            }
            AppError::BlobUnavailable(_) | AppError::StoreUnavailable { .. } => {
                error!(error = %self, "dependency unavailable");
                self.to_string()
            }
            _ => self.to_string(),
        };
        (status, Json(serde_json::json!({ "detail": detail }))).into_response()
    }
}
