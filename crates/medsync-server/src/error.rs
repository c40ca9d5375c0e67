//! Server-specific error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::api::response::ErrorResponse;
use crate::ingest::{ImportError, StoreError};

/// Result type alias for handlers
pub type ApiResult<T> = std::result::Result<T, AppError>;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Import(#[from] ImportError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Import(e) => import_status(e),
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Store(_)
            | AppError::Database(_)
            | AppError::Internal(_)
            | AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Import(e) => e.code(),
            AppError::Store(_) => "STORE_ERROR",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Upstream(_) => "UPSTREAM_ERROR",
            AppError::Internal(_) | AppError::Io(_) => "INTERNAL_ERROR",
        }
    }
}

fn import_status(error: &ImportError) -> StatusCode {
    match error {
        ImportError::EmptyFile
        | ImportError::Format(_)
        | ImportError::HeaderNotFound { .. }
        | ImportError::MissingColumn(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ImportError::UnknownSource(_) => StatusCode::NOT_FOUND,
        ImportError::SourceDisabled(_) | ImportError::NoCloudUrl(_) => StatusCode::CONFLICT,
        ImportError::WrongMode { .. } => StatusCode::BAD_REQUEST,
        ImportError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        ImportError::Read(_) => StatusCode::BAD_GATEWAY,
        ImportError::IllegalTransition { .. } | ImportError::Store(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        },
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        // Backend details stay in the logs
        let message = if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            tracing::error!(code, error = %self, "Request failed");
            match &self {
                AppError::Import(ImportError::Read(_)) | AppError::Upstream(_) => self.to_string(),
                _ => "An internal error occurred".to_string(),
            }
        } else {
            tracing::debug!(code, error = %self, "Request rejected");
            self.to_string()
        };

        let body = match &self {
            AppError::Import(ImportError::HeaderNotFound { expected }) => {
                ErrorResponse::with_details(code, message, json!({ "expected": expected }))
            },
            _ => ErrorResponse::new(code, message),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_import_errors_are_unprocessable() {
        let err = AppError::from(ImportError::HeaderNotFound {
            expected: "fecha, idpcte".to_string(),
        });
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.code(), "HEADER_NOT_FOUND");
        assert_eq!(AppError::from(ImportError::EmptyFile).status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_source_errors_map_to_client_statuses() {
        assert_eq!(
            AppError::from(ImportError::UnknownSource("x".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::from(ImportError::SourceDisabled("x".into())).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::from(ImportError::WrongMode {
                source_id: "x".into(),
                mode: "file"
            })
            .status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_store_errors_are_internal() {
        let err = AppError::from(StoreError::Unavailable("down".into()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
