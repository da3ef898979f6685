use axum::{
    extract::{multipart::MultipartError, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use sqlx::error::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    // 404
    #[error("{0}")]
    NotFound(String),

    // 400
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Validation(String),

    // 401 / 403
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),

    // 409
    #[error("{0}")]
    Conflict(String),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    // JWT errors
    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    // Internal errors
    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn not_authorized() -> Self {
        AppError::Unauthorized("not authorized to access this route".to_string())
    }

    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),

            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),

            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            AppError::Jwt(_) => (
                StatusCode::UNAUTHORIZED,
                "not authorized to access this route".to_string(),
            ),

            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),

            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),

            AppError::Database(sqlx::Error::RowNotFound) => {
                (StatusCode::NOT_FOUND, "Resource not found".to_string())
            }
            AppError::Database(sqlx::Error::Database(db))
                if matches!(db.kind(), ErrorKind::UniqueViolation) =>
            {
                (
                    StatusCode::BAD_REQUEST,
                    "Duplicate field value entered".to_string(),
                )
            }
            AppError::Database(sqlx::Error::Database(db))
                if matches!(
                    db.kind(),
                    ErrorKind::CheckViolation
                        | ErrorKind::ForeignKeyViolation
                        | ErrorKind::NotNullViolation
                ) =>
            {
                (
                    StatusCode::BAD_REQUEST,
                    format!(
                        "Invalid value for {}",
                        db.constraint().unwrap_or("one of the fields")
                    ),
                )
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database error".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();

        let body = Json(json!({
            "success": false,
            "error": message,
            "statusCode": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<MultipartError> for AppError {
    fn from(e: MultipartError) -> Self {
        AppError::BadRequest(format!("Failed to read multipart body: {}", e))
    }
}

pub type AppResult<T> = Result<T, AppError>;
