//! Core Error Types
//!
//! Unified error handling for the HTTP and service layers.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Crate-wide result type
pub type AppResult<T> = Result<T, AppError>;

/// Crate-wide error type
///
/// Every fallible path surfaces one of these variants. Each maps to an
/// explicit HTTP status and a stable machine-readable code.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Authentication required
    #[error("Not authenticated")]
    AuthRequired,

    /// Session exists but can no longer be refreshed
    #[error("Session expired")]
    SessionExpired,

    /// Access denied
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Request validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Identity provider failure (discovery, token endpoint, JWKS)
    #[error("Identity provider error: {0}")]
    Oidc(String),

    /// Access token failed verification
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Coder API failure
    #[error("Workspace backend error: {0}")]
    Coder(String),

    /// Database failure
    #[error("Database error: {0}")]
    Database(String),

    /// Session store failure
    #[error("Session store error: {0}")]
    Cache(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Create a not found error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an access denied error
    pub fn access_denied(msg: impl Into<String>) -> Self {
        Self::AccessDenied(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Get error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::AuthRequired => "AUTH_REQUIRED",
            Self::SessionExpired => "SESSION_EXPIRED",
            Self::AccessDenied(_) => "ACCESS_DENIED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Oidc(_) => "OIDC_ERROR",
            Self::InvalidToken(_) => "INVALID_TOKEN",
            Self::Coder(_) => "WORKSPACE_BACKEND_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Cache(_) => "SESSION_STORE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Get HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::AuthRequired | Self::SessionExpired | Self::InvalidToken(_) => {
                StatusCode::UNAUTHORIZED
            }
            Self::AccessDenied(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Oidc(_) | Self::Coder(_) => StatusCode::BAD_GATEWAY,
            Self::Database(_) | Self::Cache(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// API error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
    pub status: u16,
}

impl From<&AppError> for ErrorResponse {
    fn from(err: &AppError) -> Self {
        Self {
            error: err.to_string(),
            code: err.error_code(),
            status: err.status_code().as_u16(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(ErrorResponse::from(&self));

        // 401 responses carry a challenge so API clients can distinguish
        // "log in" from "forbidden".
        if status == StatusCode::UNAUTHORIZED {
            (status, [(header::WWW_AUTHENTICATE, "Bearer")], body).into_response()
        } else {
            (status, body).into_response()
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => Self::NotFound("row".to_string()),
            other => Self::Database(other.to_string()),
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(e: redis::RedisError) -> Self {
        Self::Cache(e.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        Self::Validation(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AppError::AuthRequired.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AppError::access_denied("nope").status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::not_found("pad").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::Coder("boom".to_string()).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(AppError::SessionExpired.error_code(), "SESSION_EXPIRED");
        assert_eq!(
            AppError::validation("bad").error_code(),
            "VALIDATION_ERROR"
        );
    }

    #[test]
    fn test_error_response_body() {
        let err = AppError::not_found("pad 123");
        let body = ErrorResponse::from(&err);
        assert_eq!(body.status, 404);
        assert_eq!(body.code, "NOT_FOUND");
        assert!(body.error.contains("pad 123"));
    }
}
