use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::middleware::permissions::Capability;

/// Header names shared by the gate and the error renderer.
pub const HEADER_LIMIT: &str = "x-ratelimit-limit";
pub const HEADER_REMAINING: &str = "x-ratelimit-remaining";
pub const HEADER_RESET: &str = "x-ratelimit-reset";

#[derive(Debug, Error)]
pub enum AppError {
    #[error("missing credential")]
    MissingCredential,

    #[error("invalid authorization header format")]
    InvalidFormat,

    /// Unknown, revoked and wrongly-prefixed credentials all map here.
    #[error("invalid credential")]
    InvalidCredential,

    #[error("rate limit exceeded")]
    RateLimitExceeded { limit: u32, reset_at: i64 },

    #[error("domain not allowed: {origin}")]
    DomainNotAllowed { origin: String },

    #[error("insufficient permissions: {capability} '{requested}' not allowed")]
    InsufficientPermissions {
        capability: Capability,
        requested: String,
    },

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("not found")]
    NotFound,

    #[error("no route for this path")]
    RouteNotFound,

    #[error("invalid or expired session")]
    Unauthorized,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, &'static str, String) {
        match self {
            AppError::MissingCredential => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "missing_credential",
                "missing Authorization header".to_string(),
            ),
            AppError::InvalidFormat => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "invalid_format",
                "Authorization header must be 'Bearer <credential>'".to_string(),
            ),
            AppError::InvalidCredential => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "invalid_credential",
                "invalid credential".to_string(),
            ),
            AppError::RateLimitExceeded { limit, .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limit_error",
                "rate_limit_exceeded",
                format!("rate limit of {} requests per minute exceeded", limit),
            ),
            AppError::DomainNotAllowed { .. } => (
                StatusCode::FORBIDDEN,
                "permission_error",
                "domain_not_allowed",
                "request origin is not allowed for this credential".to_string(),
            ),
            AppError::InsufficientPermissions {
                capability,
                requested,
            } => (
                StatusCode::FORBIDDEN,
                "permission_error",
                "insufficient_permissions",
                format!(
                    "{} '{}' is not allowed for this credential",
                    capability, requested
                ),
            ),
            AppError::ValidationError(msg) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "validation_error",
                msg.clone(),
            ),
            AppError::InvalidOperation(msg) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "invalid_operation",
                msg.clone(),
            ),
            AppError::NotFound => (
                StatusCode::NOT_FOUND,
                "not_found_error",
                "not_found",
                "credential not found".to_string(),
            ),
            AppError::RouteNotFound => (
                StatusCode::NOT_FOUND,
                "not_found_error",
                "not_found",
                "no route for this path".to_string(),
            ),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "invalid_session",
                "invalid or expired session".to_string(),
            ),
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                internal()
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:#}", e);
                internal()
            }
        }
    }
}

fn internal() -> (StatusCode, &'static str, &'static str, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal_error",
        "internal_server_error",
        "internal server error".to_string(),
    )
}

/// Body extraction failures (bad JSON, wrong content type, unknown enum
/// variants) surface as validation errors.
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::ValidationError(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code, msg) = self.parts();

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        let mut response = (status, body).into_response();

        if let AppError::RateLimitExceeded { limit, reset_at } = self {
            let headers = response.headers_mut();
            headers.insert(HEADER_LIMIT, HeaderValue::from(limit));
            headers.insert(HEADER_REMAINING, HeaderValue::from_static("0"));
            headers.insert(HEADER_RESET, HeaderValue::from(reset_at));
            headers.insert("retry-after", HeaderValue::from_static("60"));
        }

        response
    }
}
