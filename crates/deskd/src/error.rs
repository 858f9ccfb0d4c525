//! HTTP error mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use desk_common::QuotaError;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Quota(#[from] QuotaError),

    #[error("Missing identity header: {0}")]
    Unauthorized(&'static str),

    #[error("{0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    /// Client may retry the same request with `override: true`
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub allow_override: bool,
    /// Client should offer a bundle purchase
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub show_add_bundle_prompt: bool,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Quota(e) => match e {
                QuotaError::NotConfigured(_)
                | QuotaError::InvalidMonth(_)
                | QuotaError::InvalidConfig(_)
                | QuotaError::InvalidBundle(_)
                | QuotaError::InvalidTicket(_) => StatusCode::BAD_REQUEST,
                QuotaError::GraceAvailable
                | QuotaError::Conflict(_)
                | QuotaError::InvalidTransition { .. } => StatusCode::CONFLICT,
                QuotaError::QuotaExhausted => StatusCode::FORBIDDEN,
                QuotaError::NotFound(_) => StatusCode::NOT_FOUND,
                QuotaError::ConcurrentModification { .. }
                | QuotaError::Storage(_)
                | QuotaError::Io(_)
                | QuotaError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::Quota(e) => e.code(),
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("  Request failed: {}", self);
        }
        let body = ErrorResponse {
            code: self.error_code().to_string(),
            message: self.to_string(),
            allow_override: matches!(self, ApiError::Quota(QuotaError::GraceAvailable)),
            show_add_bundle_prompt: matches!(self, ApiError::Quota(QuotaError::QuotaExhausted)),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_denials() {
        let soft = ApiError::from(QuotaError::GraceAvailable);
        assert_eq!(soft.status_code(), StatusCode::CONFLICT);
        assert_eq!(soft.error_code(), "GRACE_AVAILABLE");

        let hard = ApiError::from(QuotaError::QuotaExhausted);
        assert_eq!(hard.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_not_configured_is_client_error() {
        let err = ApiError::from(QuotaError::NotConfigured("Acme".into()));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(err.to_string().contains("Acme"));
    }

    #[test]
    fn test_unauthorized() {
        let err = ApiError::Unauthorized("x-desk-company");
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
    }
}
