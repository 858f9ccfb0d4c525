//! Caller identity from trusted headers set by the authentication proxy.

use crate::error::ApiError;
use axum::{extract::FromRequestParts, http::request::Parts};
use desk_common::{Identity, COMPANY_HEADER, USER_HEADER};

/// Extractor wrapping [`Identity`]; rejects with 401 when a header is missing.
pub struct Caller(pub Identity);

fn header(parts: &Parts, name: &'static str) -> Result<String, ApiError> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
        .ok_or(ApiError::Unauthorized(name))
}

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Caller(Identity::new(
            header(parts, COMPANY_HEADER)?,
            header(parts, USER_HEADER)?,
        )))
    }
}
