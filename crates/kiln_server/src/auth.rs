//! Admin token authentication.

use crate::error::ApiError;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use http::HeaderMap;
use http::header::AUTHORIZATION;
use std::sync::Arc;

/// Alternative header carrying the token
pub const API_KEY_HEADER: &str = "x-api-key";

/// Shared secret required on protected routes
#[derive(Clone)]
pub struct AdminToken(Arc<str>);

impl AdminToken {
    /// Wrap a token
    #[must_use]
    pub fn new(token: impl AsRef<str>) -> Self {
        Self(Arc::from(token.as_ref()))
    }

    /// Compare without short-circuiting on the first differing byte
    #[must_use]
    pub fn matches(&self, candidate: &str) -> bool {
        let expected = self.0.as_bytes();
        let candidate = candidate.as_bytes();
        if expected.len() != candidate.len() {
            return false;
        }
        expected
            .iter()
            .zip(candidate)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl std::fmt::Debug for AdminToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AdminToken(***)")
    }
}

/// Token presented by the caller: `Authorization: Bearer <t>`, else `X-API-Key`
#[must_use]
pub fn presented_token(headers: &HeaderMap) -> Option<&str> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);

    bearer.or_else(|| {
        headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
    })
}

/// Middleware rejecting requests without the admin token
///
/// # Errors
///
/// Returns `Unauthorized` when the token is missing or wrong
pub async fn require_token(
    State(token): State<AdminToken>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    match presented_token(request.headers()) {
        Some(candidate) if token.matches(candidate) => Ok(next.run(request).await),
        Some(_) => {
            tracing::warn!(path = %request.uri().path(), "rejected request with invalid token");
            Err(ApiError::Unauthorized("invalid token".to_string()))
        }
        None => Err(ApiError::Unauthorized("missing token".to_string())),
    }
}
