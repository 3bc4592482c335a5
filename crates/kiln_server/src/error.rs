//! HTTP error mapping.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use kiln_runtime::ServiceError;
use serde::Serialize;

/// Error body
#[derive(Clone, Debug, Serialize)]
pub struct ErrorBody {
    /// Stable machine-readable code
    pub code: &'static str,
    /// Human-readable message
    pub message: String,
}

#[derive(Clone, Debug, Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

/// Handler error, rendered as `{"error": {"code", "message"}}`
#[derive(Debug)]
pub enum ApiError {
    /// 400
    BadRequest(String),
    /// 401
    Unauthorized(String),
    /// 404
    NotFound(String),
    /// 409
    Conflict(String),
    /// 500
    Internal(String),
}

impl ApiError {
    /// HTTP status for this error
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "invalid_argument",
            Self::Unauthorized(_) => "unauthorized",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        let message = err.to_string();
        match err {
            ServiceError::NotFound { .. } => Self::NotFound(message),
            ServiceError::InvalidIdentifier { .. }
            | ServiceError::Validation(_)
            | ServiceError::NotRunnable { .. } => Self::BadRequest(message),
            ServiceError::AlreadyExists { .. } | ServiceError::BuildInProgress { .. } => {
                Self::Conflict(message)
            }
            ServiceError::Build(_)
            | ServiceError::Storage(_)
            | ServiceError::Launch(_)
            | ServiceError::TaskFailed { .. } => {
                tracing::error!(error = %message, "request failed");
                Self::Internal(message)
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let message = match self {
            Self::BadRequest(m)
            | Self::Unauthorized(m)
            | Self::NotFound(m)
            | Self::Conflict(m)
            | Self::Internal(m) => m,
        };
        (
            status,
            Json(ErrorEnvelope {
                error: ErrorBody { code, message },
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::{ArtifactId, ArtifactState, CoreError};

    #[test]
    fn test_service_error_mapping() {
        let cases = [
            (
                ServiceError::NotFound {
                    kind: "artifact",
                    id: "x".to_string(),
                },
                StatusCode::NOT_FOUND,
            ),
            (
                ServiceError::InvalidIdentifier {
                    reason: "bad".to_string(),
                },
                StatusCode::BAD_REQUEST,
            ),
            (
                ServiceError::Validation(CoreError::validation("name", "empty")),
                StatusCode::BAD_REQUEST,
            ),
            (
                ServiceError::NotRunnable {
                    id: ArtifactId::new(),
                    state: ArtifactState::Building,
                },
                StatusCode::BAD_REQUEST,
            ),
            (
                ServiceError::BuildInProgress { id: ArtifactId::new() },
                StatusCode::CONFLICT,
            ),
            (
                ServiceError::TaskFailed {
                    reason: "panicked".to_string(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status(), expected);
        }
    }

    #[test]
    fn test_response_status() {
        let resp = ApiError::Unauthorized("no".to_string()).into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
