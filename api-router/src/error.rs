use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::error::AppError;
use serde::Serialize;
use thiserror::Error;

/// HTTP-facing error surface. Collapses the internal [`AppError`] taxonomy
/// down to the handful of status codes the control plane exposes to callers.
#[derive(Error, Debug, Serialize, Clone)]
pub enum ApiError {
    #[error("Internal server error")]
    InternalError,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Sync already running")]
    Conflict,

    #[error("Credential error")]
    CredentialError,

    #[error("Upstream error")]
    UpstreamFatal,
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Conflict => Self::Conflict,
            AppError::Validation(msg) => Self::ValidationError(msg),
            AppError::NotFound(msg) => Self::NotFound(msg),
            AppError::Credential(_) => Self::CredentialError,
            AppError::UpstreamFatal(_) => Self::UpstreamFatal,
            other => {
                tracing::error!("internal error: {other:?}");
                Self::InternalError
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::InternalError => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            Self::ValidationError(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            Self::Conflict => (StatusCode::CONFLICT, self.to_string()),
            Self::CredentialError => (StatusCode::UNAUTHORIZED, self.to_string()),
            Self::UpstreamFatal => (StatusCode::BAD_GATEWAY, self.to_string()),
        };

        (
            status,
            Json(ErrorResponse {
                error: message,
                status: "error".to_string(),
            }),
        )
            .into_response()
    }
}

#[derive(Serialize, Debug)]
struct ErrorResponse {
    error: String,
    status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_maps_to_409() {
        let api_error: ApiError = AppError::Conflict.into();
        assert!(matches!(api_error, ApiError::Conflict));
        assert_eq!(api_error.into_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn validation_maps_to_400() {
        let api_error: ApiError = AppError::Validation("bad range".to_string()).into();
        assert_eq!(api_error.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn not_found_maps_to_404() {
        let api_error: ApiError = AppError::NotFound("upload_id".to_string()).into();
        assert_eq!(api_error.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn credential_maps_to_401() {
        let api_error: ApiError = AppError::Credential("expired token".to_string()).into();
        assert_eq!(
            api_error.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn upstream_fatal_maps_to_502() {
        let api_error: ApiError = AppError::UpstreamFatal("5xx from upstream".to_string()).into();
        assert_eq!(api_error.into_response().status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn unhandled_variants_collapse_to_sanitized_internal_error() {
        let api_error: ApiError =
            AppError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full")).into();
        assert!(matches!(api_error, ApiError::InternalError));
        assert_eq!(
            api_error.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
