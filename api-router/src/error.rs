use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::error::AppError;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Serialize, Clone)]
pub enum ApiError {
    #[error("Internal server error")]
    InternalError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Upstream service unavailable: {0}")]
    Upstream(String),
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Database(_) | AppError::OpenAI(_) => {
                tracing::error!("Internal error: {:?}", err);
                Self::InternalError("Internal server error".to_string())
            }
            AppError::NotFound(msg) => Self::NotFound(msg),
            AppError::Validation(msg) => Self::ValidationError(msg),
            AppError::Auth(msg) => Self::Unauthorized(msg),
            AppError::ExternalService(msg) => {
                tracing::error!("Upstream failure: {msg}");
                Self::Upstream("A dependency is unavailable, please retry".to_string())
            }
            _ => {
                tracing::error!("Internal error: {:?}", err);
                Self::InternalError("Internal server error".to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::InternalError(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
            Self::ValidationError(message) => (StatusCode::BAD_REQUEST, message),
            Self::NotFound(message) => (StatusCode::NOT_FOUND, message),
            Self::Unauthorized(message) => (StatusCode::UNAUTHORIZED, message),
            Self::Upstream(message) => (StatusCode::BAD_GATEWAY, message),
        };

        let body = ErrorResponse {
            error: message,
            status: "error".to_string(),
        };

        (status, Json(body)).into_response()
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

    fn status_of(error: ApiError) -> StatusCode {
        error.into_response().status()
    }

    #[test]
    fn test_app_error_conversion() {
        let api_error = ApiError::from(AppError::NotFound("resource not found".to_string()));
        assert!(matches!(api_error, ApiError::NotFound(msg) if msg == "resource not found"));

        let api_error = ApiError::from(AppError::Validation("invalid input".to_string()));
        assert!(matches!(api_error, ApiError::ValidationError(msg) if msg == "invalid input"));

        let api_error = ApiError::from(AppError::Auth("no access".to_string()));
        assert!(matches!(api_error, ApiError::Unauthorized(msg) if msg == "no access"));
    }

    #[test]
    fn test_internal_details_are_sanitised() {
        let api_error = ApiError::from(AppError::InternalError(
            "db password incorrect".to_string(),
        ));
        assert_eq!(api_error.to_string(), "Internal server error");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            status_of(ApiError::InternalError("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(ApiError::ValidationError("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_of(ApiError::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(ApiError::Unauthorized("x".into())),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(status_of(ApiError::Upstream("x".into())), StatusCode::BAD_GATEWAY);
    }
}
