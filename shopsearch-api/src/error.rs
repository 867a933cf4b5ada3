use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use shopsearch_core::CoreError;
use thiserror::Error;
use validator::ValidationErrors;

use crate::security::rate_limit::{add_rate_limit_headers, RateLimitDecision};

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Rate limit exceeded")]
    RateLimited(RateLimitDecision),

    #[error("Access denied")]
    Forbidden,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<ValidationErrors> for ApiError {
    fn from(errors: ValidationErrors) -> Self {
        ApiError::BadRequest(format!("Validation failed: {}", errors))
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(msg) => ApiError::BadRequest(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::RateLimited(decision) => {
                let mut headers = HeaderMap::new();
                add_rate_limit_headers(&mut headers, &decision);
                let body = Json(json!({
                    "detail": "Rate limit exceeded",
                    "limit": decision.limit,
                    "remaining": 0,
                    "reset_time": decision.reset_at.timestamp(),
                }));
                (StatusCode::TOO_MANY_REQUESTS, headers, body).into_response()
            }
            ApiError::Forbidden => {
                (StatusCode::FORBIDDEN, Json(json!({ "detail": "Access denied" }))).into_response()
            }
            ApiError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "detail": msg }))).into_response()
            }
            ApiError::NotFound(msg) => {
                (StatusCode::NOT_FOUND, Json(json!({ "detail": msg }))).into_response()
            }
            ApiError::Unavailable(msg) => {
                tracing::error!(error = %msg, "Service unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(json!({ "detail": "Service temporarily unavailable" })),
                )
                    .into_response()
            }
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "detail": "Internal server error" })),
                )
                    .into_response()
            }
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
