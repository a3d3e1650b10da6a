//! API error types and handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use starchat_billing::BillingError;
use starchat_shared::StarchatError;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Resource not found")]
    NotFound,
    #[error("Resource already exists")]
    Conflict(String),

    #[error("Upstream service error: {0}")]
    Upstream(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Internal server error")]
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", self.to_string()),

            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            ApiError::InvalidSignature => (StatusCode::BAD_REQUEST, "INVALID_SIGNATURE", self.to_string()),

            ApiError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),

            ApiError::Upstream(_) => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", "Upstream service error".to_string()),
            ApiError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR", "Database error".to_string()),
            ApiError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", self.to_string()),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

impl From<StarchatError> for ApiError {
    fn from(err: StarchatError) -> Self {
        match err {
            StarchatError::NotFound(_) => ApiError::NotFound,
            StarchatError::Validation(msg) => ApiError::Validation(msg),
            StarchatError::Conflict(msg) => ApiError::Conflict(msg),
            StarchatError::Storage(msg) => {
                tracing::error!(error = %msg, "Database error");
                ApiError::Database(msg)
            }
            StarchatError::Upstream(msg) => {
                tracing::warn!(error = %msg, "Upstream error");
                ApiError::Upstream(msg)
            }
            StarchatError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                ApiError::Internal
            }
        }
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::Store(inner) => inner.into(),
            BillingError::AccountNotFound(_) => ApiError::NotFound,
            BillingError::WebhookSignatureInvalid => ApiError::InvalidSignature,
            BillingError::InvalidInput(msg) | BillingError::InvalidPlan(msg) => {
                ApiError::Validation(msg)
            }
            err @ (BillingError::SeatLimit { .. } | BillingError::UsageUnavailable(_)) => {
                ApiError::Validation(err.to_string())
            }
            err @ (BillingError::Config(_) | BillingError::Internal(_)) => {
                tracing::error!(error = %err, "Billing internal error");
                ApiError::Internal
            }
            err => {
                tracing::warn!(error = %err, "Billing provider error");
                ApiError::Upstream(err.to_string())
            }
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        StarchatError::from(err).into()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
