//! API error types and responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use keymaster_core::api::ErrorResponse;
use keymaster_core::ConfigError;
use keymaster_issuer::IssuanceError;
use thiserror::Error;

use super::assertions::{AssertionError, PolicyError};
use super::nonces::NonceError;

/// API error type
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Invalid assertion: {0}")]
    InvalidAssertion(String),

    #[error("Workflow policy not satisfied: {0}")]
    PolicyNotSatisfied(String),

    #[error("Credential issuance failed: {0}")]
    IssuanceFailed(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone()),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg.clone()),
            ApiError::InvalidAssertion(msg) => (StatusCode::UNAUTHORIZED, "INVALID_ASSERTION", msg.clone()),
            ApiError::PolicyNotSatisfied(msg) => (StatusCode::FORBIDDEN, "POLICY_NOT_SATISFIED", msg.clone()),
            ApiError::IssuanceFailed(msg) => (StatusCode::BAD_GATEWAY, "ISSUANCE_FAILED", msg.clone()),
        };

        let body = ErrorResponse {
            error: message,
            code: code.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<IssuanceError> for ApiError {
    fn from(err: IssuanceError) -> Self {
        match err {
            IssuanceError::Config(inner) => inner.into(),
            IssuanceError::Backend { .. } | IssuanceError::Wrap { .. } => ApiError::IssuanceFailed(err.to_string()),
            IssuanceError::Build { .. } | IssuanceError::WrapperUnavailable { .. } => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<AssertionError> for ApiError {
    fn from(err: AssertionError) -> Self {
        match err {
            AssertionError::UnknownIdp(_) => ApiError::Internal(err.to_string()),
            _ => ApiError::InvalidAssertion(err.to_string()),
        }
    }
}

impl From<PolicyError> for ApiError {
    fn from(err: PolicyError) -> Self {
        ApiError::PolicyNotSatisfied(err.to_string())
    }
}

impl From<NonceError> for ApiError {
    fn from(err: NonceError) -> Self {
        ApiError::Internal(err.to_string())
    }
}
