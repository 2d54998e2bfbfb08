//! Centralized error types for the telemetry bridge.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps errors to appropriate HTTP status codes
//! - Implements `IntoResponse` for automatic JSON error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::broker::PublishError;
use crate::gateway::PublishOutcome;
use crate::state::ConfigError;
use crate::store::StoreError;

/// Trait for error types that provide machine-readable error codes.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

impl ErrorCode for StoreError {
    fn code(&self) -> &'static str {
        match self {
            Self::Io(_) => "store_io_error",
            Self::Serialization(_) => "store_serialization_error",
            Self::InvalidRange(_) => "invalid_range",
        }
    }
}

/// Application-wide error type for the bridge's HTTP surface.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum BridgeError {
    /// Client sent an invalid or malformed request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The broker session cannot serve the request right now.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The broker (or the client library) refused the publish.
    #[error("Publish failed: {0}")]
    PublishFailed(String),

    /// History store failure.
    #[error("Store error: {0}")]
    Store(String),

    /// Server configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::ServiceUnavailable(_) => "service_unavailable",
            Self::PublishFailed(_) => "publish_failed",
            Self::Store(_) => "store_error",
            Self::Configuration(_) => "configuration_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::ServiceUnavailable(_) | Self::Configuration(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::PublishFailed(_) | Self::Store(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Convenient Result alias for application-wide operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for BridgeError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidRange(msg) => Self::InvalidRequest(msg),
            other => Self::Store(other.to_string()),
        }
    }
}

impl From<ConfigError> for BridgeError {
    fn from(err: ConfigError) -> Self {
        Self::Configuration(err.0)
    }
}

impl From<PublishError> for BridgeError {
    fn from(err: PublishError) -> Self {
        match err {
            PublishError::InvalidTopic(msg) => Self::InvalidRequest(msg),
            PublishError::NotConnected => Self::ServiceUnavailable(err.to_string()),
            other => Self::PublishFailed(other.to_string()),
        }
    }
}

impl PublishOutcome {
    /// Splits the outcome into the accepted message or the API error.
    pub fn into_result(self) -> BridgeResult<(String, serde_json::Value)> {
        match self {
            Self::Accepted { topic, payload } => Ok((topic, payload)),
            Self::Invalid(reason) => Err(BridgeError::InvalidRequest(reason)),
            Self::Unavailable(reason) => Err(BridgeError::ServiceUnavailable(reason)),
            Self::Rejected(err) => Err(err.into()),
        }
    }
}
