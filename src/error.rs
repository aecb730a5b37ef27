//! Error types for the advisor.
//!
//! - [`UpstreamError`]: the completion endpoint failed (retryable).
//! - [`CompletionError`]: anything the completion client can return.
//! - [`AdvisorError`]: the request-level taxonomy. Each variant maps to one
//!   HTTP status and JSON body of the external contract.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::schema::ValidationError;

/// Failure surfaced by the remote chat-completion call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    /// Connection, TLS, timeout or request construction failure.
    #[error("request to completion endpoint failed: {0}")]
    Transport(String),

    /// Endpoint answered with a non-success status.
    #[error("completion endpoint returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// Success status but the body is not JSON.
    #[error("completion endpoint returned an unreadable body: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompletionError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// Locally malformed arguments; never sent and never retried.
    #[error("invalid completion request: {0}")]
    InvalidRequest(String),
}

impl CompletionError {
    /// Only upstream failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CompletionError::Upstream(_))
    }
}

#[derive(Debug, Error)]
pub enum AdvisorError {
    #[error("Server misconfiguration: missing deployment name")]
    Configuration,

    #[error("Bad request: empty body or invalid JSON")]
    MalformedBody,

    #[error("Invalid alert payload")]
    InvalidPayload(#[source] ValidationError),

    #[error("Payload too large")]
    PayloadTooLarge { limit: usize },

    #[error("OpenAI API error")]
    Upstream(#[source] UpstreamError),

    /// Unclassified failure. The message is logged, never returned.
    #[error("Internal Server Error")]
    Internal(String),
}

impl AdvisorError {
    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            AdvisorError::Configuration => "configuration",
            AdvisorError::MalformedBody | AdvisorError::InvalidPayload(_) => "bad_request",
            AdvisorError::PayloadTooLarge { .. } => "payload_too_large",
            AdvisorError::Upstream(_) => "upstream",
            AdvisorError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AdvisorError::Configuration | AdvisorError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AdvisorError::MalformedBody | AdvisorError::InvalidPayload(_) => {
                StatusCode::BAD_REQUEST
            }
            AdvisorError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            AdvisorError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            AdvisorError::InvalidPayload(err) => serde_json::to_value(&err.errors).ok(),
            AdvisorError::Upstream(err) => Some(serde_json::Value::String(err.to_string())),
            AdvisorError::PayloadTooLarge { limit } => {
                Some(serde_json::json!({ "limitBytes": limit }))
            }
            _ => None,
        }
    }
}

impl From<CompletionError> for AdvisorError {
    fn from(err: CompletionError) -> Self {
        match err {
            CompletionError::Upstream(inner) => AdvisorError::Upstream(inner),
            other => AdvisorError::Internal(other.to_string()),
        }
    }
}

/// JSON body of every failed request.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AdvisorError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.to_string(),
            details: self.details(),
        };
        (self.status(), Json(body)).into_response()
    }
}
