//! Proxy error taxonomy and its HTTP rendering
//!
//! Every failure a request can hit is a `ProxyError`. At the HTTP boundary it is
//! paired with the request id and rendered as a JSON body with a
//! machine-readable code and an appropriate status.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::data::{UpstreamError, UpstreamErrorKind};
use crate::limiter::{LimitScope, RateLimitExceeded};

/// Machine-readable error codes sent to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Malformed or oversized input
    ValidationFailed,
    /// Global or per-client admission window exhausted
    RateLimited,
    /// Provider did not answer in time
    UpstreamTimeout,
    /// Provider failure that may clear up on retry
    UpstreamUnavailable,
    /// Provider failure that will not clear up on retry
    UpstreamError,
    InternalError,
}

impl ErrorCode {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::ValidationFailed => StatusCode::BAD_REQUEST,
            ErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorCode::UpstreamUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::UpstreamError => StatusCode::BAD_GATEWAY,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Errors produced while serving a proxied lookup
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Input failed structural checks
    #[error("invalid {field}: {message}")]
    Validation { field: &'static str, message: String },

    /// Admission control rejected the request
    #[error(transparent)]
    RateLimited(#[from] RateLimitExceeded),

    /// The provider call failed
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// Anything else; the detail is logged, never sent to clients
    #[error("internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        ProxyError::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            ProxyError::Validation { .. } => ErrorCode::ValidationFailed,
            ProxyError::RateLimited(_) => ErrorCode::RateLimited,
            ProxyError::Upstream(err) => match err.kind() {
                UpstreamErrorKind::Timeout => ErrorCode::UpstreamTimeout,
                _ if err.is_retryable() => ErrorCode::UpstreamUnavailable,
                _ => ErrorCode::UpstreamError,
            },
            ProxyError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Message safe to show to clients
    fn public_message(&self) -> String {
        match self {
            ProxyError::Validation { .. } => self.to_string(),
            ProxyError::RateLimited(limit) => match limit.scope {
                LimitScope::Global => "Too many requests, service is busy".to_string(),
                LimitScope::Client => "Too many requests from this client".to_string(),
            },
            ProxyError::Upstream(err) => match err.kind() {
                UpstreamErrorKind::Timeout => "Places provider timed out".to_string(),
                UpstreamErrorKind::UpstreamHttpError => "Places provider request failed".to_string(),
                UpstreamErrorKind::UpstreamProtocolError => {
                    "Places provider returned an unusable response".to_string()
                }
            },
            ProxyError::Internal(_) => "Internal server error".to_string(),
        }
    }
}

/// Error payload inside the response body
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_status: Option<u16>,
}

/// JSON error response: `{ "error": {...}, "request_id": "..." }`
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: ErrorBody,
    pub request_id: String,
}

impl ApiError {
    pub fn new(err: ProxyError, request_id: impl Into<String>) -> Self {
        let (retry_after, retryable, upstream_status) = match &err {
            ProxyError::RateLimited(limit) => (Some(limit.retry_after_secs), None, None),
            ProxyError::Upstream(upstream) => {
                (None, Some(upstream.is_retryable()), upstream.http_status())
            }
            _ => (None, None, None),
        };

        Self {
            error: ErrorBody {
                code: err.code(),
                message: err.public_message(),
                retry_after,
                retryable,
                upstream_status,
            },
            request_id: request_id.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.error.code.status_code();
        let retry_after = self.error.retry_after;
        let mut response = (status, Json(self)).into_response();

        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}
