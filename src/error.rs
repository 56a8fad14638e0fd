//! Error taxonomy and its mapping to HTTP responses.

use std::time::Duration;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Failure of an outbound collaborator (durable store or generation API).
///
/// Carries enough to classify the failure but never the upstream body.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("{service} timed out after {timeout:?}")]
    Timeout {
        service: &'static str,
        timeout: Duration,
    },

    #[error("{service} is unreachable: {reason}")]
    Unreachable {
        service: &'static str,
        reason: String,
    },

    #[error("{service} responded with status {status}")]
    Status { service: &'static str, status: u16 },

    #[error("{service} rejected the credential")]
    Credential { service: &'static str },

    #[error("{service} returned an unreadable response: {reason}")]
    Malformed {
        service: &'static str,
        reason: String,
    },
}

impl CollaboratorError {
    /// Convert a `reqwest` failure, classifying timeouts and status errors.
    pub fn from_reqwest(service: &'static str, timeout: Duration, err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout { service, timeout }
        } else if let Some(status) = err.status() {
            Self::Status {
                service,
                status: status.as_u16(),
            }
        } else if err.is_decode() {
            Self::Malformed {
                service,
                reason: err.to_string(),
            }
        } else {
            Self::Unreachable {
                service,
                reason: err.to_string(),
            }
        }
    }

    /// Timeouts, transport failures and upstream 5xx may succeed on retry.
    /// Upstream 4xx, credential rejections and malformed bodies will not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Unreachable { .. } => true,
            Self::Status { status, .. } => *status >= 500,
            Self::Credential { .. } | Self::Malformed { .. } => false,
        }
    }

    pub fn service(&self) -> &'static str {
        match self {
            Self::Timeout { service, .. }
            | Self::Unreachable { service, .. }
            | Self::Status { service, .. }
            | Self::Credential { service }
            | Self::Malformed { service, .. } => service,
        }
    }
}

/// Application-level error that maps to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Single-flight denial. The holder is deliberately not part of the error.
    #[error("conversation is being processed by another session")]
    Conflict,

    #[error("too many concurrent requests")]
    Admission,

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict => StatusCode::CONFLICT,
            Self::Admission => StatusCode::TOO_MANY_REQUESTS,
            Self::Collaborator(CollaboratorError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            Self::Collaborator(e) if e.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
            Self::Collaborator(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the client may reasonably retry the same request later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Conflict | Self::Admission => true,
            Self::Collaborator(e) => e.is_retryable(),
            _ => false,
        }
    }

    fn client_message(&self) -> String {
        match self {
            Self::Validation(msg) | Self::Unauthorized(msg) | Self::NotFound(msg) => msg.clone(),
            Self::Conflict => "This chat is currently being processed by another session. Please try again later.".to_string(),
            Self::Admission => "Too many requests. Please try again later.".to_string(),
            Self::Collaborator(e) if e.is_retryable() => {
                "An upstream service is temporarily unavailable. Please try again later.".to_string()
            }
            Self::Collaborator(_) => "An upstream service rejected the request".to_string(),
            Self::Internal(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = ?self, "Request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self, "Request rejected");
        }

        let body = if self.is_retryable() {
            json!({ "error": self.client_message(), "retryable": true })
        } else {
            json!({ "error": self.client_message() })
        };

        (status, Json(body)).into_response()
    }
}
