// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent API responses.
//!
//! Two layers:
//! - [`SyncErrorType`] / [`ProviderError`]: the classified failure taxonomy
//!   shared by the provider clients, the retry policy and the sync error log.
//! - [`AppError`]: what route handlers return; converts into a JSON body with
//!   a machine-readable `errorType`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Classified failure kinds for provider calls and core endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncErrorType {
    /// 401 from the provider, or a refresh token the provider rejected.
    Unauthorized,
    /// 429 from the provider.
    RateLimited,
    /// 5xx from the provider, or an unreadable 2xx body.
    ServerError,
    /// Any other 4xx. Permanent.
    ClientError,
    /// Connection, TLS or timeout failure before a response arrived.
    NetworkError,
    /// Provider credentials missing from the environment.
    ConfigError,
    /// Malformed request to one of our own endpoints.
    ValidationError,
}

impl SyncErrorType {
    pub const ALL: [SyncErrorType; 7] = [
        SyncErrorType::Unauthorized,
        SyncErrorType::RateLimited,
        SyncErrorType::ServerError,
        SyncErrorType::ClientError,
        SyncErrorType::NetworkError,
        SyncErrorType::ConfigError,
        SyncErrorType::ValidationError,
    ];

    /// Stable string form, used for storage and JSON.
    pub fn as_str(self) -> &'static str {
        match self {
            SyncErrorType::Unauthorized => "UNAUTHORIZED",
            SyncErrorType::RateLimited => "RATE_LIMITED",
            SyncErrorType::ServerError => "SERVER_ERROR",
            SyncErrorType::ClientError => "CLIENT_ERROR",
            SyncErrorType::NetworkError => "NETWORK_ERROR",
            SyncErrorType::ConfigError => "CONFIG_ERROR",
            SyncErrorType::ValidationError => "VALIDATION_ERROR",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == value)
    }

    /// Whether a failure of this kind may succeed on a later attempt.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            SyncErrorType::RateLimited | SyncErrorType::ServerError | SyncErrorType::NetworkError
        )
    }
}

impl fmt::Display for SyncErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified provider failure.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    pub kind: SyncErrorType,
    /// HTTP status, when the provider answered at all.
    pub status: Option<u16>,
    pub message: String,
    /// Raw response body, kept for diagnostics.
    pub body: Option<String>,
    /// Wait hint from `Retry-After` (or the provider's equivalent).
    pub retry_after: Option<Duration>,
}

impl ProviderError {
    pub fn new(kind: SyncErrorType, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
            body: None,
            retry_after: None,
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(SyncErrorType::Unauthorized, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(SyncErrorType::NetworkError, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(SyncErrorType::ConfigError, message)
    }

    /// A 2xx response whose payload we could not read.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(SyncErrorType::ServerError, message)
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_retry_after(mut self, wait: Option<Duration>) -> Self {
        self.retry_after = wait;
        self
    }

    /// True when the token endpoint rejected the refresh token itself.
    pub fn is_invalid_grant(&self) -> bool {
        self.body
            .as_deref()
            .map(|b| b.contains("invalid_grant"))
            .unwrap_or(false)
            || self.message.contains("invalid_grant")
    }
}

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Provider not connected: {0}")]
    NotConnected(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Taxonomy entry reported to clients, if the error has one.
    pub fn error_type(&self) -> Option<SyncErrorType> {
        match self {
            AppError::BadRequest(_) | AppError::Conflict(_) => Some(SyncErrorType::ValidationError),
            AppError::Config(_) => Some(SyncErrorType::ConfigError),
            AppError::NotConnected(_) => Some(SyncErrorType::Unauthorized),
            AppError::Provider(e) => Some(e.kind),
            _ => None,
        }
    }

    /// True when the provider credential is missing or no longer accepted.
    pub fn is_token_error(&self) -> bool {
        match self {
            AppError::NotConnected(_) => true,
            AppError::Provider(e) => e.kind == SyncErrorType::Unauthorized,
            _ => false,
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(err.to_string())
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(rename = "errorType", skip_serializing_if = "Option::is_none")]
    error_type: Option<SyncErrorType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let error_type = self.error_type();
        let (status, error, details) = match &self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", None),
            AppError::InvalidToken => (StatusCode::UNAUTHORIZED, "invalid_token", None),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", Some(msg.clone())),
            AppError::NotConnected(msg) => {
                (StatusCode::NOT_FOUND, "not_connected", Some(msg.clone()))
            }
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", Some(msg.clone()))
            }
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", Some(msg.clone())),
            AppError::Config(msg) => {
                tracing::error!(error = %msg, "Configuration error");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "config_error",
                    Some(msg.clone()),
                )
            }
            AppError::Provider(err) => {
                let status = match err.kind {
                    SyncErrorType::Unauthorized => StatusCode::UNAUTHORIZED,
                    SyncErrorType::RateLimited => StatusCode::TOO_MANY_REQUESTS,
                    SyncErrorType::ConfigError => StatusCode::SERVICE_UNAVAILABLE,
                    SyncErrorType::ValidationError => StatusCode::BAD_REQUEST,
                    _ => StatusCode::BAD_GATEWAY,
                };
                (status, "provider_error", Some(err.message.clone()))
            }
            AppError::Database(msg) => {
                tracing::error!(error = %msg, "Database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            error_type,
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_type_string_roundtrip() {
        for t in SyncErrorType::ALL {
            assert_eq!(SyncErrorType::parse(t.as_str()), Some(t));
        }
        assert_eq!(SyncErrorType::parse("NOPE"), None);
    }

    #[test]
    fn test_error_type_serializes_screaming_snake() {
        let json = serde_json::to_string(&SyncErrorType::RateLimited).unwrap();
        assert_eq!(json, "\"RATE_LIMITED\"");
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(SyncErrorType::ServerError.is_retryable());
        assert!(SyncErrorType::NetworkError.is_retryable());
        assert!(SyncErrorType::RateLimited.is_retryable());
        assert!(!SyncErrorType::Unauthorized.is_retryable());
        assert!(!SyncErrorType::ClientError.is_retryable());
        assert!(!SyncErrorType::ConfigError.is_retryable());
        assert!(!SyncErrorType::ValidationError.is_retryable());
    }

    #[test]
    fn test_invalid_grant_detection() {
        let err = ProviderError::new(SyncErrorType::ClientError, "HTTP 400")
            .with_status(400)
            .with_body(r#"{"errors":[{"errorType":"invalid_grant"}]}"#);
        assert!(err.is_invalid_grant());

        let err = ProviderError::new(SyncErrorType::ClientError, "HTTP 400").with_body("{}");
        assert!(!err.is_invalid_grant());
    }
}
