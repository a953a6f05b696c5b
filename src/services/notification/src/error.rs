//! Error handling for the notification delivery engine
//!
//! This module defines the error taxonomy for the engine and the conversion
//! into HTTP responses. Transient delivery failures are recovered internally
//! by the retry scheduler; only validation, rate limiting, not-found and
//! conflict errors surface to callers synchronously.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use courier_shared::ChannelKind;
use serde_json::json;
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Main error type for the notification delivery engine
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    /// Validation errors; `security` marks a rejected injection attempt
    #[error("Validation error: {field}: {message}")]
    Validation {
        field: String,
        message: String,
        security: bool,
    },

    /// Rate limiting errors
    #[error("Rate limit exceeded: {limit} requests per window")]
    RateLimited { limit: u32, retry_after_secs: u64 },

    /// Channel rejected by its circuit breaker
    #[error("Channel {channel} unavailable: circuit {circuit_state}")]
    ChannelUnavailable {
        channel: ChannelKind,
        circuit_state: String,
    },

    /// Provider failure that is worth retrying
    #[error("Transient delivery failure: {message}")]
    TransientDelivery { message: String },

    /// Provider failure that will not succeed on retry
    #[error("Permanent delivery failure: {message}")]
    PermanentDelivery { message: String },

    /// Not found errors
    #[error("Resource not found: {resource}")]
    NotFound { resource: String },

    /// Conflict errors (terminal records, forbidden transitions)
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Timeout errors
    #[error("Operation timed out: {operation}")]
    Timeout { operation: String },

    /// Internal engine errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl EngineError {
    /// Get the HTTP status code that should be returned for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            EngineError::Validation { .. } => StatusCode::BAD_REQUEST,
            EngineError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            EngineError::ChannelUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::TransientDelivery { .. } => StatusCode::BAD_GATEWAY,
            EngineError::PermanentDelivery { .. } => StatusCode::BAD_GATEWAY,
            EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
            EngineError::Conflict { .. } => StatusCode::CONFLICT,
            EngineError::Config { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            EngineError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            EngineError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            EngineError::Validation { security: true, .. } => "SECURITY_VALIDATION_ERROR",
            EngineError::Validation { .. } => "VALIDATION_ERROR",
            EngineError::RateLimited { .. } => "RATE_LIMIT_EXCEEDED",
            EngineError::ChannelUnavailable { .. } => "CHANNEL_UNAVAILABLE",
            EngineError::TransientDelivery { .. } => "TRANSIENT_DELIVERY_ERROR",
            EngineError::PermanentDelivery { .. } => "PERMANENT_DELIVERY_ERROR",
            EngineError::NotFound { .. } => "NOT_FOUND",
            EngineError::Conflict { .. } => "CONFLICT",
            EngineError::Config { .. } => "CONFIG_ERROR",
            EngineError::Timeout { .. } => "TIMEOUT",
            EngineError::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// Check if this error is worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::TransientDelivery { .. }
                | EngineError::ChannelUnavailable { .. }
                | EngineError::Timeout { .. }
        )
    }

    /// Create a validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::Validation {
            field: field.into(),
            message: message.into(),
            security: false,
        }
    }

    /// Create a validation error for rejected unsafe content
    pub fn security_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::Validation {
            field: field.into(),
            message: message.into(),
            security: true,
        }
    }

    /// Create a transient delivery error
    pub fn transient(message: impl Into<String>) -> Self {
        EngineError::TransientDelivery {
            message: message.into(),
        }
    }

    /// Create a permanent delivery error
    pub fn permanent(message: impl Into<String>) -> Self {
        EngineError::PermanentDelivery {
            message: message.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(resource: impl Into<String>) -> Self {
        EngineError::NotFound {
            resource: resource.into(),
        }
    }

    /// Create a conflict error
    pub fn conflict(message: impl Into<String>) -> Self {
        EngineError::Conflict {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        EngineError::Config {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>) -> Self {
        EngineError::Timeout {
            operation: operation.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        EngineError::Internal {
            message: message.into(),
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();
        let message = self.to_string();

        let mut body = json!({
            "error": {
                "code": error_code,
                "message": message,
                "status": status.as_u16(),
            }
        });

        if let EngineError::ChannelUnavailable { circuit_state, .. } = &self {
            body["error"]["circuit_state"] = json!(circuit_state);
        }

        let mut response = (status, Json(body)).into_response();

        if let EngineError::RateLimited {
            limit,
            retry_after_secs,
        } = &self
        {
            let headers = response.headers_mut();
            if let Ok(v) = limit.to_string().parse() {
                headers.insert("x-ratelimit-limit", v);
            }
            if let Ok(v) = "0".parse() {
                headers.insert("x-ratelimit-remaining", v);
            }
            if let Ok(v) = retry_after_secs.to_string().parse() {
                headers.insert(header::RETRY_AFTER, v);
            }
        }

        response
    }
}
