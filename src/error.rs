//! Error types for OpenChat
//!
//! This module defines the error types shared by the proxy server, the
//! streaming client and the local storage layer, using `thiserror` for
//! ergonomic error handling. HTTP-facing errors live in
//! [`crate::server::error`], which maps them onto status codes.

use thiserror::Error;

/// Main error type for OpenChat operations
///
/// This enum covers configuration loading, request validation, upstream
/// provider calls, stream consumption and persistence.
#[derive(Error, Debug)]
pub enum OpenChatError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Input validation errors (bad request payloads, malformed data URLs)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Upstream provider errors (non-success status, missing data)
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Chat request rejected by the proxy with a non-success status
    #[error("Request failed: {status} - {body}")]
    RequestFailed {
        /// HTTP status returned by the proxy
        status: u16,
        /// Response body text
        body: String,
    },

    /// Streaming response errors
    #[error("Stream error: {0}")]
    Stream(String),

    /// Rate limit exceeded for a client
    #[error("Rate limit exceeded: limit={limit}, retry after {retry_after_seconds}s")]
    RateLimitExceeded {
        /// The configured limit that was exceeded
        limit: u32,
        /// Seconds until the oldest request leaves the window
        retry_after_seconds: u64,
    },

    /// Missing credentials (upstream API key)
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    /// Storage errors (database operations)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Requested record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for OpenChat operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let error = OpenChatError::Config("invalid format".to_string());
        assert_eq!(error.to_string(), "Configuration error: invalid format");
    }

    #[test]
    fn test_validation_error_display() {
        let error = OpenChatError::Validation("Prompt is required".to_string());
        assert_eq!(error.to_string(), "Validation error: Prompt is required");
    }

    #[test]
    fn test_request_failed_display() {
        let error = OpenChatError::RequestFailed {
            status: 429,
            body: "{\"error\":\"Rate limit exceeded\"}".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Request failed: 429 - {\"error\":\"Rate limit exceeded\"}"
        );
    }

    #[test]
    fn test_rate_limit_error_display() {
        let error = OpenChatError::RateLimitExceeded {
            limit: 20,
            retry_after_seconds: 42,
        };
        assert_eq!(
            error.to_string(),
            "Rate limit exceeded: limit=20, retry after 42s"
        );
    }

    #[test]
    fn test_storage_error_display() {
        let error = OpenChatError::Storage("disk full".to_string());
        assert_eq!(error.to_string(), "Storage error: disk full");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: OpenChatError = io_error.into();
        assert!(error.to_string().contains("IO error"));
    }

    #[test]
    fn test_serialization_error_conversion() {
        let json_error = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let error: OpenChatError = json_error.into();
        assert!(error.to_string().starts_with("Serialization error"));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<OpenChatError>();
    }
}
