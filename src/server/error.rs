//! HTTP error responses for the proxy routes
//!
//! Every rejection a handler can produce is an [`ApiError`] variant. Each
//! variant knows its status code and JSON body; CORS headers are added by the
//! router middleware so they apply to errors and successes alike.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Map, Value};
use thiserror::Error;

/// Errors returned by the proxy handlers
#[derive(Debug, Error)]
pub enum ApiError {
    /// The `X-TOS-Accepted: true` header is missing
    #[error("Terms of Service not accepted")]
    TosNotAccepted,

    /// A deployment password is configured and the request did not match it
    #[error("Invalid deployment password")]
    InvalidPassword,

    /// Too many requests from one client in the current window
    #[error("{message}")]
    RateLimited {
        /// Route-specific message
        message: &'static str,
        /// Configured limit
        limit: u32,
        /// Human-readable window ("1 hour")
        window: String,
        /// Seconds until a slot frees up
        retry_after_seconds: u64,
    },

    /// The request body is not valid JSON
    #[error("Invalid JSON body")]
    InvalidJson,

    /// No upstream API key is configured
    #[error("Venice API key not configured")]
    MissingApiKey,

    /// A request field failed validation
    #[error("{message}")]
    BadRequest {
        /// Error text returned in the `error` field
        message: String,
        /// Extra fields merged into the body (limits, allowed values)
        details: Map<String, Value>,
    },

    /// The provider answered with a non-success status
    #[error("{message}: {status}")]
    UpstreamStatus {
        /// Route-specific message
        message: &'static str,
        /// Status returned by the provider, passed through to the client
        status: u16,
    },

    /// The provider could not be reached or returned unusable data
    #[error("{0}")]
    BadGateway(String),
}

impl ApiError {
    /// A 400 response with only an `error` field
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
            details: Map::new(),
        }
    }

    /// A 400 response with extra body fields
    ///
    /// `details` must be a JSON object; anything else is ignored.
    pub fn bad_request_with(message: impl Into<String>, details: Value) -> Self {
        let details = match details {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self::BadRequest {
            message: message.into(),
            details,
        }
    }

    /// Returns the HTTP status code for this error
    ///
    /// - ToS missing: 403
    /// - Wrong password: 401
    /// - Rate limit: 429
    /// - Bad JSON or field: 400
    /// - Missing API key: 500
    /// - Upstream status: passed through (502 if it is not a valid status)
    /// - Upstream unreachable: 502
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::TosNotAccepted => StatusCode::FORBIDDEN,
            Self::InvalidPassword => StatusCode::UNAUTHORIZED,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::InvalidJson | Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::MissingApiKey => StatusCode::INTERNAL_SERVER_ERROR,
            Self::UpstreamStatus { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::BadGateway(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// JSON body for this error
    pub fn body(&self) -> Value {
        match self {
            Self::TosNotAccepted => json!({
                "error": "Terms of Service not accepted",
                "message": "You must include header: X-TOS-Accepted: true",
                "tos_url": "/tos.html",
            }),
            Self::InvalidPassword => json!({ "error": "Invalid deployment password" }),
            Self::RateLimited {
                message,
                limit,
                window,
                retry_after_seconds,
            } => json!({
                "error": message,
                "limit": limit,
                "window": window,
                "retry_after_seconds": retry_after_seconds,
            }),
            Self::InvalidJson => json!({ "error": "Invalid JSON body" }),
            Self::MissingApiKey => json!({
                "error": "Server configuration error",
                "message": "Venice API key not configured",
            }),
            Self::BadRequest { message, details } => {
                let mut body = Map::new();
                body.insert("error".to_string(), Value::String(message.clone()));
                for (key, value) in details {
                    body.insert(key.clone(), value.clone());
                }
                Value::Object(body)
            }
            Self::UpstreamStatus { message, status } => json!({
                "error": message,
                "status": status,
            }),
            Self::BadGateway(message) => json!({ "error": message }),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status_code(), Json(self.body())).into_response();
        if let Self::RateLimited {
            retry_after_seconds,
            ..
        } = self
        {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_seconds));
        }
        response
    }
}
