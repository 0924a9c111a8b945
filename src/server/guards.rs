//! Request admission checks shared by the POST routes
//!
//! Every POST route runs the same gate before looking at its body: Terms
//! of Service header, deployment password, then the route's rate limit.

use super::error::ApiError;
use super::AppState;
use crate::rate_limit::{client_ip, RateLimitDecision, RateLimiter};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use bytes::Bytes;
use serde_json::Value;
use std::net::IpAddr;

/// Header a client sends to confirm it accepted the Terms of Service
pub const TOS_HEADER: &str = "x-tos-accepted";

/// Header carrying the deployment password
pub const PASSWORD_HEADER: &str = "x-deployment-password";

/// Rate-limited route families, each with its own bucket and limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    /// `/api/chat`
    Chat,
    /// `/api/image`
    Image,
    /// `/api/upscale`
    Upscale,
}

impl RouteKind {
    fn limit_message(self) -> &'static str {
        match self {
            RouteKind::Chat => "Rate limit exceeded",
            RouteKind::Image => "Image generation rate limit exceeded",
            RouteKind::Upscale => "Image upscale rate limit exceeded",
        }
    }
}

/// Reject requests without `X-TOS-Accepted: true`
pub fn require_tos(headers: &HeaderMap) -> Result<(), ApiError> {
    match headers.get(TOS_HEADER).and_then(|v| v.to_str().ok()) {
        Some("true") => Ok(()),
        _ => Err(ApiError::TosNotAccepted),
    }
}

/// Reject requests whose password header does not match the configured one
///
/// Passes every request when no deployment password is configured.
pub fn require_password(headers: &HeaderMap, expected: Option<&str>) -> Result<(), ApiError> {
    let Some(expected) = expected.filter(|p| !p.is_empty()) else {
        return Ok(());
    };
    let provided = headers
        .get(PASSWORD_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if constant_time_eq(provided.as_bytes(), expected.as_bytes()) {
        Ok(())
    } else {
        Err(ApiError::InvalidPassword)
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Count the request against the route's limiter
pub fn enforce_rate_limit(
    state: &AppState,
    kind: RouteKind,
    client_id: &str,
) -> Result<RateLimitDecision, ApiError> {
    let settings = &state.config.rate_limit;
    let (limiter, limit): (&RateLimiter, u32) = match kind {
        RouteKind::Chat => (&state.chat_limiter, settings.chat_requests),
        RouteKind::Image => (&state.image_limiter, settings.image_requests),
        RouteKind::Upscale => (&state.upscale_limiter, settings.upscale_requests),
    };

    let decision = limiter.check(client_id, limit, settings.window_ms());
    if decision.allowed {
        return Ok(decision);
    }

    tracing::info!(
        "Rate limit hit: route={:?} client={} limit={}",
        kind,
        decision.client_id,
        decision.limit
    );
    Err(ApiError::RateLimited {
        message: kind.limit_message(),
        limit: decision.limit,
        window: settings.window_label(),
        retry_after_seconds: decision.retry_after_seconds.unwrap_or(0),
    })
}

/// Run the full admission gate for a POST route
///
/// # Errors
///
/// Returns 403 without the ToS header, 401 for a wrong deployment
/// password and 429 when the client is over its limit, in that order.
pub fn admit(
    state: &AppState,
    kind: RouteKind,
    headers: &HeaderMap,
    peer: Option<IpAddr>,
) -> Result<RateLimitDecision, ApiError> {
    require_tos(headers)?;
    require_password(headers, state.config.server.deployment_password.as_deref())?;
    enforce_rate_limit(state, kind, &client_ip(headers, peer))
}

/// Parse a request body as JSON
pub fn parse_json_body(body: &Bytes) -> Result<Value, ApiError> {
    serde_json::from_slice(body).map_err(|e| {
        tracing::debug!("Rejecting request body: {}", e);
        ApiError::InvalidJson
    })
}

/// Fail with 500 when no upstream API key is configured
pub fn require_api_key(state: &AppState) -> Result<(), ApiError> {
    if state.upstream.has_api_key() {
        Ok(())
    } else {
        tracing::error!("Venice API key not configured");
        Err(ApiError::MissingApiKey)
    }
}

/// `X-RateLimit-Remaining` and `X-RateLimit-Limit` headers for a decision
pub fn rate_limit_headers(decision: &RateLimitDecision) -> [(HeaderName, HeaderValue); 2] {
    [
        (
            HeaderName::from_static("x-ratelimit-remaining"),
            HeaderValue::from(decision.remaining),
        ),
        (
            HeaderName::from_static("x-ratelimit-limit"),
            HeaderValue::from(decision.limit),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_require_tos() {
        assert!(require_tos(&headers(&[("x-tos-accepted", "true")])).is_ok());
        assert!(require_tos(&headers(&[("x-tos-accepted", "yes")])).is_err());
        assert!(require_tos(&HeaderMap::new()).is_err());
    }

    #[test]
    fn test_require_password() {
        assert!(require_password(&HeaderMap::new(), None).is_ok());
        assert!(require_password(&HeaderMap::new(), Some("")).is_ok());
        assert!(require_password(&HeaderMap::new(), Some("s3cret")).is_err());
        assert!(require_password(
            &headers(&[("x-deployment-password", "s3cret")]),
            Some("s3cret")
        )
        .is_ok());
        assert!(require_password(
            &headers(&[("x-deployment-password", "s3cre")]),
            Some("s3cret")
        )
        .is_err());
    }

    #[test]
    fn test_parse_json_body() {
        assert!(parse_json_body(&Bytes::from_static(b"{\"a\":1}")).is_ok());
        assert!(matches!(
            parse_json_body(&Bytes::from_static(b"{oops")),
            Err(ApiError::InvalidJson)
        ));
    }
}
