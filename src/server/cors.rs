//! CORS headers and preflight handling

use super::AppState;
use axum::extract::{Request, State};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Once;

const ALLOWED_HEADERS: &str = "Content-Type, X-TOS-Accepted, X-Deployment-Password";

static OPEN_ORIGIN_WARNING: Once = Once::new();

/// Log a single warning per process when CORS is open to every origin
pub fn warn_if_open(allowed_origin: Option<&str>) {
    if allowed_origin.map_or(true, str::is_empty) {
        OPEN_ORIGIN_WARNING.call_once(|| {
            tracing::warn!(
                "ALLOWED_ORIGIN is not set, CORS is open to all origins. Set ALLOWED_ORIGIN in production."
            );
        });
    }
}

fn methods_for(path: &str) -> &'static str {
    if path == "/api/info" {
        "GET, OPTIONS"
    } else {
        "POST, OPTIONS"
    }
}

/// Middleware adding CORS headers to every response
pub async fn apply_cors(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let methods = methods_for(request.uri().path());
    let mut response = next.run(request).await;

    let origin = state
        .config
        .server
        .allowed_origin
        .as_deref()
        .filter(|o| !o.is_empty())
        .unwrap_or("*");

    let headers = response.headers_mut();
    match HeaderValue::from_str(origin) {
        Ok(value) => {
            headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, value);
        }
        Err(_) => tracing::warn!("Configured origin is not a valid header value: {}", origin),
    }
    headers.insert(ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(methods));
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOWED_HEADERS),
    );
    response
}

/// `OPTIONS` handler: an empty 204
pub async fn preflight() -> StatusCode {
    StatusCode::NO_CONTENT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_methods_for() {
        assert_eq!(methods_for("/api/info"), "GET, OPTIONS");
        assert_eq!(methods_for("/api/chat"), "POST, OPTIONS");
        assert_eq!(methods_for("/api/upscale"), "POST, OPTIONS");
    }
}
