//! `POST /api/upscale`

use super::error::ApiError;
use super::guards::{self, RouteKind};
use super::AppState;
use crate::validation::{is_valid_data_url, parse_image_scale, ALLOWED_IMAGE_MIME_TYPES};
use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::Json;
use base64::Engine;
use bytes::Bytes;
use serde_json::{json, Value};
use std::net::SocketAddr;

/// Largest accepted upscale factor
pub const MAX_UPSCALE_SCALE: f64 = 4.0;

const DEFAULT_SCALE: f64 = 2.0;

/// A validated upscale request
#[derive(Debug, Clone, PartialEq)]
pub struct UpscaleRequest {
    /// Base64 payload of the source image
    pub image: String,
    /// Scale factor in `1..=4`
    pub scale: f64,
    /// Ask the provider to enhance details
    pub enhance: bool,
}

/// Validate an upscale body
///
/// # Errors
///
/// Returns `ApiError::BadRequest` for the first invalid field.
pub fn validate_upscale_request(body: &Value) -> Result<UpscaleRequest, ApiError> {
    let data_url = body
        .get("image_data_url")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::bad_request("image_data_url is required"))?;

    if !is_valid_data_url(data_url, &ALLOWED_IMAGE_MIME_TYPES) {
        return Err(ApiError::bad_request("Invalid image data URL"));
    }

    let scale = parse_image_scale(body.get("scale"), DEFAULT_SCALE);
    if !(1.0..=MAX_UPSCALE_SCALE).contains(&scale) {
        return Err(ApiError::bad_request_with(
            "Invalid upscale scale",
            json!({ "allowed_range": [1, MAX_UPSCALE_SCALE as u32] }),
        ));
    }

    let image = data_url
        .split(',')
        .nth(1)
        .filter(|b| !b.is_empty())
        .ok_or_else(|| ApiError::bad_request("Invalid image data"))?;

    Ok(UpscaleRequest {
        image: image.to_string(),
        scale,
        enhance: body.get("enhance").and_then(Value::as_bool).unwrap_or(true),
    })
}

/// Handle `POST /api/upscale`
pub async fn handle_upscale(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let peer_ip = peer.map(|ConnectInfo(addr)| addr.ip());
    guards::admit(&state, RouteKind::Upscale, &headers, peer_ip)?;
    let body = guards::parse_json_body(&body)?;
    let request = validate_upscale_request(&body)?;
    guards::require_api_key(&state)?;

    tracing::debug!(
        "Upscaling image: scale={} enhance={} bytes={}",
        request.scale,
        request.enhance,
        request.image.len()
    );

    let upstream_failure = |e: &dyn std::fmt::Display| {
        tracing::error!("Failed to reach Venice upscale API: {}", e);
        ApiError::BadGateway("Failed to reach Venice upscale API".to_string())
    };

    let response = state
        .upstream
        .upscale(&json!({
            "image": request.image,
            "scale": request.scale,
            "enhance": request.enhance,
        }))
        .await
        .map_err(|e| upstream_failure(&e))?;

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        tracing::error!("Venice upscale API error: {} {}", status, text);
        return Err(ApiError::UpstreamStatus {
            message: "Venice upscale API error",
            status,
        });
    }

    let mime = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or("image/png")
        .to_string();
    let bytes = response.bytes().await.map_err(|e| upstream_failure(&e))?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);

    Ok(Json(json!({
        "image_data_url": format!("data:{};base64,{}", mime, encoded),
        "mime": mime,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let request =
            validate_upscale_request(&json!({"image_data_url": "data:image/png;base64,AAAA"}))
                .unwrap();
        assert_eq!(request.image, "AAAA");
        assert_eq!(request.scale, 2.0);
        assert!(request.enhance);
    }

    #[test]
    fn test_scale_from_string_and_enhance_flag() {
        let request = validate_upscale_request(&json!({
            "image_data_url": "data:image/webp;base64,AAAA",
            "scale": "4",
            "enhance": false
        }))
        .unwrap();
        assert_eq!(request.scale, 4.0);
        assert!(!request.enhance);
    }

    #[test]
    fn test_rejections() {
        let err = |body: Value| validate_upscale_request(&body).unwrap_err().body();
        assert_eq!(err(json!({}))["error"], "image_data_url is required");
        assert_eq!(
            err(json!({"image_data_url": "data:image/gif;base64,AAAA"}))["error"],
            "Invalid image data URL"
        );
        let body = err(json!({"image_data_url": "data:image/png;base64,AAAA", "scale": 8}));
        assert_eq!(body["error"], "Invalid upscale scale");
        assert_eq!(body["allowed_range"], json!([1, 4]));
        assert_eq!(
            err(json!({"image_data_url": "data:image/png;base64,"}))["error"],
            "Invalid image data"
        );
    }
}
