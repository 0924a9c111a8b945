//! `POST /api/image`

use super::error::ApiError;
use super::guards::{self, RouteKind};
use super::AppState;
use crate::config::{ModelPolicy, RequestLimits};
use crate::validation::parse_image_size;
use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::Json;
use bytes::Bytes;
use serde_json::{json, Value};
use std::net::SocketAddr;

/// Output formats accepted from clients; `jpg` is sent upstream as `jpeg`
pub const ALLOWED_FORMATS: [&str; 4] = ["png", "jpeg", "jpg", "webp"];

const DEFAULT_SIZE: &str = "1024x1024";
const DEFAULT_FORMAT: &str = "png";

/// A validated image generation request
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRequest {
    /// Trimmed prompt
    pub prompt: String,
    /// Image model from the allow-list
    pub model: String,
    /// `WIDTHxHEIGHT` exactly as sent
    pub size: String,
    /// Normalized output format (`png`, `jpeg` or `webp`)
    pub format: String,
}

fn string_field<'a>(body: &'a Value, key: &str) -> Option<&'a str> {
    body.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Validate an image generation body
///
/// # Errors
///
/// Returns `ApiError::BadRequest` for the first invalid field.
pub fn validate_image_request(
    body: &Value,
    policy: &ModelPolicy,
    limits: &RequestLimits,
) -> Result<ImageRequest, ApiError> {
    let prompt = string_field(body, "prompt").unwrap_or("").trim();
    if prompt.is_empty() {
        return Err(ApiError::bad_request("Prompt is required"));
    }
    if prompt.chars().count() > limits.max_message_length {
        return Err(ApiError::bad_request_with(
            "Prompt is too long",
            json!({ "limit": limits.max_message_length }),
        ));
    }

    let model = string_field(body, "model").unwrap_or(policy.default_image_model.as_str());
    if !policy.image_models.iter().any(|m| m == model) {
        return Err(ApiError::bad_request_with(
            "Invalid image model",
            json!({ "allowed_models": policy.image_models }),
        ));
    }

    let size = string_field(body, "size").unwrap_or(DEFAULT_SIZE);
    let (width, height) =
        parse_image_size(size).ok_or_else(|| ApiError::bad_request("Invalid image size format"))?;
    let bounds = u64::from(limits.min_image_dimension)..=u64::from(limits.max_image_dimension);
    if !bounds.contains(&width) || !bounds.contains(&height) {
        return Err(ApiError::bad_request_with(
            "Image dimensions out of bounds",
            json!({
                "min": limits.min_image_dimension,
                "max": limits.max_image_dimension,
            }),
        ));
    }

    let requested = string_field(body, "format")
        .unwrap_or(DEFAULT_FORMAT)
        .to_lowercase();
    if !ALLOWED_FORMATS.contains(&requested.as_str()) {
        return Err(ApiError::bad_request_with(
            "Invalid image format",
            json!({ "allowed_formats": ALLOWED_FORMATS }),
        ));
    }
    let format = if requested == "jpg" {
        "jpeg".to_string()
    } else {
        requested
    };

    Ok(ImageRequest {
        prompt: prompt.to_string(),
        model: model.to_string(),
        size: size.to_string(),
        format,
    })
}

/// Handle `POST /api/image`
pub async fn handle_image(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let peer_ip = peer.map(|ConnectInfo(addr)| addr.ip());
    guards::admit(&state, RouteKind::Image, &headers, peer_ip)?;
    let body = guards::parse_json_body(&body)?;
    let request = validate_image_request(&body, &state.config.models, &state.config.limits)?;
    guards::require_api_key(&state)?;

    tracing::debug!(
        "Generating image: model={} size={} format={}",
        request.model,
        request.size,
        request.format
    );

    let upstream_failure = |e: &dyn std::fmt::Display| {
        tracing::error!("Failed to reach Venice image API: {}", e);
        ApiError::BadGateway("Failed to reach Venice image API".to_string())
    };

    let response = state
        .upstream
        .generate_image(&json!({
            "prompt": request.prompt,
            "model": request.model,
            "size": request.size,
            "output_format": request.format,
            "response_format": "b64_json",
            "n": 1,
            "moderation": "auto",
        }))
        .await
        .map_err(|e| upstream_failure(&e))?;

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        tracing::error!("Venice image API error: {} {}", status, text);
        return Err(ApiError::UpstreamStatus {
            message: "Venice image API error",
            status,
        });
    }

    let payload: Value = response.json().await.map_err(|e| upstream_failure(&e))?;
    let image_base64 = payload
        .pointer("/data/0/b64_json")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::BadGateway("No image data returned".to_string()))?;

    let mime = format!("image/{}", request.format);
    Ok(Json(json!({
        "image_data_url": format!("data:{};base64,{}", mime, image_base64),
        "mime": mime,
    })))
}
