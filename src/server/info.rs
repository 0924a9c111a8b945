//! `GET /api/info`

use super::error::ApiError;
use super::guards;
use super::AppState;
use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

/// Handle `GET /api/info`
///
/// Reports the model catalog, limits and deployment settings. The Terms of
/// Service header is not required here so clients can read the catalog
/// before the user accepts.
pub async fn handle_info(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    guards::require_api_key(&state)?;

    let (text_models, image_models) =
        futures::join!(state.catalog.text_models(), state.catalog.image_models());

    let config = &state.config;
    let password_required = config
        .server
        .deployment_password
        .as_deref()
        .is_some_and(|p| !p.is_empty());

    Ok(Json(json!({
        "name": "OpenChat",
        "version": env!("CARGO_PKG_VERSION"),
        "models": text_models.allowed_models,
        "image_models": image_models,
        "model_capabilities": text_models.model_capabilities,
        "rate_limit": {
            "requests": config.rate_limit.chat_requests,
            "window": config.rate_limit.window_label(),
            "per": "IP address",
        },
        "pricing_filter": {
            "max_input_price": config.models.max_input_price,
            "max_output_price": config.models.max_output_price,
            "blocked_models": text_models.blocked_models,
        },
        "endpoints": {
            "chat": "/api/chat",
            "info": "/api/info",
        },
        "usage": {
            "required_header": "X-TOS-Accepted: true",
            "tos_url": "/tos.html",
        },
        "password_required": password_required,
    })))
}
