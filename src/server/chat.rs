//! `POST /api/chat`

use super::error::ApiError;
use super::guards::{self, RouteKind};
use super::AppState;
use crate::config::RequestLimits;
use crate::types::{ChatMessage, Role, WebSearchMode};
use crate::validation::{
    clamp_max_tokens, is_non_empty_string, is_positive_integer, is_valid_data_url,
    ALLOWED_IMAGE_MIME_TYPES,
};
use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use serde_json::{json, Value};
use std::net::SocketAddr;

/// A validated chat request, ready to forward
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    /// Requested model, checked against the catalog separately
    pub model: Option<String>,
    /// Conversation, oldest first
    pub messages: Vec<ChatMessage>,
    /// Stream the reply as server-sent events
    pub stream: bool,
    /// Completion budget, already clamped
    pub max_tokens: u32,
    /// Sampling temperature
    pub temperature: f64,
    /// Web search mode
    pub web_search: WebSearchMode,
    /// Image attached to the last user message
    pub image_data_url: Option<String>,
    /// Trimmed system prompt, if one within the length limit was sent
    pub system_prompt: Option<String>,
}

/// Validate a chat request body
///
/// Checks run in a fixed order and the first failure is returned, so a
/// client always sees the same error for the same payload.
///
/// # Errors
///
/// Returns `ApiError::BadRequest` describing the first invalid field.
pub fn validate_chat_request(body: &Value, limits: &RequestLimits) -> Result<ChatRequest, ApiError> {
    let raw_messages = body
        .get("messages")
        .and_then(Value::as_array)
        .filter(|m| !m.is_empty())
        .ok_or_else(|| ApiError::bad_request("Messages array is required"))?;

    if raw_messages.len() > limits.max_messages {
        tracing::warn!("Too many messages in request: {}", raw_messages.len());
        return Err(ApiError::bad_request_with(
            "Too many messages in request",
            json!({ "limit": limits.max_messages }),
        ));
    }

    if raw_messages.iter().any(|m| !m.is_object()) {
        return Err(ApiError::bad_request("Invalid message payload"));
    }

    let mut messages = Vec::with_capacity(raw_messages.len());
    let mut roles = Vec::with_capacity(raw_messages.len());
    for message in raw_messages {
        match message
            .get("role")
            .and_then(Value::as_str)
            .and_then(|r| r.parse::<Role>().ok())
        {
            Some(role) => roles.push(role),
            None => {
                return Err(ApiError::bad_request_with(
                    "Invalid message role",
                    json!({ "allowed_roles": Role::ALLOWED }),
                ))
            }
        }
    }

    for (message, role) in raw_messages.iter().zip(roles) {
        let content = message.get("content").unwrap_or(&Value::Null);
        if !is_non_empty_string(content) {
            return Err(ApiError::bad_request("Message content is required"));
        }
        messages.push(ChatMessage {
            role,
            content: content.as_str().unwrap_or_default().to_string(),
        });
    }

    if messages
        .iter()
        .any(|m| m.content.chars().count() > limits.max_message_length)
    {
        return Err(ApiError::bad_request_with(
            "Message content is too long",
            json!({ "limit": limits.max_message_length }),
        ));
    }

    let web_search = match body.get("enable_web_search") {
        None => WebSearchMode::default(),
        Some(value) => value
            .as_str()
            .and_then(|s| s.parse::<WebSearchMode>().ok())
            .ok_or_else(|| {
                ApiError::bad_request_with(
                    "Invalid web search mode",
                    json!({ "allowed_values": WebSearchMode::ALLOWED }),
                )
            })?,
    };

    let temperature = match body.get("temperature") {
        None => limits.default_temperature,
        Some(value) => {
            let t = value
                .as_f64()
                .ok_or_else(|| ApiError::bad_request("Temperature must be a number"))?;
            if !(0.0..=2.0).contains(&t) {
                return Err(ApiError::bad_request("Temperature must be between 0 and 2"));
            }
            t
        }
    };

    if let Some(value) = body.get("max_tokens") {
        if !is_positive_integer(value) {
            return Err(ApiError::bad_request("max_tokens must be a positive integer"));
        }
    }
    let max_tokens = clamp_max_tokens(
        body.get("max_tokens"),
        limits.default_max_tokens,
        limits.max_tokens_ceiling(),
    );

    let image_data_url = match body.get("image_data_url") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.is_empty() => None,
        Some(Value::String(s)) if is_valid_data_url(s, &ALLOWED_IMAGE_MIME_TYPES) => {
            Some(s.clone())
        }
        Some(_) => return Err(ApiError::bad_request("Invalid image data URL")),
    };

    let system_prompt = body
        .get("system_prompt")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|p| !p.is_empty() && p.chars().count() <= limits.max_system_prompt_length)
        .map(str::to_string);

    Ok(ChatRequest {
        model: body
            .get("model")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .map(str::to_string),
        messages,
        stream: body.get("stream") != Some(&Value::Bool(false)),
        max_tokens,
        temperature,
        web_search,
        image_data_url,
        system_prompt,
    })
}

/// Build the provider request body
///
/// The system prompt is prepended and an attached image is appended to the
/// last message as multipart content when that message is from the user.
pub fn build_upstream_body(model: &str, request: &ChatRequest) -> Value {
    let last = request.messages.len().saturating_sub(1);
    let mut messages: Vec<Value> = Vec::with_capacity(request.messages.len() + 1);

    if let Some(prompt) = &request.system_prompt {
        messages.push(json!({ "role": Role::System, "content": prompt }));
    }

    for (index, message) in request.messages.iter().enumerate() {
        let content = match &request.image_data_url {
            Some(url) if index == last && message.role == Role::User => {
                let trimmed = message.content.trim();
                let text = if trimmed.is_empty() { " " } else { trimmed };
                json!([
                    { "type": "text", "text": text },
                    { "type": "image_url", "image_url": { "url": url } },
                ])
            }
            _ => Value::String(message.content.clone()),
        };
        messages.push(json!({ "role": message.role, "content": content }));
    }

    json!({
        "model": model,
        "messages": messages,
        "max_tokens": request.max_tokens,
        "temperature": request.temperature,
        "stream": request.stream,
        "venice_parameters": {
            "enable_web_search": request.web_search,
            "enable_web_citations": true,
            "include_search_results_in_stream": true,
        },
    })
}

/// Handle `POST /api/chat`
pub async fn handle_chat(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let peer_ip = peer.map(|ConnectInfo(addr)| addr.ip());
    let decision = guards::admit(&state, RouteKind::Chat, &headers, peer_ip)?;
    let body = guards::parse_json_body(&body)?;
    let request = validate_chat_request(&body, &state.config.limits)?;
    guards::require_api_key(&state)?;

    let catalog = state.catalog.text_models().await;
    let model = match request.model.as_deref() {
        Some(model) if catalog.is_allowed(model) => model.to_string(),
        _ => {
            return Err(ApiError::bad_request_with(
                "Invalid or disallowed model",
                json!({ "allowed_models": catalog.allowed_models }),
            ))
        }
    };

    if request.image_data_url.is_some() && !catalog.capabilities(&model).supports_vision {
        return Err(ApiError::bad_request_with(
            "Selected model does not support vision",
            json!({ "message": "Switch to a vision-capable model to analyze images" }),
        ));
    }

    tracing::debug!(
        "Forwarding chat: model={} messages={} stream={} client={}",
        model,
        request.messages.len(),
        request.stream,
        decision.client_id
    );

    let upstream_body = build_upstream_body(&model, &request);
    let response = state
        .upstream
        .chat_completions(&upstream_body)
        .await
        .map_err(|e| {
            tracing::error!("Failed to reach Venice API: {}", e);
            ApiError::BadGateway("Failed to reach Venice API".to_string())
        })?;

    let status = response.status().as_u16();
    if !response.status().is_success() {
        let text = response.text().await.unwrap_or_default();
        tracing::error!("Venice API error: {} {}", status, text);
        return Err(ApiError::UpstreamStatus {
            message: "Venice API error",
            status,
        });
    }

    let mut builder = Response::builder().status(StatusCode::OK);
    for (name, value) in guards::rate_limit_headers(&decision) {
        builder = builder.header(name, value);
    }

    let body = if request.stream {
        builder = builder
            .header(header::CONTENT_TYPE, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .header(header::CONNECTION, "keep-alive");
        Body::from_stream(response.bytes_stream())
    } else {
        builder = builder.header(header::CONTENT_TYPE, "application/json");
        let text = response.text().await.map_err(|e| {
            tracing::error!("Failed to read Venice response: {}", e);
            ApiError::BadGateway("Failed to reach Venice API".to_string())
        })?;
        Body::from(text)
    };

    builder.body(body).map_err(|e| {
        tracing::error!("Failed to build chat response: {}", e);
        ApiError::BadGateway("Failed to reach Venice API".to_string())
    })
}
