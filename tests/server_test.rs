//! Integration tests for the proxy routes
//!
//! The router is driven with `tower::ServiceExt::oneshot` and the Venice API
//! is replaced by a wiremock server. The model listing is left unmocked in
//! most tests, so the catalog falls back to the configured model list.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{config_for, json_body, post_json, send, sse, state_for};
use openchat::client::{ChatClient, OutgoingChat};
use openchat::config::ClientConfig;
use openchat::server::router;
use openchat::streaming::NoopCallbacks;
use openchat::types::{ChatMessage, Role};
use serde_json::json;
use std::net::SocketAddr;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn chat_body() -> serde_json::Value {
    json!({
        "model": "zai-org-glm-5",
        "messages": [{"role": "user", "content": "Hello"}],
    })
}

#[tokio::test]
async fn test_chat_requires_tos_header() {
    let upstream = MockServer::start().await;
    let state = state_for(config_for(&upstream));

    let request = Request::post("/api/chat")
        .header("content-type", "application/json")
        .body(Body::from(chat_body().to_string()))
        .unwrap();
    let response = send(&state, request).await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "*",
        "errors carry CORS headers too"
    );
    let body = json_body(response).await;
    assert_eq!(body["error"], "Terms of Service not accepted");
}

#[tokio::test]
async fn test_chat_checks_deployment_password() {
    let upstream = MockServer::start().await;
    let mut config = config_for(&upstream);
    config.server.deployment_password = Some("letmein".to_string());
    let state = state_for(config);

    let response = send(&state, post_json("/api/chat", &chat_body())).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["error"], "Invalid deployment password");
}

#[tokio::test]
async fn test_chat_rejects_invalid_json() {
    let upstream = MockServer::start().await;
    let state = state_for(config_for(&upstream));

    let request = Request::post("/api/chat")
        .header("x-tos-accepted", "true")
        .body(Body::from("{not json"))
        .unwrap();
    let response = send(&state, request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "Invalid JSON body");
}

#[tokio::test]
async fn test_chat_missing_api_key_is_server_error() {
    let upstream = MockServer::start().await;
    let mut config = config_for(&upstream);
    config.upstream.api_key = None;
    let state = state_for(config);

    let response = send(&state, post_json("/api/chat", &chat_body())).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        json_body(response).await["message"],
        "Venice API key not configured"
    );
}

#[tokio::test]
async fn test_chat_rejects_disallowed_model() {
    let upstream = MockServer::start().await;
    let state = state_for(config_for(&upstream));

    let body = json!({
        "model": "gpt-unknown",
        "messages": [{"role": "user", "content": "Hello"}],
    });
    let response = send(&state, post_json("/api/chat", &body)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"], "Invalid or disallowed model");
    assert!(body["allowed_models"]
        .as_array()
        .unwrap()
        .contains(&json!("zai-org-glm-5")));
}

#[tokio::test]
async fn test_chat_rejects_image_for_non_vision_model() {
    let upstream = MockServer::start().await;
    let state = state_for(config_for(&upstream));

    let body = json!({
        "model": "llama-3.3-70b",
        "messages": [{"role": "user", "content": "What is this?"}],
        "image_data_url": "data:image/png;base64,AAAA",
    });
    let response = send(&state, post_json("/api/chat", &body)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        json_body(response).await["error"],
        "Selected model does not support vision"
    );
}

#[tokio::test]
async fn test_chat_non_streaming_forwards_and_returns_json() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "model": "zai-org-glm-5",
            "stream": false,
            "max_tokens": 4096,
            "venice_parameters": {
                "enable_web_search": "off",
                "enable_web_citations": true,
                "include_search_results_in_stream": true,
            },
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "Hi!"}}],
        })))
        .expect(1)
        .mount(&upstream)
        .await;

    let state = state_for(config_for(&upstream));
    let body = json!({
        "model": "zai-org-glm-5",
        "messages": [{"role": "user", "content": "Hello"}],
        "stream": false,
        "max_tokens": 100000,
        "enable_web_search": "off",
    });
    let response = send(&state, post_json("/api/chat", &body)).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-ratelimit-limit"], "20");
    assert_eq!(response.headers()["x-ratelimit-remaining"], "19");
    let body = json_body(response).await;
    assert_eq!(body["choices"][0]["message"]["content"], "Hi!");
}

#[tokio::test]
async fn test_chat_passes_upstream_status_through() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(402).set_body_string("insufficient balance"))
        .mount(&upstream)
        .await;

    let state = state_for(config_for(&upstream));
    let response = send(&state, post_json("/api/chat", &chat_body())).await;
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    let body = json_body(response).await;
    assert_eq!(body["error"], "Venice API error");
    assert_eq!(body["status"], 402);
}

#[tokio::test]
async fn test_chat_unreachable_upstream_is_bad_gateway() {
    let upstream = MockServer::start().await;
    let mut config = config_for(&upstream);
    config.upstream.base_url = "http://127.0.0.1:9/api/v1".to_string();
    let state = state_for(config);

    let response = send(&state, post_json("/api/chat", &chat_body())).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(json_body(response).await["error"], "Failed to reach Venice API");
}

#[tokio::test]
async fn test_image_rate_limit_returns_retry_after() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/images/generations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"b64_json": "aGk="}],
        })))
        .mount(&upstream)
        .await;

    let mut config = config_for(&upstream);
    config.rate_limit.image_requests = 1;
    let state = state_for(config);
    let body = json!({"prompt": "a red fox", "format": "jpg"});

    let first = send(&state, post_json("/api/image", &body)).await;
    assert_eq!(first.status(), StatusCode::OK);
    let payload = json_body(first).await;
    assert_eq!(payload["mime"], "image/jpeg");
    assert_eq!(payload["image_data_url"], "data:image/jpeg;base64,aGk=");

    let second = send(&state, post_json("/api/image", &body)).await;
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = second.headers()["retry-after"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after > 0 && retry_after <= 3600);
    let payload = json_body(second).await;
    assert_eq!(payload["error"], "Image generation rate limit exceeded");
    assert_eq!(payload["limit"], 1);

    // The chat bucket is independent of the image bucket.
    let chat = send(&state, post_json("/api/chat", &json!({}))).await;
    assert_eq!(chat.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_image_without_data_is_bad_gateway() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/images/generations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .mount(&upstream)
        .await;

    let state = state_for(config_for(&upstream));
    let response = send(&state, post_json("/api/image", &json!({"prompt": "x"}))).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(json_body(response).await["error"], "No image data returned");
}

#[tokio::test]
async fn test_upscale_wraps_binary_reply() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/image/upscale"))
        .and(body_partial_json(json!({"image": "AAAA", "scale": 4.0, "enhance": true})))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/webp")
                .set_body_bytes(b"hi".to_vec()),
        )
        .expect(1)
        .mount(&upstream)
        .await;

    let state = state_for(config_for(&upstream));
    let body = json!({"image_data_url": "data:image/png;base64,AAAA", "scale": "4"});
    let response = send(&state, post_json("/api/upscale", &body)).await;

    assert_eq!(response.status(), StatusCode::OK);
    let payload = json_body(response).await;
    assert_eq!(payload["mime"], "image/webp");
    assert_eq!(payload["image_data_url"], "data:image/webp;base64,aGk=");
}

#[tokio::test]
async fn test_info_reports_filtered_catalog() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/models"))
        .and(query_param("type", "text"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {"id": "zai-org-glm-5", "type": "text", "model_spec": {
                    "pricing": {"input": {"usd": 9.0}, "output": {"usd": 9.0}}
                }},
                {"id": "cheap-model", "type": "text", "model_spec": {
                    "pricing": {"input": {"usd": 0.5}, "output": {"usd": 1.0}},
                    "capabilities": {"supportsVision": true}
                }},
                {"id": "pricey-model", "type": "text", "model_spec": {
                    "name": "Pricey",
                    "pricing": {"input": {"usd": 10.0}, "output": {"usd": 30.0}}
                }},
            ],
        })))
        .mount(&upstream)
        .await;

    let mut config = config_for(&upstream);
    config.server.deployment_password = Some("pw".to_string());
    let state = state_for(config);

    let request = Request::get("/api/info").body(Body::empty()).unwrap();
    let response = send(&state, request).await;
    assert_eq!(response.status(), StatusCode::OK);

    let info = json_body(response).await;
    assert_eq!(info["name"], "OpenChat");
    assert_eq!(info["models"], json!(["zai-org-glm-5", "cheap-model"]));
    assert_eq!(info["model_capabilities"]["cheap-model"]["supportsVision"], true);
    assert_eq!(info["pricing_filter"]["blocked_models"][0]["id"], "pricey-model");
    assert_eq!(info["pricing_filter"]["blocked_models"][0]["name"], "Pricey");
    assert_eq!(info["rate_limit"]["requests"], 20);
    assert_eq!(info["rate_limit"]["window"], "1 hour");
    assert_eq!(info["password_required"], true);
    assert!(info["image_models"]
        .as_array()
        .unwrap()
        .contains(&json!("nano-banana-pro")));
}

#[tokio::test]
async fn test_preflight_returns_no_content_with_cors() {
    let upstream = MockServer::start().await;
    let mut config = config_for(&upstream);
    config.server.allowed_origin = Some("https://chat.example.com".to_string());
    let state = state_for(config);

    let request = Request::options("/api/info").body(Body::empty()).unwrap();
    let response = send(&state, request).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let headers = response.headers();
    assert_eq!(
        headers["access-control-allow-origin"],
        "https://chat.example.com"
    );
    assert_eq!(headers["access-control-allow-methods"], "GET, OPTIONS");
    assert_eq!(
        headers["access-control-allow-headers"],
        "Content-Type, X-TOS-Accepted, X-Deployment-Password"
    );

    let request = Request::options("/api/chat").body(Body::empty()).unwrap();
    let response = send(&state, request).await;
    assert_eq!(response.headers()["access-control-allow-methods"], "POST, OPTIONS");
}

#[tokio::test]
async fn test_rejected_posts_carry_full_cors_headers() {
    let upstream = MockServer::start().await;
    let mut config = config_for(&upstream);
    config.server.allowed_origin = Some("https://chat.example.com".to_string());
    config.server.deployment_password = Some("letmein".to_string());
    let state = state_for(config);

    let body = json!({"prompt": "a fox", "size": "99999999999x64"});
    let mut request = post_json("/api/image", &body);
    request
        .headers_mut()
        .insert("x-deployment-password", "letmein".parse().unwrap());
    let response = send(&state, request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let headers = response.headers();
    assert_eq!(
        headers["access-control-allow-origin"],
        "https://chat.example.com"
    );
    assert_eq!(headers["access-control-allow-methods"], "POST, OPTIONS");
    assert_eq!(
        headers["access-control-allow-headers"],
        "Content-Type, X-TOS-Accepted, X-Deployment-Password"
    );
    assert_eq!(
        json_body(response).await["error"],
        "Image dimensions out of bounds"
    );

    let response = send(&state, post_json("/api/chat", &chat_body())).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let headers = response.headers();
    assert_eq!(
        headers["access-control-allow-origin"],
        "https://chat.example.com"
    );
    assert_eq!(headers["access-control-allow-methods"], "POST, OPTIONS");
    assert!(headers.contains_key("access-control-allow-headers"));
}

/// Full path: client -> proxy over TCP -> mock provider, streamed back
#[tokio::test]
async fn test_streamed_reply_through_running_proxy() {
    let upstream = MockServer::start().await;
    let events = sse(&[
        r#"{"choices":[{"delta":{"content":"Rust "}}]}"#,
        r#"{"venice_parameters":{"web_search_citations":[{"url":"https://www.rust-lang.org","title":"Rust"}]}}"#,
        r#"{"choices":[{"delta":{"content":"is fast [REF]0[/REF]"}}]}"#,
        "[DONE]",
    ]);
    Mock::given(method("POST"))
        .and(path("/api/v1/chat/completions"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(events),
        )
        .mount(&upstream)
        .await;

    let state = state_for(config_for(&upstream));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        axum::serve(
            listener,
            router(state).into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
    });

    let client = ChatClient::new(
        &ClientConfig {
            server_url: format!("http://{}", addr),
            ..Default::default()
        },
        None,
    )
    .unwrap();
    let chat = OutgoingChat {
        model: "zai-org-glm-5".to_string(),
        messages: vec![ChatMessage::new(Role::User, "Is Rust fast?")],
        web_search: true,
        ..Default::default()
    };
    let result = client
        .send_chat(&chat, &mut NoopCallbacks, None)
        .await
        .unwrap();
    server.abort();

    assert_eq!(result.content, "Rust is fast [REF]0[/REF]");
    assert_eq!(
        result.citations["0"].url.as_deref(),
        Some("https://www.rust-lang.org")
    );
}
