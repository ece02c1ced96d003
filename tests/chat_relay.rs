//! Integration tests for POST /api/chat.
//!
//! Runs the real axum router via `tower::ServiceExt::oneshot` against a
//! wiremock server standing in for the upstream completions API.

use axum::body::Body;
use http::{Request, StatusCode};
use tower::ServiceExt;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use chatrelay::config::{ApiKey, Config, KeySource, RawConfig, UpstreamConfig};
use chatrelay::proxy::{create_router, AppState, UpstreamRequest, REQUEST_ID_HEADER};

const COMPLETIONS_PATH: &str = "/api/v1/chat/completions";
const TEST_KEY: &str = "sk-or-test-key";

/// Build an app whose upstream points at the mock server.
fn setup_app(
    server: &MockServer,
    api_key: Option<&str>,
    system_prompt: Option<&str>,
) -> axum::Router {
    setup_app_with_base_url(format!("{}/api/v1", server.uri()), api_key, system_prompt)
}

fn setup_app_with_base_url(
    base_url: String,
    api_key: Option<&str>,
    system_prompt: Option<&str>,
) -> axum::Router {
    let config = Config {
        upstream: UpstreamConfig {
            base_url,
            model: "test/model:free".to_string(),
            api_key: api_key.map(ApiKey::from),
            system_prompt: system_prompt.map(str::to_string),
            ..UpstreamConfig::default()
        },
        ..Config::default()
    };
    create_router(AppState::new(config).expect("build state"))
}

fn chat_request(body: serde_json::Value) -> Request<Body> {
    Request::post("/api/chat")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Upstream SSE body from event payloads (each framed as `data: ...\n\n`).
fn sse_body(events: &[&str]) -> String {
    events.iter().map(|e| format!("data: {}\n\n", e)).collect()
}

fn sse_response(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")
}

async fn read_body(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), 1_048_576)
        .await
        .expect("read body");
    String::from_utf8(bytes.to_vec()).expect("utf-8 body")
}

async fn read_json(response: axum::response::Response) -> serde_json::Value {
    serde_json::from_str(&read_body(response).await).expect("json body")
}

#[tokio::test]
async fn streams_delta_then_done() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(COMPLETIONS_PATH))
        .and(header("authorization", format!("Bearer {}", TEST_KEY).as_str()))
        .and(header("x-title", "JustAskIT"))
        .and(header("http-referer", "https://justaski-ai.replit.app"))
        .and(body_partial_json(serde_json::json!({
            "model": "test/model:free",
            "stream": true
        })))
        .respond_with(sse_response(sse_body(&[
            r#"{"choices":[{"delta":{"content":"Hi"}}]}"#,
            "[DONE]",
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let app = setup_app(&server, Some(TEST_KEY), None);
    let response = app
        .oneshot(chat_request(serde_json::json!({ "message": "hello" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers.get("content-type").unwrap(), "text/event-stream");
    assert_eq!(headers.get("cache-control").unwrap(), "no-cache");
    assert_eq!(headers.get("connection").unwrap(), "keep-alive");
    assert!(headers.get(REQUEST_ID_HEADER).is_some());

    assert_eq!(
        read_body(response).await,
        "data: {\"content\":\"Hi\"}\n\ndata: [DONE]\n\n"
    );
}

#[tokio::test]
async fn composes_system_prompt_history_and_message_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(COMPLETIONS_PATH))
        .respond_with(sse_response(sse_body(&["[DONE]"])))
        .expect(1)
        .mount(&server)
        .await;

    let app = setup_app(&server, Some(TEST_KEY), Some("You are terse."));
    let response = app
        .oneshot(chat_request(serde_json::json!({
            "message": "third",
            "conversationHistory": [
                { "role": "user", "content": "first" },
                { "role": "assistant", "content": "second" }
            ]
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    read_body(response).await;

    let received = server.received_requests().await.expect("recording enabled");
    assert_eq!(received.len(), 1);
    let upstream: UpstreamRequest = received[0].body_json().expect("upstream body");
    let sent: Vec<(String, String)> = upstream
        .messages
        .iter()
        .map(|m| {
            let role = serde_json::to_value(m.role).unwrap();
            (role.as_str().unwrap().to_string(), m.content.clone())
        })
        .collect();

    assert_eq!(
        sent,
        vec![
            ("system".to_string(), "You are terse.".to_string()),
            ("user".to_string(), "first".to_string()),
            ("assistant".to_string(), "second".to_string()),
            ("user".to_string(), "third".to_string()),
        ]
    );
    assert!(upstream.stream);
    assert_eq!(upstream.model, "test/model:free");
}

#[tokio::test]
async fn empty_message_rejected_without_upstream_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(sse_response(sse_body(&["[DONE]"])))
        .expect(0)
        .mount(&server)
        .await;

    let app = setup_app(&server, Some(TEST_KEY), None);
    let response = app
        .oneshot(chat_request(serde_json::json!({ "message": "" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = read_json(response).await;
    assert_eq!(json["error"], "Message is required");
}

#[tokio::test]
async fn malformed_bodies_rejected_with_400() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(sse_response(sse_body(&["[DONE]"])))
        .expect(0)
        .mount(&server)
        .await;

    let bodies = [
        serde_json::json!({}),
        serde_json::json!({ "message": 42 }),
        serde_json::json!({ "message": "hi", "conversationHistory": "nope" }),
        serde_json::json!({
            "message": "hi",
            "conversationHistory": [{ "role": "system", "content": "x" }]
        }),
        serde_json::json!({
            "message": "hi",
            "conversationHistory": [{ "role": "user" }]
        }),
    ];

    for body in bodies {
        let app = setup_app(&server, Some(TEST_KEY), None);
        let response = app.oneshot(chat_request(body.clone())).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body: {}", body);
        let json = read_json(response).await;
        assert!(json["error"].is_string(), "body: {}", body);
    }

    // Not JSON at all, and no content type
    let app = setup_app(&server, Some(TEST_KEY), None);
    let response = app
        .oneshot(
            Request::post("/api/chat")
                .body(Body::from("message=hi"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn missing_api_key_is_500_without_upstream_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(sse_response(sse_body(&["[DONE]"])))
        .expect(0)
        .mount(&server)
        .await;

    let app = setup_app(&server, None, None);
    let response = app
        .oneshot(chat_request(serde_json::json!({ "message": "hello" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = read_json(response).await;
    assert_eq!(json["error"], "Upstream API key not configured");
}

#[tokio::test]
async fn empty_expanded_api_key_is_500_without_upstream_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(sse_response(sse_body(&["[DONE]"])))
        .expect(0)
        .mount(&server)
        .await;

    let raw: RawConfig = toml::from_str(&format!(
        "[upstream]\nbase_url = \"{}/api/v1\"\napi_key = \"${{CHATRELAY_EMPTY_KEY}}\"\n",
        server.uri()
    ))
    .unwrap();
    let (config, source) = Config::from_raw_with(raw, |name| match name {
        "CHATRELAY_EMPTY_KEY" => Some(String::new()),
        _ => None,
    })
    .unwrap();
    assert_eq!(source, KeySource::None);

    let app = create_router(AppState::new(config).expect("build state"));
    let response = app
        .oneshot(chat_request(serde_json::json!({ "message": "hello" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = read_json(response).await;
    assert_eq!(json["error"], "Upstream API key not configured");
}

#[tokio::test]
async fn empty_literal_api_key_is_500_without_upstream_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(sse_response(sse_body(&["[DONE]"])))
        .expect(0)
        .mount(&server)
        .await;

    let app = setup_app(&server, Some(""), None);
    let response = app
        .oneshot(chat_request(serde_json::json!({ "message": "hello" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = read_json(response).await;
    assert_eq!(json["error"], "Upstream API key not configured");
}

#[tokio::test]
async fn upstream_error_status_is_passed_through_without_frames() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(COMPLETIONS_PATH))
        .respond_with(
            ResponseTemplate::new(429)
                .set_body_string(r#"{"error":{"message":"Rate limit exceeded: secret-account-42"}}"#),
        )
        .expect(1)
        .mount(&server)
        .await;

    let app = setup_app(&server, Some(TEST_KEY), None);
    let response = app
        .oneshot(chat_request(serde_json::json!({ "message": "hello" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_ne!(
        response.headers().get("content-type").unwrap(),
        "text/event-stream"
    );
    let body = read_body(response).await;
    assert!(!body.contains("data:"));
    assert!(!body.contains("secret-account-42"), "upstream detail leaked: {}", body);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["error"], "Failed to get response from AI service");
}

#[tokio::test]
async fn malformed_upstream_frame_does_not_end_stream() {
    let server = MockServer::start().await;
    let body = format!(
        ": OPENROUTER PROCESSING\n\n{}",
        sse_body(&[
            r#"{"choices":[{"delta":{"content":"Hello"}}]}"#,
            "{garbage",
            r#"{"choices":[{"delta":{"content":" there"}}]}"#,
            "[DONE]",
        ])
    );
    Mock::given(method("POST"))
        .and(path(COMPLETIONS_PATH))
        .respond_with(sse_response(body))
        .mount(&server)
        .await;

    let app = setup_app(&server, Some(TEST_KEY), None);
    let response = app
        .oneshot(chat_request(serde_json::json!({ "message": "hello" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        read_body(response).await,
        "data: {\"content\":\"Hello\"}\n\ndata: {\"content\":\" there\"}\n\ndata: [DONE]\n\n"
    );
}

#[tokio::test]
async fn repeated_requests_produce_independent_streams() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(COMPLETIONS_PATH))
        .respond_with(sse_response(sse_body(&[
            r#"{"choices":[{"delta":{"content":"same"}}]}"#,
            "[DONE]",
        ])))
        .expect(2)
        .mount(&server)
        .await;

    let app = setup_app(&server, Some(TEST_KEY), None);
    let request = serde_json::json!({ "message": "again" });

    let first = app.clone().oneshot(chat_request(request.clone())).await.unwrap();
    let second = app.oneshot(chat_request(request)).await.unwrap();

    let first_id = first.headers().get(REQUEST_ID_HEADER).cloned().unwrap();
    let second_id = second.headers().get(REQUEST_ID_HEADER).cloned().unwrap();
    assert_ne!(first_id, second_id);

    let expected = "data: {\"content\":\"same\"}\n\ndata: [DONE]\n\n";
    assert_eq!(read_body(first).await, expected);
    assert_eq!(read_body(second).await, expected);
}

#[tokio::test]
async fn unreachable_upstream_is_bad_gateway() {
    // Bind and release a port so nothing is listening on it.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let app = setup_app_with_base_url(format!("http://{}/api/v1", addr), Some(TEST_KEY), None);

    let response = app
        .oneshot(chat_request(serde_json::json!({ "message": "hello" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let json = read_json(response).await;
    assert_eq!(json["error"], "Failed to reach AI service");
}

#[tokio::test]
async fn health_reports_upstream_configuration() {
    let server = MockServer::start().await;

    for (key, configured) in [(Some(TEST_KEY), true), (Some(""), false), (None, false)] {
        let app = setup_app(&server, key, None);
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = read_json(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["upstream_configured"], configured);
    }
}
