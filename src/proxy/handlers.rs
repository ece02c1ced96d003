//! HTTP request handlers.

use axum::{
    extract::{rejection::JsonRejection, Extension, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use super::compose::UpstreamClient;
use super::server::{AppState, RequestId};
use super::stream::spawn_relay;
use super::types::ChatRequest;
use crate::error::Error;

/// Handle POST /api/chat
///
/// Validates the body, forwards the composed conversation upstream and
/// relays the streamed reply as `text/event-stream`. Every failure before
/// streaming starts is returned as `{ "error": ... }` with no frames sent.
pub async fn chat(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, Error> {
    let Json(request) = payload.map_err(|rejection| {
        tracing::warn!(
            request_id = %request_id.0,
            error = %rejection.body_text(),
            "Rejected chat request body"
        );
        Error::BadRequest(rejection.body_text())
    })?;

    if let Err(e) = request.validate() {
        tracing::warn!(request_id = %request_id.0, error = %e, "Invalid chat request");
        return Err(e);
    }

    tracing::info!(
        request_id = %request_id.0,
        history_len = request.conversation_history.len(),
        message_len = request.message.len(),
        "Received chat request"
    );

    let upstream = UpstreamClient::new(&state.http_client, &state.config.upstream);
    let body = upstream.build_request(&request);
    let upstream_response = upstream.send(&body).await.map_err(|e| {
        tracing::warn!(request_id = %request_id.0, error = %e, "Chat request rejected");
        e
    })?;

    tracing::debug!(request_id = %request_id.0, "Upstream accepted, streaming");

    let body = spawn_relay(upstream_response.bytes_stream(), request_id.0.to_string());

    let mut response = (StatusCode::OK, body).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));

    Ok(response)
}

/// Handle GET /health
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "chatrelay",
        "upstream_configured": state
            .config
            .upstream
            .api_key
            .as_ref()
            .is_some_and(|key| !key.expose_secret().is_empty()),
    }))
}
