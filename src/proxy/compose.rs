//! Request composition and the outbound upstream call.

use axum::http::header;
use reqwest::Client;

use super::types::{ChatMessage, ChatRequest, UpstreamRequest};
use crate::config::UpstreamConfig;
use crate::error::{Error, Result};

/// Build the ordered message list sent upstream.
///
/// The system instruction (when present) comes first, history follows
/// unmodified in the order given, and the new user message is last.
/// No trimming or token accounting is done here.
pub fn compose_messages(system_prompt: Option<&str>, request: &ChatRequest) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(request.conversation_history.len() + 2);

    if let Some(prompt) = system_prompt {
        messages.push(ChatMessage::system(prompt));
    }
    messages.extend(request.conversation_history.iter().cloned());
    messages.push(ChatMessage::user(request.message.clone()));

    messages
}

/// Client for the upstream chat-completions endpoint.
///
/// Borrows the shared connection pool and the read-only upstream config;
/// holds no per-request state.
pub struct UpstreamClient<'a> {
    http_client: &'a Client,
    config: &'a UpstreamConfig,
}

impl<'a> UpstreamClient<'a> {
    pub fn new(http_client: &'a Client, config: &'a UpstreamConfig) -> Self {
        Self {
            http_client,
            config,
        }
    }

    /// Streaming request body for a validated chat request.
    pub fn build_request(&self, request: &ChatRequest) -> UpstreamRequest {
        UpstreamRequest {
            model: self.config.model.clone(),
            messages: compose_messages(self.config.system_prompt(), request),
            stream: true,
        }
    }

    /// POST the request and return the response once its status is known good.
    ///
    /// Fails with [`Error::MissingApiKey`] before any network activity when no
    /// credential is configured. A non-success status is logged with the
    /// upstream body and reported as [`Error::UpstreamStatus`].
    pub async fn send(&self, body: &UpstreamRequest) -> Result<reqwest::Response> {
        let api_key = self
            .config
            .api_key
            .as_ref()
            .filter(|key| !key.expose_secret().is_empty())
            .ok_or(Error::MissingApiKey)?;

        let url = self.config.completions_url();
        let response = self
            .http_client
            .post(&url)
            .header(
                header::AUTHORIZATION,
                format!("Bearer {}", api_key.expose_secret()),
            )
            .header(header::CONTENT_TYPE, "application/json")
            .header("HTTP-Referer", &self.config.referer)
            .header("X-Title", &self.config.title)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, url = %url, "Failed to reach upstream");
                Error::Upstream(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            tracing::error!(
                status = %status,
                body = %error_body,
                "Upstream returned error"
            );
            return Err(Error::UpstreamStatus { status });
        }

        Ok(response)
    }
}
