//! Request, upstream and relay wire types.

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single message in conversational order.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Inbound body of `POST /api/chat`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub conversation_history: Vec<ChatMessage>,
}

impl ChatRequest {
    /// Check the constraints the type system does not.
    ///
    /// History may only replay user and assistant turns; the system
    /// instruction is owned by the server.
    pub fn validate(&self) -> Result<(), Error> {
        if self.message.is_empty() {
            return Err(Error::BadRequest("Message is required".to_string()));
        }

        if let Some(index) = self
            .conversation_history
            .iter()
            .position(|m| m.role == Role::System)
        {
            return Err(Error::BadRequest(format!(
                "conversationHistory[{}].role must be 'user' or 'assistant'",
                index
            )));
        }

        Ok(())
    }
}

/// Body sent to the upstream chat-completions endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
}

/// One upstream streaming chunk. Only the delta text is read.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

/// A streaming choice.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: Option<Delta>,
}

/// Delta content in a streaming chunk.
///
/// Kept as raw JSON: upstreams normally send a string, but any truthy
/// value is relayed as-is.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Delta {
    #[serde(default)]
    pub content: Option<serde_json::Value>,
}

impl ChatCompletionChunk {
    /// Value at `choices[0].delta.content`, if present and truthy.
    pub fn into_content(self) -> Option<serde_json::Value> {
        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta)
            .and_then(|delta| delta.content)
            .filter(is_truthy)
    }
}

/// `null`, `false`, `0` and `""` carry no text.
fn is_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        serde_json::Value::String(s) => !s.is_empty(),
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => true,
    }
}

/// Payload of one downstream text frame.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RelayEvent {
    pub content: serde_json::Value,
}
