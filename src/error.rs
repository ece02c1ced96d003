//! Error types for chatrelay.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Result type alias for chatrelay operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for chatrelay.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Upstream API key not configured")]
    MissingApiKey,

    #[error("Upstream returned {status}")]
    UpstreamStatus { status: StatusCode },

    #[error("Upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),
}

impl Error {
    /// HTTP status reported to the caller.
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::MissingApiKey => StatusCode::INTERNAL_SERVER_ERROR,
            Error::UpstreamStatus { status } => *status,
            Error::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Message placed in the response body. Upstream detail stays in the logs.
    fn public_message(&self) -> String {
        match self {
            Error::BadRequest(message) => message.clone(),
            Error::UpstreamStatus { .. } => "Failed to get response from AI service".to_string(),
            Error::Upstream(_) => "Failed to reach AI service".to_string(),
            Error::Config(_) | Error::MissingApiKey => self.to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.public_message() });
        (self.status(), axum::Json(body)).into_response()
    }
}
