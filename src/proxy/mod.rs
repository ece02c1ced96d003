//! HTTP relay module.
//!
//! Accepts chat requests from the browser client, forwards them to the
//! upstream completions API and streams the reply back as server-sent events.

pub mod compose;
mod handlers;
mod server;
pub mod stream;
pub mod types;

pub use compose::{compose_messages, UpstreamClient};
pub use server::{create_router, run_server, AppState, RequestId, REQUEST_ID_HEADER};
pub use stream::{relay, spawn_relay, RelayFrame, RelayOutcome, RelaySummary, SseLineDecoder};
pub use types::{ChatMessage, ChatRequest, Role, UpstreamRequest};
