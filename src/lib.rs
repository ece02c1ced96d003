//! chatrelay - streaming chat relay for a hosted LLM completions API
//!
//! This library provides the server-side relay: request validation,
//! conversation composition, the upstream call and the SSE re-framing
//! of the streamed reply.

pub mod config;
pub mod error;
pub mod proxy;

pub use config::Config;
pub use error::{Error, Result};
