//! Streaming client for OpenAI-compatible chat-completion endpoints.
//!
//! The endpoint is treated as an opaque token-streaming service: a request
//! carries an ordered message list and the response is consumed as a
//! sequence of [`StreamDelta`] units terminated by a final unit carrying a
//! non-empty finish reason.

mod client;
mod convert;
mod error;
mod types;

pub use client::ChatClient;
pub use convert::{SseDecoder, build_request_body, parse_delta};
pub use error::ApiError;
pub use types::{ChatMessage, ChatRequest, ContentPart, MessageContent, Role, StreamDelta};
