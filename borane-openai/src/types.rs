use serde_json::{Map, Value};

/// Role of a message in the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One part of a multimodal message payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPart {
    Text { text: String },
    /// Remote URL or `data:` URI with base64-encoded bytes.
    ImageUrl { url: String },
}

/// Normalized message content: plain text or an ordered list of parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    pub fn is_empty(&self) -> bool {
        match self {
            MessageContent::Text(text) => text.is_empty(),
            MessageContent::Parts(parts) => parts.is_empty(),
        }
    }
}

/// A single entry of the ordered message list sent to the endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
    /// Stable per-author identity, only for models that accept it.
    pub name: Option<String>,
}

/// A streaming completion request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    /// Ordered context, oldest first.
    pub messages: Vec<ChatMessage>,
    /// Provider-specific parameters merged verbatim into the request body.
    pub extra_parameters: Map<String, Value>,
}

/// One unit of the streamed response.
///
/// The final unit of a stream carries a non-empty `finish_reason`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamDelta {
    pub content: Option<String>,
    pub finish_reason: Option<String>,
}
