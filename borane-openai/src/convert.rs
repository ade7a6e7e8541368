use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::ApiError;
use crate::types::{ChatMessage, ChatRequest, ContentPart, MessageContent, StreamDelta};

/// Converts a ContentPart to chat-completions JSON format.
fn content_part_to_json(part: &ContentPart) -> Value {
    match part {
        ContentPart::Text { text } => json!({
            "type": "text",
            "text": text
        }),
        ContentPart::ImageUrl { url } => json!({
            "type": "image_url",
            "image_url": { "url": url }
        }),
    }
}

/// Converts a ChatMessage to chat-completions JSON format.
fn message_to_json(msg: &ChatMessage) -> Value {
    let content = match &msg.content {
        MessageContent::Text(text) => json!(text),
        MessageContent::Parts(parts) => {
            Value::Array(parts.iter().map(content_part_to_json).collect())
        }
    };

    let mut msg_json = json!({
        "role": msg.role.as_str(),
        "content": content
    });
    if let Some(name) = &msg.name {
        msg_json["name"] = json!(name);
    }
    msg_json
}

/// Builds the full streaming request body.
///
/// Extra parameters are merged last and may override the defaults.
pub fn build_request_body(request: &ChatRequest) -> Value {
    let messages: Vec<Value> = request.messages.iter().map(message_to_json).collect();

    let mut body = json!({
        "model": request.model,
        "messages": messages,
        "stream": true
    });

    for (key, value) in &request.extra_parameters {
        body[key.as_str()] = value.clone();
    }

    body
}

#[derive(Debug, Default, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: DeltaBody,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DeltaBody {
    content: Option<String>,
}

/// Parses one SSE `data:` payload into a delta unit.
///
/// Returns `Ok(None)` for well-formed events carrying no choice, such as
/// keep-alive chunks.
pub fn parse_delta(data: &str) -> Result<Option<StreamDelta>, ApiError> {
    let chunk: StreamChunk = serde_json::from_str(data)?;
    let Some(choice) = chunk.choices.into_iter().next() else {
        return Ok(None);
    };
    Ok(Some(StreamDelta {
        content: choice.delta.content,
        finish_reason: choice.finish_reason,
    }))
}

/// Incremental decoder for server-sent event frames.
///
/// Network chunks may split an event anywhere; the decoder buffers partial
/// lines and yields only complete `data:` payloads.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one network chunk, returning the data payloads completed by it.
    pub fn feed(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);

        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line = self.buffer[..pos].trim().to_string();
            self.buffer.drain(..=pos);
            if let Some(data) = line.strip_prefix("data:") {
                payloads.push(data.trim_start().to_string());
            }
        }
        payloads
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    fn text_message(role: Role, text: &str) -> ChatMessage {
        ChatMessage {
            role,
            content: MessageContent::Text(text.to_string()),
            name: None,
        }
    }

    #[test]
    fn request_body_basic() {
        let request = ChatRequest {
            model: "gpt-4o".to_string(),
            messages: vec![
                text_message(Role::System, "You are helpful."),
                text_message(Role::User, "Hi"),
            ],
            extra_parameters: serde_json::Map::new(),
        };

        let body = build_request_body(&request);

        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "Hi");
    }

    #[test]
    fn request_body_with_name() {
        let mut msg = text_message(Role::User, "Hi");
        msg.name = Some("12345".to_string());
        let request = ChatRequest {
            model: "gpt-4o".to_string(),
            messages: vec![msg],
            extra_parameters: serde_json::Map::new(),
        };

        let body = build_request_body(&request);
        assert_eq!(body["messages"][0]["name"], "12345");
    }

    #[test]
    fn request_body_multimodal_parts() {
        let msg = ChatMessage {
            role: Role::User,
            content: MessageContent::Parts(vec![
                ContentPart::Text {
                    text: "look".to_string(),
                },
                ContentPart::ImageUrl {
                    url: "data:image/png;base64,aGk=".to_string(),
                },
            ]),
            name: None,
        };
        let request = ChatRequest {
            model: "gpt-4o".to_string(),
            messages: vec![msg],
            extra_parameters: serde_json::Map::new(),
        };

        let body = build_request_body(&request);
        let content = &body["messages"][0]["content"];
        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[1]["type"], "image_url");
        assert_eq!(content[1]["image_url"]["url"], "data:image/png;base64,aGk=");
    }

    #[test]
    fn request_body_merges_extra_parameters() {
        let mut extra = serde_json::Map::new();
        extra.insert("temperature".to_string(), json!(0.7));
        extra.insert("max_tokens".to_string(), json!(512));
        let request = ChatRequest {
            model: "gpt-4o".to_string(),
            messages: vec![text_message(Role::User, "Hi")],
            extra_parameters: extra,
        };

        let body = build_request_body(&request);
        assert_eq!(body["temperature"], 0.7);
        assert_eq!(body["max_tokens"], 512);
    }

    #[test]
    fn parse_delta_content() {
        let delta = parse_delta(r#"{"choices":[{"delta":{"content":"Hel"}}]}"#)
            .unwrap()
            .unwrap();
        assert_eq!(delta.content.as_deref(), Some("Hel"));
        assert!(delta.finish_reason.is_none());
    }

    #[test]
    fn parse_delta_finish() {
        let delta = parse_delta(r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#)
            .unwrap()
            .unwrap();
        assert!(delta.content.is_none());
        assert_eq!(delta.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn parse_delta_no_choices() {
        assert!(parse_delta(r#"{"choices":[]}"#).unwrap().is_none());
    }

    #[test]
    fn parse_delta_malformed() {
        assert!(parse_delta("not json").is_err());
    }

    #[test]
    fn sse_decoder_complete_events() {
        let mut decoder = SseDecoder::new();
        let payloads = decoder.feed("data: {\"a\":1}\n\ndata: {\"b\":2}\n\n");
        assert_eq!(payloads, vec!["{\"a\":1}", "{\"b\":2}"]);
    }

    #[test]
    fn sse_decoder_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed("data: {\"a\"").is_empty());
        let payloads = decoder.feed(":1}\n");
        assert_eq!(payloads, vec!["{\"a\":1}"]);
    }

    #[test]
    fn sse_decoder_ignores_non_data_lines() {
        let mut decoder = SseDecoder::new();
        let payloads = decoder.feed(": keep-alive\nevent: ping\ndata: [DONE]\n");
        assert_eq!(payloads, vec!["[DONE]"]);
    }
}
