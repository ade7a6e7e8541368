use std::collections::VecDeque;

use bytes::Bytes;
use futures::{Stream, StreamExt, stream};
use tracing::{debug, instrument};

use crate::convert::{SseDecoder, build_request_body, parse_delta};
use crate::error::ApiError;
use crate::types::{ChatRequest, StreamDelta};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Client for an OpenAI-compatible chat-completions API.
pub struct ChatClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl ChatClient {
    /// Creates a new client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Creates a new client with a custom base URL.
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into(),
        }
    }

    /// Opens a streaming completion.
    ///
    /// Returns a stream of delta units; the final unit carries a non-empty
    /// finish reason. A stalled upstream stalls the returned stream, there
    /// is no client-side timeout.
    #[instrument(skip(self, request), fields(model = %request.model))]
    pub async fn stream_chat(
        &self,
        request: &ChatRequest,
    ) -> Result<impl Stream<Item = Result<StreamDelta, ApiError>> + Unpin + use<>, ApiError> {
        let body = build_request_body(request);

        debug!("Opening completion stream");

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let response_body: serde_json::Value = response.json().await?;
            let message = response_body
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .unwrap_or("Unknown error")
                .to_string();
            return Err(ApiError::Api {
                status: status.as_u16(),
                message,
            });
        }

        debug!("Completion stream opened");

        Ok(delta_stream(response.bytes_stream()))
    }
}

struct DeltaStreamState<S> {
    inner: S,
    decoder: SseDecoder,
    pending: VecDeque<Result<StreamDelta, ApiError>>,
    done: bool,
}

/// Decodes a raw SSE byte stream into delta units, ending at `[DONE]`.
pub(crate) fn delta_stream<S>(inner: S) -> impl Stream<Item = Result<StreamDelta, ApiError>> + Unpin
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Unpin,
{
    let state = DeltaStreamState {
        inner,
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        done: false,
    };

    Box::pin(stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.done {
                return None;
            }

            match state.inner.next().await {
                Some(Ok(chunk)) => {
                    for payload in state.decoder.feed(&String::from_utf8_lossy(&chunk)) {
                        if payload == "[DONE]" {
                            state.done = true;
                            break;
                        }
                        match parse_delta(&payload) {
                            Ok(Some(delta)) => state.pending.push_back(Ok(delta)),
                            Ok(None) => {}
                            Err(e) => state.pending.push_back(Err(e)),
                        }
                    }
                }
                Some(Err(e)) => {
                    state.done = true;
                    state.pending.push_back(Err(ApiError::Http(e)));
                }
                None => state.done = true,
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_creation() {
        let client = ChatClient::new("test-key");
        assert_eq!(client.api_key, "test-key");
        assert_eq!(client.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn client_custom_base_url() {
        let client = ChatClient::with_base_url("test-key", "https://custom.api.com/v1");
        assert_eq!(client.base_url, "https://custom.api.com/v1");
    }

    fn byte_chunks(chunks: &[&str]) -> impl Stream<Item = Result<Bytes, reqwest::Error>> + Unpin {
        stream::iter(
            chunks
                .iter()
                .map(|c| Ok(Bytes::copy_from_slice(c.as_bytes())))
                .collect::<Vec<_>>(),
        )
    }

    #[tokio::test]
    async fn delta_stream_decodes_chunks() {
        let raw = byte_chunks(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\ndata: [DONE]\n\n",
        ]);

        let deltas: Vec<_> = delta_stream(raw).collect().await;
        assert_eq!(deltas.len(), 3);
        assert_eq!(
            deltas[0].as_ref().unwrap().content.as_deref(),
            Some("Hel")
        );
        assert_eq!(deltas[1].as_ref().unwrap().content.as_deref(), Some("lo"));
        assert_eq!(
            deltas[2].as_ref().unwrap().finish_reason.as_deref(),
            Some("stop")
        );
    }

    #[tokio::test]
    async fn delta_stream_handles_split_events() {
        let raw = byte_chunks(&[
            "data: {\"choices\":[{\"delta\":{\"cont",
            "ent\":\"Hi\"}}]}\n\ndata: [DONE]\n\n",
        ]);

        let deltas: Vec<_> = delta_stream(raw).collect().await;
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].as_ref().unwrap().content.as_deref(), Some("Hi"));
    }

    #[tokio::test]
    async fn delta_stream_stops_at_done() {
        let raw = byte_chunks(&[
            "data: [DONE]\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n\n",
        ]);

        let deltas: Vec<_> = delta_stream(raw).collect().await;
        assert!(deltas.is_empty());
    }

    #[tokio::test]
    async fn delta_stream_surfaces_parse_errors() {
        let raw = byte_chunks(&["data: not json\n\ndata: [DONE]\n\n"]);

        let deltas: Vec<_> = delta_stream(raw).collect().await;
        assert_eq!(deltas.len(), 1);
        assert!(deltas[0].is_err());
    }
}
