//! Turns a raw inbound message into normalized LLM-ready content.

use async_trait::async_trait;
use base64::Engine;
use thiserror::Error;
use tracing::debug;

use borane_openai::{ContentPart, MessageContent};

use crate::platform::InboundMessage;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("attachment fetch failed: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        FetchError::Transport(e.to_string())
    }
}

/// Retrieves remote attachment bodies.
#[async_trait]
pub trait AttachmentFetcher: Send + Sync {
    async fn fetch_text(&self, url: &str) -> Result<String, FetchError>;
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Fetcher backed by a shared HTTP client.
#[derive(Default)]
pub struct HttpFetcher {
    http: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AttachmentFetcher for HttpFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        Ok(self.http.get(url).send().await?.text().await?)
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        Ok(self.http.get(url).send().await?.bytes().await?.to_vec())
    }
}

/// Normalized content plus degraded-extraction flags.
#[derive(Debug)]
pub struct Extracted {
    pub content: MessageContent,
    pub too_much_text: bool,
    pub too_many_images: bool,
    pub has_bad_attachments: bool,
}

impl Extracted {
    /// Placeholder for a message whose extraction failed entirely.
    pub fn empty() -> Self {
        Self {
            content: MessageContent::Text(String::new()),
            too_much_text: false,
            too_many_images: false,
            has_bad_attachments: false,
        }
    }
}

/// Extracts LLM content from inbound messages.
///
/// `max_images` is the effective budget: zero when the target model accepts
/// no images at all.
pub struct ContentExtractor<F> {
    fetcher: F,
    max_text: usize,
    max_images: usize,
    bot_mention: String,
}

impl<F: AttachmentFetcher> ContentExtractor<F> {
    pub fn new(fetcher: F, max_text: usize, max_images: usize, bot_mention: String) -> Self {
        Self {
            fetcher,
            max_text,
            max_images,
            bot_mention,
        }
    }

    /// Builds the message's LLM payload.
    ///
    /// Concatenates the body (leading bot mention stripped), embed
    /// descriptions and fetched text-attachment bodies; emits a multimodal
    /// parts list when image attachments survive the budget, plain
    /// truncated text otherwise. Fetch errors propagate to the caller.
    pub async fn extract(&self, msg: &InboundMessage) -> Result<Extracted, FetchError> {
        let mut image_attachments = Vec::new();
        let mut text_attachments = Vec::new();
        for att in &msg.attachments {
            match att.content_type.as_deref() {
                Some(ct) if ct.contains("image") => image_attachments.push((att.url.as_str(), ct)),
                Some(ct) if ct.contains("text") => text_attachments.push(att.url.as_str()),
                _ => {}
            }
        }
        let recognized = image_attachments.len() + text_attachments.len();

        let mut pieces: Vec<String> = Vec::new();
        if !msg.body.is_empty() {
            pieces.push(msg.body.clone());
        }
        pieces.extend(msg.embeds.iter().filter_map(|e| e.description.clone()));
        for url in &text_attachments {
            pieces.push(self.fetcher.fetch_text(url).await?);
        }

        let mut text = pieces.join("\n");
        if msg.body.starts_with(&self.bot_mention) {
            text = text
                .replacen(&self.bot_mention, "", 1)
                .trim_start()
                .to_string();
        }

        let total_chars = text.chars().count();
        let truncated = truncate_chars(&text, self.max_text);

        let accepted = &image_attachments[..image_attachments.len().min(self.max_images)];
        let content = if accepted.is_empty() {
            MessageContent::Text(truncated)
        } else {
            let mut parts = Vec::new();
            if !truncated.is_empty() {
                parts.push(ContentPart::Text { text: truncated });
            }
            for (url, content_type) in accepted {
                let bytes = self.fetcher.fetch_bytes(url).await?;
                let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
                parts.push(ContentPart::ImageUrl {
                    url: format!("data:{};base64,{}", content_type, encoded),
                });
            }
            MessageContent::Parts(parts)
        };

        debug!(
            id = msg.id,
            chars = total_chars,
            images = image_attachments.len(),
            "extracted message content"
        );

        Ok(Extracted {
            content,
            too_much_text: total_chars > self.max_text,
            too_many_images: image_attachments.len() > self.max_images,
            has_bad_attachments: msg.attachments.len() > recognized,
        })
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{Attachment, ChannelKind, Embed, MessageKind};

    /// Fetcher for messages without remote attachments.
    struct NoFetch;

    #[async_trait]
    impl AttachmentFetcher for NoFetch {
        async fn fetch_text(&self, _url: &str) -> Result<String, FetchError> {
            Err(FetchError::Transport("unexpected fetch".to_string()))
        }

        async fn fetch_bytes(&self, _url: &str) -> Result<Vec<u8>, FetchError> {
            Err(FetchError::Transport("unexpected fetch".to_string()))
        }
    }

    fn message(body: &str) -> InboundMessage {
        InboundMessage {
            id: 1,
            channel_id: 10,
            channel_kind: ChannelKind::Text,
            parent_channel_id: None,
            kind: MessageKind::Default,
            author_id: 7,
            author_is_bot: false,
            author_role_ids: vec![],
            body: body.to_string(),
            mentions_me: false,
            attachments: vec![],
            embeds: vec![],
            reply_to: None,
            referenced_cached: None,
        }
    }

    fn extractor(max_text: usize) -> ContentExtractor<NoFetch> {
        ContentExtractor::new(NoFetch, max_text, 0, "<@99>".to_string())
    }

    #[tokio::test]
    async fn text_below_budget_is_verbatim() {
        let extracted = extractor(100).extract(&message("hello")).await.unwrap();

        assert_eq!(extracted.content, MessageContent::Text("hello".to_string()));
        assert!(!extracted.too_much_text);
    }

    #[tokio::test]
    async fn text_over_budget_is_truncated_exactly() {
        let body = "x".repeat(150);
        let extracted = extractor(100).extract(&message(&body)).await.unwrap();

        match &extracted.content {
            MessageContent::Text(text) => assert_eq!(text.chars().count(), 100),
            other => panic!("expected text content, got {:?}", other),
        }
        assert!(extracted.too_much_text);
    }

    #[tokio::test]
    async fn leading_bot_mention_is_stripped() {
        let extracted = extractor(100)
            .extract(&message("<@99> what's up"))
            .await
            .unwrap();

        assert_eq!(
            extracted.content,
            MessageContent::Text("what's up".to_string())
        );
    }

    #[tokio::test]
    async fn mid_message_mention_is_kept() {
        let extracted = extractor(100)
            .extract(&message("hey <@99> what's up"))
            .await
            .unwrap();

        assert_eq!(
            extracted.content,
            MessageContent::Text("hey <@99> what's up".to_string())
        );
    }

    #[tokio::test]
    async fn embed_descriptions_are_appended() {
        let mut msg = message("body");
        msg.embeds = vec![
            Embed {
                description: Some("first embed".to_string()),
            },
            Embed { description: None },
            Embed {
                description: Some("second embed".to_string()),
            },
        ];

        let extracted = extractor(100).extract(&msg).await.unwrap();
        assert_eq!(
            extracted.content,
            MessageContent::Text("body\nfirst embed\nsecond embed".to_string())
        );
    }

    #[tokio::test]
    async fn unrecognized_attachments_are_flagged() {
        let mut msg = message("body");
        msg.attachments = vec![Attachment {
            url: "https://example.com/a.bin".to_string(),
            content_type: Some("application/octet-stream".to_string()),
        }];

        let extracted = extractor(100).extract(&msg).await.unwrap();
        assert!(extracted.has_bad_attachments);
        assert_eq!(extracted.content, MessageContent::Text("body".to_string()));
    }

    #[tokio::test]
    async fn images_over_zero_budget_are_flagged_not_included() {
        let mut msg = message("body");
        msg.attachments = vec![Attachment {
            url: "https://example.com/a.png".to_string(),
            content_type: Some("image/png".to_string()),
        }];

        // Budget zero: the model accepts no images.
        let extracted = extractor(100).extract(&msg).await.unwrap();
        assert!(extracted.too_many_images);
        assert_eq!(extracted.content, MessageContent::Text("body".to_string()));
    }
}
