//! Backward chain resolution.
//!
//! Walks from a triggering message through the node cache, deciding for
//! each message which prior message it continues, and produces a bounded
//! LLM context plus deduplicated user-facing warnings.

use std::collections::BTreeSet;

use tracing::warn;

use borane_openai::{ChatMessage, Role};

use crate::cache::{NextLink, NodeCache, NodeState};
use crate::extract::{AttachmentFetcher, ContentExtractor, Extracted};
use crate::platform::{
    ChannelId, ChannelKind, ChatPlatform, InboundMessage, MessageId, MessageKind, PlatformError,
};

/// Ordered context (oldest first) plus warnings to surface with the reply.
#[derive(Debug)]
pub struct ResolvedChain {
    pub messages: Vec<ChatMessage>,
    pub warnings: BTreeSet<String>,
}

struct Cursor {
    channel_id: ChannelId,
    message_id: MessageId,
    /// The raw message, when the previous step already fetched it.
    message: Option<InboundMessage>,
}

pub struct ChainResolver<'a, P, F> {
    cache: &'a NodeCache,
    platform: &'a P,
    extractor: &'a ContentExtractor<F>,
    max_messages: usize,
    max_text: usize,
    max_images: usize,
    accepts_names: bool,
    bot_mention: String,
}

impl<'a, P: ChatPlatform, F: AttachmentFetcher> ChainResolver<'a, P, F> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cache: &'a NodeCache,
        platform: &'a P,
        extractor: &'a ContentExtractor<F>,
        max_messages: usize,
        max_text: usize,
        max_images: usize,
        accepts_names: bool,
        bot_mention: String,
    ) -> Self {
        Self {
            cache,
            platform,
            extractor,
            max_messages,
            max_text,
            max_images,
            accepts_names,
            bot_mention,
        }
    }

    /// Resolves the conversation chain ending at `trigger`.
    ///
    /// Iterative rather than recursive so chain length cannot grow the
    /// stack. Each visited node is populated at most once under its mutex;
    /// a walk reaching a node another task is populating suspends on that
    /// mutex until the population completes.
    pub async fn resolve(&self, trigger: &InboundMessage) -> ResolvedChain {
        let mut messages: Vec<ChatMessage> = Vec::new();
        let mut warnings = BTreeSet::new();

        let mut cursor = Some(Cursor {
            channel_id: trigger.channel_id,
            message_id: trigger.id,
            message: Some(trigger.clone()),
        });

        while messages.len() < self.max_messages {
            let Some(step) = cursor.take() else { break };

            let node = self.cache.get_or_create(step.message_id);
            let mut state = node.lock().await;
            let mut fetched_next: Option<InboundMessage> = None;

            if !state.is_populated() {
                let raw = match step.message {
                    Some(msg) => msg,
                    None => match self
                        .platform
                        .fetch_message(step.channel_id, step.message_id)
                        .await
                    {
                        Ok(msg) => msg,
                        Err(e) => {
                            // Leave the node unpopulated so a later walk can
                            // retry; this walk just truncates here.
                            warn!(error = %e, id = step.message_id, "failed to fetch chain message");
                            drop(state);
                            warnings.insert(truncated_history_warning(messages.len()));
                            break;
                        }
                    },
                };
                fetched_next = self.populate(&mut state, &raw).await;
            }

            if let Some(data) = &state.data {
                if !data.content.is_empty() {
                    messages.push(data.clone());
                }
            }

            if state.too_much_text {
                warnings.insert(format!(
                    "⚠️ Max {} characters per message",
                    thousands(self.max_text)
                ));
            }
            if state.too_many_images {
                warnings.insert(if self.max_images > 0 {
                    format!(
                        "⚠️ Max {} image{} per message",
                        self.max_images,
                        plural(self.max_images)
                    )
                } else {
                    "⚠️ Can't see images".to_string()
                });
            }
            if state.has_bad_attachments {
                warnings.insert("⚠️ Unsupported attachments".to_string());
            }
            if state.fetch_next_failed
                || (state.next.is_some() && messages.len() == self.max_messages)
            {
                warnings.insert(truncated_history_warning(messages.len()));
            }

            let next = state.next;
            drop(state);

            cursor = next.map(|link| Cursor {
                channel_id: link.channel_id,
                message_id: link.message_id,
                message: fetched_next
                    .take()
                    .filter(|msg| msg.id == link.message_id),
            });
        }

        messages.reverse();
        ResolvedChain { messages, warnings }
    }

    /// Populates a node from its raw message: extracts content and resolves
    /// the continuation link. Returns the continuation's raw message when
    /// resolving it required fetching it.
    async fn populate(
        &self,
        state: &mut NodeState,
        msg: &InboundMessage,
    ) -> Option<InboundMessage> {
        let extracted = match self.extractor.extract(msg).await {
            Ok(extracted) => extracted,
            Err(e) => {
                warn!(error = %e, id = msg.id, "content extraction failed");
                state.fetch_next_failed = true;
                Extracted::empty()
            }
        };

        state.too_much_text = extracted.too_much_text;
        state.too_many_images = extracted.too_many_images;
        state.has_bad_attachments = extracted.has_bad_attachments;

        let role = if msg.author_id == self.platform.bot_user_id() {
            Role::Assistant
        } else {
            Role::User
        };
        state.data = Some(ChatMessage {
            role,
            content: extracted.content,
            name: if self.accepts_names {
                Some(msg.author_id.to_string())
            } else {
                None
            },
        });

        if state.fetch_next_failed {
            return None;
        }

        match self.resolve_next(msg).await {
            Ok(Some((link, message))) => {
                // Placeholder insertion keeps concurrent walks converging on
                // the same node.
                self.cache.get_or_create(link.message_id);
                state.next = Some(link);
                message
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, id = msg.id, "error fetching next message in the chain");
                state.fetch_next_failed = true;
                None
            }
        }
    }

    /// Decides which prior message `msg` continues.
    ///
    /// Precedence: implicit same-author predecessor, then public-thread
    /// starter, then explicit reply reference, else the chain ends. The
    /// returned message is included when resolution had to fetch it.
    async fn resolve_next(
        &self,
        msg: &InboundMessage,
    ) -> Result<Option<(NextLink, Option<InboundMessage>)>, PlatformError> {
        if msg.reply_to.is_none()
            && msg.channel_kind != ChannelKind::Direct
            && !msg.body.contains(&self.bot_mention)
        {
            if let Some(prev) = self
                .platform
                .previous_message(msg.channel_id, msg.id)
                .await?
            {
                if matches!(prev.kind, MessageKind::Default | MessageKind::Reply)
                    && prev.author_id == msg.author_id
                {
                    let link = NextLink {
                        channel_id: prev.channel_id,
                        message_id: prev.id,
                    };
                    return Ok(Some((link, Some(prev))));
                }
            }
        }

        if msg.reply_to.is_none() && msg.channel_kind == ChannelKind::PublicThread {
            let starter = self.platform.thread_starter(msg.channel_id).await?;
            let link = NextLink {
                channel_id: starter.channel_id,
                message_id: starter.id,
            };
            return Ok(Some((link, Some(starter))));
        }

        if let Some(reply_id) = msg.reply_to {
            let referenced = match &msg.referenced_cached {
                Some(cached) => (**cached).clone(),
                None => self.platform.fetch_message(msg.channel_id, reply_id).await?,
            };
            let link = NextLink {
                channel_id: referenced.channel_id,
                message_id: referenced.id,
            };
            return Ok(Some((link, Some(referenced))));
        }

        Ok(None)
    }
}

fn truncated_history_warning(used: usize) -> String {
    format!("⚠️ Only using last {} message{}", used, plural(used))
}

fn plural(count: usize) -> &'static str {
    if count == 1 { "" } else { "s" }
}

/// Renders a count with comma grouping, e.g. `100000` as `100,000`.
fn thousands(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::thousands;

    #[test]
    fn thousands_grouping() {
        assert_eq!(thousands(7), "7");
        assert_eq!(thousands(100), "100");
        assert_eq!(thousands(1500), "1,500");
        assert_eq!(thousands(100000), "100,000");
        assert_eq!(thousands(1234567), "1,234,567");
    }
}
