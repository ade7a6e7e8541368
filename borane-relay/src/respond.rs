//! Streams the model's answer into live-updating chat messages.
//!
//! The token stream is split into bounded output units, each mapped to one
//! outbound message. Styled output is edited in place on a rate-limited
//! cadence; plain output suppresses intermediate edits and sends each
//! finished unit once at end-of-stream.

use std::collections::BTreeSet;

use futures::{Stream, StreamExt};
use tokio::sync::OwnedMutexGuard;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, warn};

use borane_openai::{ApiError, ChatMessage, MessageContent, Role, StreamDelta};

use crate::cache::{NextLink, NodeCache, NodeState};
use crate::platform::{ChatPlatform, InboundMessage, MessageId, StyledContent};

/// Visual suffix marking an output unit as still being generated.
pub const STREAMING_INDICATOR: &str = " ⚪";

pub const EMBED_COLOR_COMPLETE: u32 = 0x1F8B4C;
pub const EMBED_COLOR_INCOMPLETE: u32 = 0xE67E22;

/// Platform limit for plain messages.
pub const PLAIN_MAX_LENGTH: usize = 2000;
/// Platform limit for styled descriptions; the streaming indicator must
/// still fit underneath it.
pub const STYLED_MAX_LENGTH: usize = 4096;

pub struct ResponseDispatcher<'a, P> {
    platform: &'a P,
    cache: &'a NodeCache,
    use_plain: bool,
    edit_interval: Duration,
    accepts_names: bool,
}

impl<'a, P: ChatPlatform> ResponseDispatcher<'a, P> {
    pub fn new(
        platform: &'a P,
        cache: &'a NodeCache,
        use_plain: bool,
        edit_interval: Duration,
        accepts_names: bool,
    ) -> Self {
        Self {
            platform,
            cache,
            use_plain,
            edit_interval,
            accepts_names,
        }
    }

    fn max_unit_len(&self) -> usize {
        if self.use_plain {
            PLAIN_MAX_LENGTH
        } else {
            STYLED_MAX_LENGTH - chars(STREAMING_INDICATOR)
        }
    }

    /// Consumes the delta stream and publishes the answer.
    ///
    /// A delta is attributed to the output units only on the following
    /// iteration, so unit-boundary decisions always see the upcoming text.
    /// On stream error the loop aborts and whatever was already sent is
    /// kept. Every outbound message is registered in the node cache as an
    /// assistant node continuing the trigger; each node's lock is held from
    /// creation until the full response text is known, so a concurrently
    /// arriving reply to a half-sent message cannot observe partial
    /// content.
    ///
    /// Returns the ids of the outbound messages, in send order.
    pub async fn dispatch<S>(
        &self,
        trigger: &InboundMessage,
        warnings: &BTreeSet<String>,
        mut stream: S,
    ) -> Vec<MessageId>
    where
        S: Stream<Item = Result<StreamDelta, ApiError>> + Unpin,
    {
        let max_len = self.max_unit_len();
        let fields: Vec<String> = warnings.iter().cloned().collect();

        let mut contents: Vec<String> = Vec::new();
        let mut sent: Vec<MessageId> = Vec::new();
        let mut guards: Vec<OwnedMutexGuard<NodeState>> = Vec::new();
        let mut prev_delta = String::new();
        let mut finish_reason: Option<String> = None;
        let mut last_edit = Instant::now();

        while let Some(item) = stream.next().await {
            let delta = match item {
                Ok(delta) => delta,
                Err(e) => {
                    error!(error = %e, "completion stream failed");
                    break;
                }
            };
            let curr_delta = delta.content.unwrap_or_default();
            finish_reason = delta.finish_reason;

            if !contents.is_empty() || !prev_delta.is_empty() {
                let needs_new_unit = contents
                    .last()
                    .is_none_or(|last| chars(last) + chars(&prev_delta) > max_len);
                if needs_new_unit {
                    contents.push(String::new());
                    if !self.use_plain {
                        let description = format!("{prev_delta}{STREAMING_INDICATOR}");
                        if !self
                            .open_styled_unit(trigger, &mut sent, &mut guards, description, &fields)
                            .await
                        {
                            break;
                        }
                        last_edit = Instant::now();
                    }
                }
                if let Some(last) = contents.last_mut() {
                    last.push_str(&prev_delta);
                }

                if !self.use_plain {
                    let unit = contents.last().map(String::as_str).unwrap_or("");
                    let split_incoming = chars(unit) + chars(&curr_delta) > max_len;
                    let is_final = split_incoming || finish_reason.is_some();

                    if is_final || last_edit.elapsed() >= self.edit_interval {
                        let styled = StyledContent {
                            description: if is_final {
                                unit.to_string()
                            } else {
                                format!("{unit}{STREAMING_INDICATOR}")
                            },
                            color: if split_incoming || finish_reason.as_deref() == Some("stop") {
                                EMBED_COLOR_COMPLETE
                            } else {
                                EMBED_COLOR_INCOMPLETE
                            },
                            fields: fields.clone(),
                        };
                        self.push_edit(trigger, &sent, &styled).await;
                        last_edit = Instant::now();
                    }
                }
            }

            prev_delta = curr_delta;
        }

        // A final chunk may carry both text and the finish reason; flush the
        // leftover delta so the published units reconstruct the full stream.
        if !prev_delta.is_empty() {
            let needs_new_unit = contents
                .last()
                .is_none_or(|last| chars(last) + chars(&prev_delta) > max_len);
            let mut opened = true;
            if needs_new_unit {
                contents.push(String::new());
                if !self.use_plain {
                    let description = format!("{prev_delta}{STREAMING_INDICATOR}");
                    opened = self
                        .open_styled_unit(trigger, &mut sent, &mut guards, description, &fields)
                        .await;
                }
            }
            // A failed send means no message exists for this unit; editing
            // here would overwrite the previous outbound message.
            if opened {
                if let Some(last) = contents.last_mut() {
                    last.push_str(&prev_delta);
                }
                if !self.use_plain {
                    let unit = contents.last().map(String::as_str).unwrap_or("");
                    let styled = StyledContent {
                        description: unit.to_string(),
                        color: if finish_reason.as_deref() == Some("stop") {
                            EMBED_COLOR_COMPLETE
                        } else {
                            EMBED_COLOR_INCOMPLETE
                        },
                        fields: fields.clone(),
                    };
                    self.push_edit(trigger, &sent, &styled).await;
                }
            }
        }

        if self.use_plain {
            for content in &contents {
                let reply_to = sent.last().copied().unwrap_or(trigger.id);
                match self
                    .platform
                    .reply_plain(trigger.channel_id, reply_to, content)
                    .await
                {
                    Ok(id) => {
                        guards.push(self.lock_new_node(id).await);
                        sent.push(id);
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to send plain response message");
                        break;
                    }
                }
            }
        }

        debug!(
            units = contents.len(),
            sent = sent.len(),
            "response dispatch finished"
        );

        // Register the full response under every outbound message, then
        // release the locks held since each message was sent.
        let full_text: String = contents.concat();
        let data = ChatMessage {
            role: Role::Assistant,
            content: MessageContent::Text(full_text),
            name: if self.accepts_names {
                Some(self.platform.bot_user_id().to_string())
            } else {
                None
            },
        };
        let link = NextLink {
            channel_id: trigger.channel_id,
            message_id: trigger.id,
        };
        for mut guard in guards {
            guard.data = Some(data.clone());
            guard.next = Some(link);
        }

        sent
    }

    /// Sends the outbound message for a freshly started output unit and
    /// registers its node with the lock held.
    async fn open_styled_unit(
        &self,
        trigger: &InboundMessage,
        sent: &mut Vec<MessageId>,
        guards: &mut Vec<OwnedMutexGuard<NodeState>>,
        description: String,
        fields: &[String],
    ) -> bool {
        let reply_to = sent.last().copied().unwrap_or(trigger.id);
        let styled = StyledContent {
            description,
            color: EMBED_COLOR_INCOMPLETE,
            fields: fields.to_vec(),
        };
        match self
            .platform
            .reply_styled(trigger.channel_id, reply_to, &styled)
            .await
        {
            Ok(id) => {
                guards.push(self.lock_new_node(id).await);
                sent.push(id);
                true
            }
            Err(e) => {
                error!(error = %e, "failed to send styled response message");
                false
            }
        }
    }

    /// Edits the newest outbound message. Awaiting the edit keeps edits to
    /// one message strictly serialized: a new edit can never start before
    /// the previous one completed.
    async fn push_edit(&self, trigger: &InboundMessage, sent: &[MessageId], styled: &StyledContent) {
        let Some(&message_id) = sent.last() else {
            return;
        };
        if let Err(e) = self
            .platform
            .edit_styled(trigger.channel_id, message_id, styled)
            .await
        {
            warn!(error = %e, message_id, "failed to edit response message");
        }
    }

    async fn lock_new_node(&self, id: MessageId) -> OwnedMutexGuard<NodeState> {
        self.cache.get_or_create(id).lock_owned().await
    }
}

fn chars(s: &str) -> usize {
    s.chars().count()
}
