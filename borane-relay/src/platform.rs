//! Chat-platform interface.
//!
//! The platform (connection, authentication, gateway events) is an external
//! collaborator; this module pins down the exact message shape and the
//! operations the relay consumes from it.

use async_trait::async_trait;
use thiserror::Error;

pub type MessageId = u64;
pub type ChannelId = u64;
pub type UserId = u64;
pub type RoleId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Text,
    PublicThread,
    PrivateThread,
    Direct,
}

/// Platform-level message type; only ordinary and reply messages can act
/// as implicit same-author continuations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Default,
    Reply,
    /// Joins, pins, boosts and other service messages.
    System,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub url: String,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Embed {
    pub description: Option<String>,
}

/// One raw inbound chat message.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub channel_kind: ChannelKind,
    /// For thread channels, the channel the thread was opened in.
    pub parent_channel_id: Option<ChannelId>,
    pub kind: MessageKind,
    pub author_id: UserId,
    pub author_is_bot: bool,
    pub author_role_ids: Vec<RoleId>,
    pub body: String,
    /// Whether the bot appears in the message's mention list.
    pub mentions_me: bool,
    pub attachments: Vec<Attachment>,
    pub embeds: Vec<Embed>,
    /// Explicit reply reference, if any.
    pub reply_to: Option<MessageId>,
    /// The referenced message, when the platform already had it cached.
    pub referenced_cached: Option<Box<InboundMessage>>,
}

/// Styled outbound content: a description rendered in a rich embed, an
/// accent color and a list of named warning fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyledContent {
    pub description: String,
    pub color: u32,
    pub fields: Vec<String>,
}

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("message {1} not found in channel {0}")]
    NotFound(ChannelId, MessageId),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Operations the relay consumes from the chat platform.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// The bot's own user id; messages it authored get the assistant role.
    fn bot_user_id(&self) -> UserId;

    /// Fetches a message by id within a channel.
    async fn fetch_message(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> Result<InboundMessage, PlatformError>;

    /// Fetches the single message immediately preceding `before` in a
    /// channel, if any.
    async fn previous_message(
        &self,
        channel_id: ChannelId,
        before: MessageId,
    ) -> Result<Option<InboundMessage>, PlatformError>;

    /// Fetches the message a thread was started from.
    async fn thread_starter(&self, thread_id: ChannelId) -> Result<InboundMessage, PlatformError>;

    /// Sends a plain-text reply, returning the new message's id.
    async fn reply_plain(
        &self,
        channel_id: ChannelId,
        reply_to: MessageId,
        text: &str,
    ) -> Result<MessageId, PlatformError>;

    /// Sends a styled reply, returning the new message's id.
    async fn reply_styled(
        &self,
        channel_id: ChannelId,
        reply_to: MessageId,
        content: &StyledContent,
    ) -> Result<MessageId, PlatformError>;

    /// Replaces the styled content of a previously sent message.
    async fn edit_styled(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        content: &StyledContent,
    ) -> Result<(), PlatformError>;
}
