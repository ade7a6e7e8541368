//! Relay between a chat platform and a streaming LLM completion endpoint.
//!
//! An inbound chat event is expanded into a bounded conversational context
//! by walking backward through the message graph (explicit replies, thread
//! parents, or implicit same-author continuations), memoized per message in
//! a lock-guarded [`NodeCache`]. The context is forwarded to a streaming
//! completion API and the answer is republished into the chat as one or
//! more live-updating messages, which are themselves registered in the
//! cache so future replies can continue the conversation.
//!
//! The cache is memory-resident and disposable; a capacity evictor trims
//! the oldest entries after each response cycle. Platform connection and
//! authentication are external: embedders implement [`ChatPlatform`] and
//! feed inbound messages to [`RelayHandler::handle_message`].

mod cache;
mod chain;
mod config;
mod error;
mod extract;
mod handler;
mod platform;
mod respond;

pub use cache::{NextLink, NodeCache, NodeHandle, NodeState};
pub use chain::{ChainResolver, ResolvedChain};
pub use config::{Config, ProviderConfig};
pub use error::RelayError;
pub use extract::{AttachmentFetcher, ContentExtractor, Extracted, FetchError, HttpFetcher};
pub use handler::RelayHandler;
pub use platform::{
    Attachment, ChannelId, ChannelKind, ChatPlatform, Embed, InboundMessage, MessageId,
    MessageKind, PlatformError, RoleId, StyledContent, UserId,
};
pub use respond::{
    EMBED_COLOR_COMPLETE, EMBED_COLOR_INCOMPLETE, PLAIN_MAX_LENGTH, ResponseDispatcher,
    STREAMING_INDICATOR, STYLED_MAX_LENGTH,
};
