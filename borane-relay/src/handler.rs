//! Per-event orchestration: admission, context resolution, completion
//! streaming, response dispatch and cache eviction.

use chrono::Local;
use tokio::time::Duration;
use tracing::{error, info};

use borane_openai::{ChatClient, ChatMessage, ChatRequest, MessageContent, Role};

use crate::cache::NodeCache;
use crate::chain::ChainResolver;
use crate::config::Config;
use crate::error::RelayError;
use crate::extract::{AttachmentFetcher, ContentExtractor};
use crate::platform::{ChannelKind, ChatPlatform, InboundMessage};
use crate::respond::ResponseDispatcher;

/// Relays inbound chat events to the completion endpoint and back.
///
/// One handler per process; it owns the node cache and is shared across
/// concurrently handled events.
pub struct RelayHandler<P, F> {
    config: Config,
    platform: P,
    client: ChatClient,
    cache: NodeCache,
    extractor: ContentExtractor<F>,
    bot_mention: String,
}

impl<P: ChatPlatform, F: AttachmentFetcher> RelayHandler<P, F> {
    pub fn new(config: Config, platform: P, fetcher: F) -> Result<Self, RelayError> {
        let (provider, _) = config.provider_and_model();
        let provider_config = config
            .providers
            .get(provider)
            .ok_or_else(|| RelayError::UnknownProvider(provider.to_string()))?;
        let api_key = provider_config.resolve_api_key(provider);
        let client = ChatClient::with_base_url(api_key, provider_config.base_url.clone());

        let bot_mention = format!("<@{}>", platform.bot_user_id());
        let extractor = ContentExtractor::new(
            fetcher,
            config.max_text,
            config.effective_max_images(),
            bot_mention.clone(),
        );
        let cache = NodeCache::new(config.max_message_nodes);

        Ok(Self {
            config,
            platform,
            client,
            cache,
            extractor,
            bot_mention,
        })
    }

    pub fn cache(&self) -> &NodeCache {
        &self.cache
    }

    /// Handles one inbound message end to end.
    ///
    /// All failures are handled here: a failed completion or send is logged
    /// and the event is dropped, nothing propagates to the caller.
    pub async fn handle_message(&self, msg: InboundMessage) {
        if !self.admits(&msg) {
            return;
        }

        let resolver = ChainResolver::new(
            &self.cache,
            &self.platform,
            &self.extractor,
            self.config.max_messages,
            self.config.max_text,
            self.config.effective_max_images(),
            self.config.accepts_names(),
            self.bot_mention.clone(),
        );
        let chain = resolver.resolve(&msg).await;

        info!(
            author = msg.author_id,
            attachments = msg.attachments.len(),
            context = chain.messages.len(),
            "relaying message"
        );

        let mut messages = Vec::with_capacity(chain.messages.len() + 1);
        if let Some(system) = self.system_message() {
            messages.push(system);
        }
        messages.extend(chain.messages);

        let request = ChatRequest {
            model: self.config.model_name().to_string(),
            messages,
            extra_parameters: self.config.extra_api_parameters.clone(),
        };

        let stream = match self.client.stream_chat(&request).await {
            Ok(stream) => stream,
            Err(e) => {
                error!(error = %e, "failed to open completion stream");
                // Resolution already grew the cache; evict even on failure.
                self.cache.evict().await;
                return;
            }
        };

        let dispatcher = ResponseDispatcher::new(
            &self.platform,
            &self.cache,
            self.config.use_plain_responses,
            Duration::from_millis(self.config.edit_interval_ms),
            self.config.accepts_names(),
        );
        dispatcher.dispatch(&msg, &chain.warnings, stream).await;

        self.cache.evict().await;
    }

    /// Admission filter: who the bot answers at all.
    fn admits(&self, msg: &InboundMessage) -> bool {
        if msg.author_is_bot {
            return false;
        }
        if msg.channel_kind != ChannelKind::Direct && !msg.mentions_me {
            return false;
        }
        if !self.config.allowed_channel_ids.is_empty() {
            let allowed = self.config.allowed_channel_ids.contains(&msg.channel_id)
                || msg
                    .parent_channel_id
                    .is_some_and(|parent| self.config.allowed_channel_ids.contains(&parent));
            if !allowed {
                return false;
            }
        }
        if !self.config.allowed_role_ids.is_empty() {
            // Role filters cannot be checked in direct messages.
            if msg.channel_kind == ChannelKind::Direct {
                return false;
            }
            if !msg
                .author_role_ids
                .iter()
                .any(|role| self.config.allowed_role_ids.contains(role))
            {
                return false;
            }
        }
        true
    }

    fn system_message(&self) -> Option<ChatMessage> {
        if self.config.system_prompt.is_empty() {
            return None;
        }

        let mut lines = vec![self.config.system_prompt.clone()];
        lines.push(format!(
            "Today's date: {}.",
            Local::now().format("%B %d %Y")
        ));
        if self.config.accepts_names() {
            lines.push("User's names are their chat IDs and should be typed as '<@ID>'.".to_string());
        }

        Some(ChatMessage {
            role: Role::System,
            content: MessageContent::Text(lines.join("\n")),
            name: None,
        })
    }
}
