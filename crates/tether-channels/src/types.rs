use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tether_core::ChannelKey;

/// A message received from a chat surface (Telegram, Discord, HTTP, …).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Provider name (e.g. "telegram", "discord", "http").
    pub provider: String,

    /// Platform-native conversation identifier (chat ID, channel ID, …).
    /// Replies go back here, and it keys the session mapping.
    pub channel_id: String,

    /// Platform-native identifier for the sender.
    pub sender_id: String,

    /// Human-readable display name for the sender, if available.
    pub sender_name: Option<String>,

    /// Plain text content of the message.
    pub content: String,

    pub timestamp: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(
        provider: impl Into<String>,
        channel_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let channel_id = channel_id.into();
        Self {
            provider: provider.into(),
            sender_id: channel_id.clone(),
            channel_id,
            sender_name: None,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn key(&self) -> ChannelKey {
        ChannelKey::new(&self.provider, &self.channel_id)
    }
}

/// A message to be delivered to a chat surface.
///
/// `content` is Markdown; adapters convert it to their platform's markup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Provider name (e.g. "telegram", "discord").
    pub channel: String,

    /// Platform-native identifier for the destination conversation.
    pub recipient_id: String,

    pub content: String,
}
