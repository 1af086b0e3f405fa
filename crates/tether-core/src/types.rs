use serde::{Deserialize, Serialize};
use std::fmt;

/// Addresses one conversation destination on one chat surface.
///
/// Format: `{provider}:{channel_id}`, e.g. `discord:1234567890`.
/// The channel id may itself contain colons (thread ids, forum topics), so
/// parsing splits on the first colon only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelKey {
    /// Chat surface name (e.g. `"discord"`, `"telegram"`, `"http"`).
    pub provider: String,
    /// Platform-native destination id.
    pub channel_id: String,
}

impl ChannelKey {
    pub fn new(provider: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            channel_id: channel_id.into(),
        }
    }

    /// Canonical string form used as the key in the persisted mapping file.
    pub fn format(&self) -> String {
        format!("{}:{}", self.provider, self.channel_id)
    }

    pub fn parse(s: &str) -> Option<Self> {
        let (provider, channel_id) = s.split_once(':')?;
        if provider.is_empty() || channel_id.is_empty() {
            return None;
        }
        Some(Self::new(provider, channel_id))
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_joins_with_colon() {
        let key = ChannelKey::new("discord", "chan1");
        assert_eq!(key.format(), "discord:chan1");
        assert_eq!(key.to_string(), "discord:chan1");
    }

    #[test]
    fn parse_keeps_colons_in_channel_id() {
        let key = ChannelKey::parse("telegram:group_-100:7").expect("parse failed");
        assert_eq!(key.provider, "telegram");
        assert_eq!(key.channel_id, "group_-100:7");
    }

    #[test]
    fn parse_rejects_empty_components() {
        assert!(ChannelKey::parse("discord:").is_none());
        assert!(ChannelKey::parse(":chan").is_none());
        assert!(ChannelKey::parse("nocolon").is_none());
    }
}
