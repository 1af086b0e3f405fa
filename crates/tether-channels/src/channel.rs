use async_trait::async_trait;

use crate::{error::ChannelError, types::OutboundMessage};

/// Outbound side of a chat surface adapter (Telegram, Discord, Slack, HTTP, …).
///
/// Implementations must be `Send + Sync` so the router can deliver replies
/// from any Tokio task.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Stable lowercase identifier for this surface (e.g. `"telegram"`).
    /// Also the provider half of the channel-session mapping key.
    fn name(&self) -> &str;

    /// Deliver a single outbound message.
    ///
    /// This is intentionally `&self` (shared reference) so that a connected
    /// adapter can send concurrently without a mutable borrow.
    async fn send(&self, msg: &OutboundMessage) -> Result<(), ChannelError>;
}
