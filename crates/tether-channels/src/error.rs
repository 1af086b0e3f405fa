use tether_engine::EngineError;
use thiserror::Error;

/// Errors that can occur while routing a message or delivering its reply.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// A message could not be delivered to the remote endpoint.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// The conversational backend rejected or failed a call.
    #[error(transparent)]
    Engine(#[from] EngineError),
}
