pub mod channel;
pub mod chunk;
pub mod commands;
pub mod error;
pub mod render;
pub mod router;
pub mod types;

pub use channel::Channel;
pub use chunk::split_chunks;
pub use commands::Command;
pub use error::ChannelError;
pub use render::render_reply;
pub use router::{MessageRouter, Reply};
pub use types::{InboundMessage, OutboundMessage};
