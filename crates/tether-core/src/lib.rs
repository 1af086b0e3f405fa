pub mod config;
pub mod error;
pub mod types;

pub use config::TetherConfig;
pub use error::{Result, TetherError};
pub use types::ChannelKey;
