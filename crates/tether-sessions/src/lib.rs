pub mod error;
pub mod registry;
pub mod store;
pub mod types;

pub use error::RegistryError;
pub use registry::SessionRegistry;
pub use types::{ChannelSession, RegistryFile};
