pub mod backoff;
pub mod client;
pub mod connection;
pub mod engine;
pub mod error;
pub mod event;
pub mod fragment;
pub mod multiplexer;
pub mod pipeline;
pub mod reconcile;
pub mod sse;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use client::{BackendApi, OpencodeClient};
pub use connection::{ConnectionManager, EventTransport};
pub use engine::{ConversationEngine, Engine, EngineSettings};
pub use error::EngineError;
pub use event::{BackendEvent, Part, PartKind};
pub use fragment::{FragmentAssembler, ResponseFragment};
pub use multiplexer::{Multiplexer, Subscription, GLOBAL_SESSION};
pub use types::{MessageEnvelope, SendRequest, SessionInfo};
