//! The engine facade: one event connection, one multiplexer, and a send
//! pipeline per message, all owned by a single cancellable context.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tether_core::config::{ModelSelector, TetherConfig};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::client::{BackendApi, OpencodeClient};
use crate::connection::{ConnectionManager, EventTransport};
use crate::error::EngineError;
use crate::fragment::ResponseFragment;
use crate::multiplexer::Multiplexer;
use crate::pipeline::SendPipeline;
use crate::types::{SendRequest, SessionInfo};

/// Fragments buffered between a pipeline and its caller.
const FRAGMENT_QUEUE: usize = 64;

/// The conversation surface the routing layer talks to.
#[async_trait]
pub trait ConversationEngine: Send + Sync {
    /// `true` while live events are flowing (streaming path in use).
    fn is_connected(&self) -> bool;

    /// Send `content` to `session_id`. The receiver yields the turn's
    /// fragments and ends after the `done` fragment.
    fn send(&self, session_id: &str, content: &str) -> mpsc::Receiver<ResponseFragment>;

    async fn create_session(&self, title: Option<&str>) -> Result<SessionInfo, EngineError>;

    async fn list_sessions(&self) -> Result<Vec<SessionInfo>, EngineError>;

    async fn get_session(&self, session_id: &str) -> Result<SessionInfo, EngineError>;

    async fn delete_session(&self, session_id: &str) -> Result<(), EngineError>;

    async fn abort(&self, session_id: &str) -> Result<(), EngineError>;
}

/// Engine tuning, usually taken from the `[engine]` and `[backend]` config.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub subscription_capacity: usize,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    pub poll_limits: Vec<usize>,
    pub system_prompt: Option<String>,
    pub model: Option<ModelSelector>,
}

impl EngineSettings {
    pub fn from_config(config: &TetherConfig) -> Self {
        Self {
            subscription_capacity: config.engine.subscription_capacity,
            backoff_initial: Duration::from_millis(config.engine.backoff_initial_ms),
            backoff_max: Duration::from_millis(config.engine.backoff_max_ms),
            poll_limits: config.engine.poll_limits.clone(),
            system_prompt: config.backend.system_prompt.clone(),
            model: config.backend.model.clone(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&TetherConfig::default())
    }
}

pub struct Engine {
    api: Arc<dyn BackendApi>,
    mux: Arc<Multiplexer>,
    connection: ConnectionManager,
    pipeline: SendPipeline,
    settings: EngineSettings,
    /// Parent of every pipeline's token; replaced on `start`, cancelled on `stop`.
    cancel: Mutex<CancellationToken>,
}

impl Engine {
    pub fn new(
        api: Arc<dyn BackendApi>,
        transport: Arc<dyn EventTransport>,
        settings: EngineSettings,
    ) -> Self {
        let mux = Arc::new(Multiplexer::new(settings.subscription_capacity));
        let connection = ConnectionManager::new(
            transport,
            Arc::clone(&mux),
            settings.backoff_initial,
            settings.backoff_max,
        );
        let pipeline = SendPipeline::new(
            Arc::clone(&api),
            Arc::clone(&mux),
            settings.poll_limits.clone(),
        );
        Self {
            api,
            mux,
            connection,
            pipeline,
            settings,
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Engine talking HTTP to the configured backend.
    pub fn from_config(config: &TetherConfig) -> Self {
        let client = Arc::new(OpencodeClient::new(&config.backend));
        Self::new(
            Arc::clone(&client) as Arc<dyn BackendApi>,
            client,
            EngineSettings::from_config(config),
        )
    }

    /// Start the event connection. Cancelling `token` stops it and aborts
    /// every in-flight send.
    pub fn start(&self, token: &CancellationToken) {
        let child = token.child_token();
        *self.cancel.lock().unwrap_or_else(PoisonError::into_inner) = child.clone();
        self.connection.start(&child);
        info!(
            capacity = self.settings.subscription_capacity,
            "event connection started"
        );
    }

    pub fn stop(&self) {
        self.connection.stop();
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
        info!("engine stopped");
    }

    pub fn multiplexer(&self) -> Arc<Multiplexer> {
        Arc::clone(&self.mux)
    }

    fn request(&self, content: &str) -> SendRequest {
        SendRequest {
            content: content.to_string(),
            system: self.settings.system_prompt.clone(),
            model: self.settings.model.clone(),
        }
    }
}

#[async_trait]
impl ConversationEngine for Engine {
    fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    fn send(&self, session_id: &str, content: &str) -> mpsc::Receiver<ResponseFragment> {
        let (tx, rx) = mpsc::channel(FRAGMENT_QUEUE);
        let req = self.request(content);
        let pipeline = self.pipeline.clone();
        let cancel = self
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .child_token();
        let session_id = session_id.to_string();
        let streaming = self.is_connected();

        info!(
            session = %session_id,
            mode = if streaming { "streaming" } else { "blocking" },
            "sending message"
        );
        tokio::spawn(async move {
            if streaming {
                pipeline.run_streaming(&session_id, req, tx, cancel).await;
            } else {
                pipeline.run_blocking(&session_id, req, tx, cancel).await;
            }
        });
        rx
    }

    async fn create_session(&self, title: Option<&str>) -> Result<SessionInfo, EngineError> {
        let info = self.api.create_session(title).await?;
        info!(session = %info.id, "session created");
        Ok(info)
    }

    async fn list_sessions(&self) -> Result<Vec<SessionInfo>, EngineError> {
        self.api.list_sessions().await
    }

    async fn get_session(&self, session_id: &str) -> Result<SessionInfo, EngineError> {
        self.api.get_session(session_id).await
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), EngineError> {
        self.api.delete_session(session_id).await
    }

    async fn abort(&self, session_id: &str) -> Result<(), EngineError> {
        self.api.abort_session(session_id).await?;
        info!(session = %session_id, "turn aborted");
        Ok(())
    }
}
