use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use tether_core::config::BackendConfig;
use tracing::{debug, warn};

use crate::connection::{EventByteStream, EventTransport};
use crate::error::EngineError;
use crate::types::{MessageEnvelope, SendRequest, SessionInfo};

/// Request/response surface of the conversational backend.
#[async_trait]
pub trait BackendApi: Send + Sync {
    async fn create_session(&self, title: Option<&str>) -> Result<SessionInfo, EngineError>;

    async fn list_sessions(&self) -> Result<Vec<SessionInfo>, EngineError>;

    async fn get_session(&self, session_id: &str) -> Result<SessionInfo, EngineError>;

    async fn delete_session(&self, session_id: &str) -> Result<(), EngineError>;

    /// Stop the session's in-flight turn.
    async fn abort_session(&self, session_id: &str) -> Result<(), EngineError>;

    /// Post a user message. Returns once the backend has produced the
    /// assistant message, whose id anchors the turn.
    async fn send_message(
        &self,
        session_id: &str,
        req: &SendRequest,
    ) -> Result<MessageEnvelope, EngineError>;

    /// The `limit` most recent messages, oldest first.
    async fn list_messages(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<MessageEnvelope>, EngineError>;
}

/// HTTP client for an OpenCode-style backend server.
pub struct OpencodeClient {
    client: reqwest::Client,
    base_url: String,
    username: String,
    password: Option<String>,
    request_timeout: Duration,
}

impl OpencodeClient {
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone().filter(|p| !p.is_empty()),
            request_timeout: Duration::from_secs(config.request_timeout_secs.max(1)),
        }
    }

    /// `base_url` plus `segments`, each percent-encoded as a single path
    /// segment so ids from chat input cannot rewrite the path or query.
    fn endpoint(&self, segments: &[&str]) -> Result<reqwest::Url, EngineError> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| EngineError::Parse(format!("invalid backend url {}: {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|()| EngineError::Parse(format!("backend url {} cannot have a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.password {
            Some(password) => builder.basic_auth(&self.username, Some(password)),
            None => builder,
        }
    }

    /// Attach auth and the REST timeout, send, and reject non-2xx responses.
    async fn execute(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, EngineError> {
        let resp = self
            .authed(builder)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(map_send_error)?;
        check_status(resp).await
    }

    async fn json<T: DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<T, EngineError> {
        self.execute(builder)
            .await?
            .json()
            .await
            .map_err(|e| EngineError::Parse(e.to_string()))
    }
}

#[async_trait]
impl BackendApi for OpencodeClient {
    async fn create_session(&self, title: Option<&str>) -> Result<SessionInfo, EngineError> {
        let body = match title {
            Some(t) => serde_json::json!({ "title": t }),
            None => serde_json::json!({}),
        };
        let info: SessionInfo = self
            .json(self.client.post(self.endpoint(&["session"])?).json(&body))
            .await?;
        debug!(session = %info.id, "session created");
        Ok(info)
    }

    async fn list_sessions(&self) -> Result<Vec<SessionInfo>, EngineError> {
        self.json(self.client.get(self.endpoint(&["session"])?)).await
    }

    async fn get_session(&self, session_id: &str) -> Result<SessionInfo, EngineError> {
        self.json(self.client.get(self.endpoint(&["session", session_id])?))
            .await
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), EngineError> {
        self.execute(
            self.client
                .delete(self.endpoint(&["session", session_id])?),
        )
        .await?;
        Ok(())
    }

    async fn abort_session(&self, session_id: &str) -> Result<(), EngineError> {
        self.execute(
            self.client
                .post(self.endpoint(&["session", session_id, "abort"])?),
        )
        .await?;
        Ok(())
    }

    async fn send_message(
        &self,
        session_id: &str,
        req: &SendRequest,
    ) -> Result<MessageEnvelope, EngineError> {
        debug!(session = %session_id, len = req.content.len(), "sending message");
        self.json(
            self.client
                .post(self.endpoint(&["session", session_id, "message"])?)
                .json(&req.to_body()),
        )
        .await
    }

    async fn list_messages(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<MessageEnvelope>, EngineError> {
        self.json(
            self.client
                .get(self.endpoint(&["session", session_id, "message"])?)
                .query(&[("limit", limit)]),
        )
        .await
    }
}

#[async_trait]
impl EventTransport for OpencodeClient {
    /// `GET /event`. No timeout: the stream stays open until the backend
    /// closes it or the connection drops.
    async fn open(&self) -> Result<EventByteStream, EngineError> {
        let builder = self
            .client
            .get(self.endpoint(&["event"])?)
            .header("accept", "text/event-stream");
        let resp = self
            .authed(builder)
            .send()
            .await
            .map_err(map_send_error)?;
        let resp = check_status(resp).await?;

        let stream = resp
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(EngineError::from));
        Ok(Box::pin(stream))
    }
}

/// Connection failures and timeouts are reported as `Unavailable` so callers
/// can tell an outage apart from a rejected request.
fn map_send_error(e: reqwest::Error) -> EngineError {
    if e.is_connect() || e.is_timeout() {
        EngineError::Unavailable(e.to_string())
    } else {
        EngineError::Http(e)
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, EngineError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let text = resp.text().await.unwrap_or_default();
    warn!(status, body = %text, "backend API error");
    Err(EngineError::Api {
        status,
        message: text,
    })
}
