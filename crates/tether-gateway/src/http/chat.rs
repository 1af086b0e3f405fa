//! Chat endpoints: POST /chat and POST /chat/stream
//!
//! Both route through the same channel-session mapping as the chat
//! surfaces, under provider `http`. The optional `channel` field picks
//! which mapping to use, so separate scripts can hold separate sessions.
//!
//! Request:  `{"channel": "cli", "message": "hello"}`
//! Response: `{"reply": "...", "session_id": "ses_..."}`
//! Stream:   one SSE `data:` line per response fragment (JSON)
//! Error:    `{"error": "..."}`

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use tether_channels::InboundMessage;
use tracing::warn;

use crate::app::AppState;
use crate::http::auth::require_auth;

/// Provider name for messages arriving over HTTP.
pub const HTTP_PROVIDER: &str = "http";

/// Channel used when the request names none.
pub const DEFAULT_CHANNEL: &str = "default";

#[derive(Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub channel: Option<String>,
    pub message: String,
}

impl ChatRequest {
    fn inbound(&self) -> InboundMessage {
        let channel = self
            .channel
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_CHANNEL);
        InboundMessage::new(HTTP_PROVIDER, channel, self.message.clone())
    }
}

#[derive(Serialize)]
pub struct ChatReply {
    pub reply: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Serialize)]
pub struct ChatError {
    pub error: String,
}

impl ChatError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

pub(crate) type HandlerError = (StatusCode, Json<ChatError>);

fn validate(req: &ChatRequest) -> Result<(), HandlerError> {
    if req.message.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ChatError::new("message cannot be empty")),
        ));
    }
    Ok(())
}

/// POST /chat: answer one message and return the rendered reply.
pub async fn chat_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatReply>, HandlerError> {
    require_auth(&state, &headers)?;
    validate(&req)?;

    let reply = state.router.respond(&req.inbound()).await;
    Ok(Json(ChatReply {
        reply: reply.text,
        session_id: reply.session_id,
    }))
}

/// POST /chat/stream: forward the turn's fragments as they arrive.
pub async fn chat_stream_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, HandlerError> {
    require_auth(&state, &headers)?;
    validate(&req)?;

    let (_session_id, mut rx) = state.router.open_stream(&req.inbound()).await.map_err(|e| {
        warn!(error = %e, "POST /chat/stream failed");
        (StatusCode::BAD_GATEWAY, Json(ChatError::new(e.to_string())))
    })?;

    let stream = async_stream::stream! {
        while let Some(frag) = rx.recv().await {
            let done = frag.done;
            let json = serde_json::to_string(&frag).unwrap_or_default();
            yield Ok(Event::default().data(json));
            if done {
                break;
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
