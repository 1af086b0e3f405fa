//! In-memory backend used by the engine's unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::client::BackendApi;
use crate::connection::{EventByteStream, EventTransport};
use crate::error::EngineError;
use crate::event::BackendEvent;
use crate::multiplexer::Multiplexer;
use crate::types::{MessageEnvelope, MessageInfo, SendRequest, SessionInfo, SessionTime};

pub(crate) fn msg(id: &str, role: &str, parts: Vec<Value>) -> MessageEnvelope {
    MessageEnvelope {
        info: MessageInfo {
            id: id.to_string(),
            role: role.to_string(),
            session_id: "s1".to_string(),
        },
        parts,
    }
}

pub(crate) fn text_part(id: &str, message: &str, text: &str) -> Value {
    json!({"id": id, "sessionID": "s1", "messageID": message, "type": "text", "text": text})
}

pub(crate) fn part_event(raw: Value) -> BackendEvent {
    BackendEvent::from_value(&json!({
        "type": "message.part.updated",
        "properties": {"part": raw}
    }))
    .expect("valid part event")
}

pub(crate) fn idle_event(session: &str) -> BackendEvent {
    BackendEvent::SessionIdle {
        session_id: session.to_string(),
    }
}

/// Scripted backend.
///
/// `send_message` dispatches `send_events` into the attached multiplexer,
/// then returns the scripted result. `list_messages` serves the last `limit`
/// entries of `history`.
#[derive(Default)]
pub(crate) struct FakeBackend {
    pub history: Mutex<Vec<MessageEnvelope>>,
    pub send_events: Mutex<Vec<BackendEvent>>,
    pub send_result: Mutex<Option<Result<MessageEnvelope, EngineError>>>,
    /// `send_message` never returns.
    pub send_hangs: AtomicBool,
    pub fail_list: AtomicBool,
    pub mux: Mutex<Option<Arc<Multiplexer>>>,
    pub sessions: Mutex<Vec<SessionInfo>>,
    pub aborted: Mutex<Vec<String>>,
    pub sent: Mutex<Vec<(String, SendRequest)>>,
    list_calls: Mutex<Vec<usize>>,
    created: AtomicUsize,
}

impl FakeBackend {
    pub fn with_history(history: Vec<MessageEnvelope>) -> Self {
        let fake = Self::default();
        *fake.history.lock().unwrap() = history;
        fake
    }

    /// A backend whose send produces `events` on the stream, answers with
    /// `anchor`, and whose history is `history`.
    pub fn scripted(
        mux: &Arc<Multiplexer>,
        events: Vec<BackendEvent>,
        anchor: &str,
        history: Vec<MessageEnvelope>,
    ) -> Self {
        let anchor_env = history
            .iter()
            .find(|m| m.info.id == anchor)
            .cloned()
            .unwrap_or_else(|| msg(anchor, "assistant", vec![]));
        let fake = Self::with_history(history);
        *fake.send_events.lock().unwrap() = events;
        *fake.send_result.lock().unwrap() = Some(Ok(anchor_env));
        *fake.mux.lock().unwrap() = Some(Arc::clone(mux));
        fake
    }

    pub fn list_calls(&self) -> Vec<usize> {
        self.list_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl BackendApi for FakeBackend {
    async fn create_session(&self, title: Option<&str>) -> Result<SessionInfo, EngineError> {
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        let info = SessionInfo {
            id: format!("ses-{n}"),
            title: title.unwrap_or_default().to_string(),
            parent_id: None,
            time: SessionTime {
                created: n as i64,
                updated: n as i64,
            },
        };
        self.sessions.lock().unwrap().push(info.clone());
        Ok(info)
    }

    async fn list_sessions(&self) -> Result<Vec<SessionInfo>, EngineError> {
        Ok(self.sessions.lock().unwrap().clone())
    }

    async fn get_session(&self, session_id: &str) -> Result<SessionInfo, EngineError> {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.id == session_id)
            .cloned()
            .ok_or(EngineError::Api {
                status: 404,
                message: "session not found".into(),
            })
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), EngineError> {
        self.sessions.lock().unwrap().retain(|s| s.id != session_id);
        Ok(())
    }

    async fn abort_session(&self, session_id: &str) -> Result<(), EngineError> {
        self.aborted.lock().unwrap().push(session_id.to_string());
        Ok(())
    }

    async fn send_message(
        &self,
        session_id: &str,
        req: &SendRequest,
    ) -> Result<MessageEnvelope, EngineError> {
        self.sent
            .lock()
            .unwrap()
            .push((session_id.to_string(), req.clone()));
        if self.send_hangs.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let mux = self.mux.lock().unwrap().clone();
        let events = std::mem::take(&mut *self.send_events.lock().unwrap());
        if let Some(mux) = mux {
            for event in events {
                mux.dispatch(event);
            }
        }
        self.send_result
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Err(EngineError::Unavailable("no scripted reply".into())))
    }

    async fn list_messages(
        &self,
        _session_id: &str,
        limit: usize,
    ) -> Result<Vec<MessageEnvelope>, EngineError> {
        self.list_calls.lock().unwrap().push(limit);
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(EngineError::Api {
                status: 500,
                message: "history unavailable".into(),
            });
        }
        let history = self.history.lock().unwrap();
        let skip = history.len().saturating_sub(limit);
        Ok(history[skip..].to_vec())
    }
}

/// Event transport that either holds one silent connection open or refuses
/// every attempt.
pub(crate) struct StaticTransport {
    pub accept: bool,
}

#[async_trait]
impl EventTransport for StaticTransport {
    async fn open(&self) -> Result<EventByteStream, EngineError> {
        if self.accept {
            Ok(Box::pin(futures_util::stream::pending()))
        } else {
            Err(EngineError::Unavailable("refused".into()))
        }
    }
}
