//! Typed backend events, decoded once at the wire boundary.
//!
//! Everything downstream of the connection manager matches on
//! [`BackendEvent`]; event type strings never leave this module.

use serde_json::Value;

/// How a part is surfaced to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartKind {
    /// Assistant prose.
    Text,
    /// Reasoning / thinking text.
    Reasoning,
    /// Step boundaries. Never shown.
    Operational,
    /// Tool calls, files, snapshots, patches and anything newer.
    /// Forwarded verbatim because each variant carries its own fields.
    Opaque,
}

impl PartKind {
    pub fn classify(part_type: &str) -> Self {
        match part_type {
            "text" => PartKind::Text,
            "reasoning" | "thinking" => PartKind::Reasoning,
            "step-start" | "step-finish" => PartKind::Operational,
            _ => PartKind::Opaque,
        }
    }
}

/// The smallest identifiable unit of assistant output.
#[derive(Debug, Clone, PartialEq)]
pub struct Part {
    pub id: String,
    pub session_id: String,
    pub message_id: String,
    pub part_type: String,
    pub kind: PartKind,
    /// Accumulated text for text/reasoning parts; empty otherwise.
    pub text: String,
    /// The full payload as received.
    pub raw: Value,
}

impl Part {
    /// Build a part from its raw payload. Parts without an id are unusable
    /// for de-duplication and are rejected.
    pub fn from_value(raw: Value) -> Option<Self> {
        let id = str_field(&raw, "id")?.to_string();
        let part_type = str_field(&raw, "type").unwrap_or("text").to_string();
        Some(Self {
            session_id: str_field(&raw, "sessionID").unwrap_or_default().to_string(),
            message_id: str_field(&raw, "messageID").unwrap_or_default().to_string(),
            kind: PartKind::classify(&part_type),
            text: raw
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            id,
            part_type,
            raw,
        })
    }
}

/// One event from the backend's event stream.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    /// Handshake sent by the backend right after the stream opens.
    ServerConnected,
    PartUpdated {
        session_id: String,
        part: Part,
        /// Newly appended text, when the backend reports it.
        delta: Option<String>,
    },
    MessageUpdated {
        session_id: String,
        message_id: String,
        role: String,
    },
    /// Authoritative "turn finished" signal.
    SessionIdle { session_id: String },
    SessionStatus { session_id: String, status: String },
    SessionError { session_id: String, message: String },
    /// Any other event type. Still routed so global subscribers can observe it.
    Unknown {
        event_type: String,
        session_id: Option<String>,
    },
}

impl BackendEvent {
    /// Decode one JSON payload. Returns `None` for anything that is not an
    /// object with a string `type`, or a recognised event missing the fields
    /// it needs.
    pub fn decode(payload: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(payload).ok()?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        let event_type = str_field(value, "type")?;
        let props = value.get("properties").unwrap_or(&Value::Null);

        let event = match event_type {
            "server.connected" => BackendEvent::ServerConnected,

            "message.part.updated" => {
                let part = Part::from_value(props.get("part")?.clone())?;
                let session_id = extract_session_id(value)?;
                let delta = props
                    .get("delta")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                BackendEvent::PartUpdated {
                    session_id,
                    part,
                    delta,
                }
            }

            "message.updated" => {
                let info = props.get("info")?;
                BackendEvent::MessageUpdated {
                    session_id: extract_session_id(value)?,
                    message_id: str_field(info, "id")?.to_string(),
                    role: str_field(info, "role").unwrap_or_default().to_string(),
                }
            }

            "session.idle" => BackendEvent::SessionIdle {
                session_id: extract_session_id(value)?,
            },

            "session.status" => {
                let session_id = extract_session_id(value)?;
                // `status` is either a bare string or `{ "type": "idle" | "busy" | ... }`.
                let status = match props.get("status") {
                    Some(Value::String(s)) => s.clone(),
                    Some(obj) => str_field(obj, "type").unwrap_or_default().to_string(),
                    None => String::new(),
                };
                if status == "idle" {
                    BackendEvent::SessionIdle { session_id }
                } else {
                    BackendEvent::SessionStatus { session_id, status }
                }
            }

            "session.error" => BackendEvent::SessionError {
                session_id: extract_session_id(value)?,
                message: error_message(props.get("error")),
            },

            other => BackendEvent::Unknown {
                event_type: other.to_string(),
                session_id: extract_session_id(value),
            },
        };
        Some(event)
    }

    /// Session this event belongs to, if any.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            BackendEvent::ServerConnected => None,
            BackendEvent::PartUpdated { session_id, .. }
            | BackendEvent::MessageUpdated { session_id, .. }
            | BackendEvent::SessionIdle { session_id }
            | BackendEvent::SessionStatus { session_id, .. }
            | BackendEvent::SessionError { session_id, .. } => Some(session_id),
            BackendEvent::Unknown { session_id, .. } => session_id.as_deref(),
        }
    }
}

/// Find the session id of a raw event.
///
/// Different event kinds put it in different places, so several locations
/// are tried in order: `properties.sessionID`, `properties.part.sessionID`,
/// `properties.info.sessionID`, then the top level.
pub fn extract_session_id(event: &Value) -> Option<String> {
    let props = event.get("properties");
    let candidates = [
        props.and_then(|p| p.get("sessionID")),
        props.and_then(|p| p.get("part")).and_then(|p| p.get("sessionID")),
        props.and_then(|p| p.get("info")).and_then(|i| i.get("sessionID")),
        event.get("sessionID"),
    ];
    candidates
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

fn error_message(error: Option<&Value>) -> String {
    match error {
        None => "unknown error".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(obj) => obj
            .pointer("/data/message")
            .and_then(Value::as_str)
            .or_else(|| str_field(obj, "message"))
            .or_else(|| str_field(obj, "name"))
            .map(str::to_string)
            .unwrap_or_else(|| obj.to_string()),
    }
}
