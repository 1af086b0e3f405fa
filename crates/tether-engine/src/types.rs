use serde::{Deserialize, Serialize};
use serde_json::Value;
use tether_core::config::ModelSelector;

/// A conversation held by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "parentID", default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub time: SessionTime,
}

/// Millisecond timestamps reported by the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionTime {
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub updated: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageInfo {
    pub id: String,
    #[serde(default)]
    pub role: String,
    #[serde(rename = "sessionID", default)]
    pub session_id: String,
}

/// One message with its parts, as returned by send and history calls.
/// Parts stay raw; they are classified by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub info: MessageInfo,
    #[serde(default)]
    pub parts: Vec<Value>,
}

impl MessageEnvelope {
    pub fn is_user(&self) -> bool {
        self.info.role == "user"
    }

    pub fn is_assistant(&self) -> bool {
        self.info.role == "assistant"
    }
}

/// Outbound user message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SendRequest {
    pub content: String,
    pub system: Option<String>,
    pub model: Option<ModelSelector>,
}

impl SendRequest {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    /// Request body for `POST /session/{id}/message`.
    pub fn to_body(&self) -> Value {
        let mut body = serde_json::json!({
            "parts": [{ "type": "text", "text": self.content }],
        });
        if let Some(system) = self.system.as_deref().filter(|s| !s.is_empty()) {
            body["system"] = Value::String(system.to_string());
        }
        if let Some(model) = &self.model {
            body["model"] = serde_json::json!({
                "providerID": model.provider_id,
                "modelID": model.model_id,
            });
        }
        body
    }
}
