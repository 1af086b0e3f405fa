//! Caller-visible output units and their update-wins assembly.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use crate::event::{Part, PartKind};

/// One unit of a turn delivered to the caller.
///
/// Exactly one of `content`, `thinking`, `part` is set on a part fragment.
/// The terminal fragment has `done = true` and carries `error` when the turn
/// failed. A fragment with `is_update = true` replaces the earlier fragment
/// with the same `part_id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResponseFragment {
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    /// Full payload of a non-text part.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub part: Option<Value>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub part_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub part_type: String,
    pub is_update: bool,
    pub done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResponseFragment {
    /// Fragment for a surfaced part. `None` for operational parts.
    pub fn from_part(session_id: &str, part: &Part, is_update: bool) -> Option<Self> {
        let mut frag = Self {
            session_id: session_id.to_string(),
            part_id: part.id.clone(),
            part_type: part.part_type.clone(),
            is_update,
            ..Self::default()
        };
        match part.kind {
            PartKind::Text => frag.content = Some(part.text.clone()),
            PartKind::Reasoning => frag.thinking = Some(part.text.clone()),
            PartKind::Opaque => frag.part = Some(part.raw.clone()),
            PartKind::Operational => return None,
        }
        Some(frag)
    }

    pub fn done(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            done: true,
            ..Self::default()
        }
    }

    pub fn failed(session_id: &str, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::done(session_id)
        }
    }
}

/// Folds a fragment sequence into its final state.
///
/// Later fragments for a part id replace earlier ones; parts keep the order
/// in which their id was first seen.
#[derive(Debug, Default)]
pub struct FragmentAssembler {
    order: Vec<String>,
    parts: HashMap<String, ResponseFragment>,
    done: bool,
    error: Option<String>,
}

impl FragmentAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, frag: ResponseFragment) {
        if frag.done {
            self.done = true;
            self.error = frag.error;
            return;
        }
        if frag.part_id.is_empty() {
            return;
        }
        if !self.parts.contains_key(&frag.part_id) {
            self.order.push(frag.part_id.clone());
        }
        self.parts.insert(frag.part_id.clone(), frag);
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Final fragments in first-seen order.
    pub fn fragments(&self) -> impl Iterator<Item = &ResponseFragment> {
        self.order.iter().filter_map(|id| self.parts.get(id))
    }

    /// Text parts joined in order.
    pub fn text(&self) -> String {
        self.fragments()
            .filter_map(|f| f.content.as_deref())
            .filter(|t| !t.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn thinking(&self) -> String {
        self.fragments()
            .filter_map(|f| f.thinking.as_deref())
            .filter(|t| !t.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// One line per tool part: `🔧 name (status)`.
    pub fn tool_summaries(&self) -> Vec<String> {
        self.fragments()
            .filter(|f| f.part_type == "tool")
            .filter_map(|f| f.part.as_ref())
            .map(|raw| {
                let name = raw.get("tool").and_then(Value::as_str).unwrap_or("tool");
                match raw.pointer("/state/status").and_then(Value::as_str) {
                    Some(status) => format!("🔧 {name} ({status})"),
                    None => format!("🔧 {name}"),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text(id: &str, t: &str, is_update: bool) -> ResponseFragment {
        let part = Part::from_value(json!({"id": id, "type": "text", "text": t})).unwrap();
        ResponseFragment::from_part("s1", &part, is_update).unwrap()
    }

    fn tool(id: &str, status: &str) -> ResponseFragment {
        let part = Part::from_value(json!({
            "id": id, "type": "tool", "tool": "bash",
            "state": {"status": status}
        }))
        .unwrap();
        ResponseFragment::from_part("s1", &part, true).unwrap()
    }

    #[test]
    fn operational_parts_produce_nothing() {
        let part = Part::from_value(json!({"id": "x", "type": "step-start"})).unwrap();
        assert!(ResponseFragment::from_part("s1", &part, false).is_none());
    }

    #[test]
    fn updates_replace_in_place() {
        let mut asm = FragmentAssembler::new();
        asm.apply(text("p1", "Hel", false));
        asm.apply(text("p2", "World", false));
        asm.apply(text("p1", "Hello", true));
        asm.apply(ResponseFragment::done("s1"));

        assert!(asm.is_done());
        assert_eq!(asm.error(), None);
        assert_eq!(asm.text(), "Hello\n\nWorld");
        assert_eq!(asm.fragments().count(), 2);
    }

    #[test]
    fn tool_summary_uses_latest_state() {
        let mut asm = FragmentAssembler::new();
        asm.apply(tool("t1", "running"));
        asm.apply(tool("t1", "completed"));
        assert_eq!(asm.tool_summaries(), vec!["🔧 bash (completed)".to_string()]);
    }

    #[test]
    fn failure_is_terminal_with_error() {
        let mut asm = FragmentAssembler::new();
        asm.apply(ResponseFragment::failed("s1", "boom"));
        assert!(asm.is_done());
        assert_eq!(asm.error(), Some("boom"));
    }

    #[test]
    fn serializes_only_present_fields() {
        let v = serde_json::to_value(text("p1", "hi", false)).unwrap();
        assert_eq!(
            v,
            json!({
                "session_id": "s1", "content": "hi", "part_id": "p1",
                "part_type": "text", "is_update": false, "done": false
            })
        );
    }
}
