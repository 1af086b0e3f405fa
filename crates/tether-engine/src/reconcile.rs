//! Turn extraction over polled history, and the gap-filling pass that
//! follows every streamed turn.

use std::collections::HashMap;

use tracing::debug;

use crate::client::BackendApi;
use crate::error::EngineError;
use crate::event::{Part, PartKind};
use crate::fragment::ResponseFragment;
use crate::types::MessageEnvelope;

/// The messages of one turn: everything after the nearest user message
/// preceding `anchor`, through `anchor` inclusive.
///
/// Returns `None` when the anchor is not in `messages`.
pub fn extract_turn<'a>(
    messages: &'a [MessageEnvelope],
    anchor: &str,
) -> Option<&'a [MessageEnvelope]> {
    let anchor_idx = messages.iter().position(|m| m.info.id == anchor)?;
    let start = messages[..anchor_idx]
        .iter()
        .rposition(MessageEnvelope::is_user)
        .map(|i| i + 1)
        .unwrap_or(0);
    Some(&messages[start..=anchor_idx])
}

/// Poll history with each limit in turn until the anchor's turn is fully
/// inside the window.
///
/// A window that holds the anchor but no preceding user message, and is
/// full, may have cut the turn short; the next limit is tried. The last
/// limit is accepted as is.
pub async fn fetch_turn(
    api: &dyn BackendApi,
    session_id: &str,
    anchor: &str,
    limits: &[usize],
) -> Result<Vec<MessageEnvelope>, EngineError> {
    for (i, &limit) in limits.iter().enumerate() {
        let last = i + 1 == limits.len();
        let messages = api.list_messages(session_id, limit).await?;
        let Some(turn) = extract_turn(&messages, anchor) else {
            debug!(session = %session_id, limit, "anchor not in history window");
            continue;
        };
        let no_user_before = !messages
            .iter()
            .take_while(|m| m.info.id != anchor)
            .any(MessageEnvelope::is_user);
        if no_user_before && messages.len() >= limit && !last {
            debug!(session = %session_id, limit, "turn may extend past history window");
            continue;
        }
        return Ok(turn.to_vec());
    }
    Err(EngineError::AnchorNotFound {
        anchor: anchor.to_string(),
    })
}

struct SeenPart {
    kind: PartKind,
    text: String,
}

/// Parts already delivered to the caller during one turn.
#[derive(Default)]
pub struct SeenParts {
    parts: HashMap<String, SeenPart>,
}

impl SeenParts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `part` as delivered. Returns `true` if its id was seen before.
    pub fn observe(&mut self, part: &Part) -> bool {
        self.parts
            .insert(
                part.id.clone(),
                SeenPart {
                    kind: part.kind,
                    text: part.text.clone(),
                },
            )
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Whether a polled part still has to be sent, and as an update or not.
    fn plan(&self, part: &Part) -> Option<bool> {
        let Some(seen) = self.parts.get(&part.id) else {
            return Some(false);
        };
        match part.kind {
            PartKind::Operational => None,
            // Streamed text is complete once it matches the authoritative copy.
            PartKind::Text | PartKind::Reasoning
                if seen.kind == part.kind && seen.text == part.text =>
            {
                None
            }
            // Polled payloads always supersede what streamed.
            _ => Some(true),
        }
    }
}

/// Fragments that bring the caller from `seen` to the authoritative `turn`.
///
/// Only assistant messages contribute. Operational parts are skipped.
/// `seen` is updated with everything emitted.
pub fn reconcile_fragments(
    session_id: &str,
    turn: &[MessageEnvelope],
    seen: &mut SeenParts,
) -> Vec<ResponseFragment> {
    let mut out = Vec::new();
    for message in turn.iter().filter(|m| m.is_assistant()) {
        for raw in &message.parts {
            let Some(part) = Part::from_value(raw.clone()) else {
                continue;
            };
            if part.kind == PartKind::Operational {
                continue;
            }
            let Some(is_update) = seen.plan(&part) else {
                continue;
            };
            if let Some(frag) = ResponseFragment::from_part(session_id, &part, is_update) {
                seen.observe(&part);
                out.push(frag);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{msg, text_part, FakeBackend};
    use serde_json::json;

    fn ids(turn: &[MessageEnvelope]) -> Vec<&str> {
        turn.iter().map(|m| m.info.id.as_str()).collect()
    }

    #[test]
    fn turn_spans_from_user_message_to_anchor() {
        let history = vec![
            msg("u1", "user", vec![]),
            msg("a1", "assistant", vec![]),
            msg("u2", "user", vec![]),
            msg("a2", "assistant", vec![]),
            msg("a3", "assistant", vec![]),
            msg("a4", "assistant", vec![]),
        ];
        assert_eq!(ids(extract_turn(&history, "a3").unwrap()), vec!["a2", "a3"]);
        assert_eq!(ids(extract_turn(&history, "a1").unwrap()), vec!["a1"]);
        assert!(extract_turn(&history, "zz").is_none());
    }

    #[test]
    fn turn_without_user_message_starts_at_window() {
        let history = vec![msg("a1", "assistant", vec![]), msg("a2", "assistant", vec![])];
        assert_eq!(ids(extract_turn(&history, "a2").unwrap()), vec!["a1", "a2"]);
    }

    #[test]
    fn identical_text_is_skipped_changed_text_is_updated() {
        let mut seen = SeenParts::new();
        seen.observe(&Part::from_value(text_part("p1", "a1", "Hello")).unwrap());
        seen.observe(&Part::from_value(text_part("p2", "a1", "Wor")).unwrap());

        let turn = vec![msg(
            "a1",
            "assistant",
            vec![
                text_part("p1", "a1", "Hello"),
                text_part("p2", "a1", "World"),
                text_part("p3", "a1", "!"),
            ],
        )];
        let frags = reconcile_fragments("s1", &turn, &mut seen);
        let summary: Vec<_> = frags
            .iter()
            .map(|f| (f.part_id.as_str(), f.content.as_deref(), f.is_update))
            .collect();
        assert_eq!(
            summary,
            vec![("p2", Some("World"), true), ("p3", Some("!"), false)]
        );
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn streamed_tool_parts_are_always_reemitted() {
        let tool = json!({"id": "t1", "messageID": "a1", "type": "tool", "tool": "read", "state": {"status": "completed"}});
        let mut seen = SeenParts::new();
        seen.observe(&Part::from_value(tool.clone()).unwrap());

        let turn = vec![msg(
            "a1",
            "assistant",
            vec![tool.clone(), json!({"id": "s", "type": "step-finish"})],
        )];
        let frags = reconcile_fragments("s1", &turn, &mut seen);
        assert_eq!(frags.len(), 1);
        assert!(frags[0].is_update);
        assert_eq!(frags[0].part.as_ref(), Some(&tool));
    }

    #[test]
    fn user_messages_in_turn_contribute_nothing() {
        let turn = vec![
            msg("u1", "user", vec![text_part("up", "u1", "question")]),
            msg("a1", "assistant", vec![text_part("p1", "a1", "answer")]),
        ];
        let frags = reconcile_fragments("s1", &turn, &mut SeenParts::new());
        assert_eq!(frags.len(), 1);
        assert_eq!(frags[0].part_id, "p1");
    }

    #[tokio::test]
    async fn fetch_turn_escalates_until_anchor_found() {
        let mut history = vec![msg("u1", "user", vec![]), msg("a1", "assistant", vec![])];
        for i in 0..20 {
            history.push(msg(&format!("x{i}"), "assistant", vec![]));
        }
        let api = FakeBackend::with_history(history);

        let turn = fetch_turn(&api, "s1", "a1", &[10, 50, 200]).await.unwrap();
        assert_eq!(ids(&turn), vec!["a1"]);
        assert_eq!(api.list_calls(), vec![10, 50]);
    }

    #[tokio::test]
    async fn fetch_turn_widens_window_cut_inside_turn() {
        let history = vec![
            msg("u1", "user", vec![]),
            msg("a1", "assistant", vec![]),
            msg("a2", "assistant", vec![]),
            msg("a3", "assistant", vec![]),
        ];
        let api = FakeBackend::with_history(history);

        let turn = fetch_turn(&api, "s1", "a3", &[2, 10]).await.unwrap();
        assert_eq!(ids(&turn), vec!["a1", "a2", "a3"]);
        assert_eq!(api.list_calls(), vec![2, 10]);
    }

    #[tokio::test]
    async fn fetch_turn_reports_missing_anchor() {
        let api = FakeBackend::with_history(vec![msg("u1", "user", vec![])]);
        let err = fetch_turn(&api, "s1", "a9", &[10, 50, 200]).await.unwrap_err();
        assert!(matches!(err, EngineError::AnchorNotFound { anchor } if anchor == "a9"));
        assert_eq!(api.list_calls(), vec![10, 50, 200]);
    }
}
