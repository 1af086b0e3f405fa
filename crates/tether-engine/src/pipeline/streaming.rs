use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::{PipelineState, SendPipeline, Turn};
use crate::error::EngineError;
use crate::event::{BackendEvent, Part, PartKind};
use crate::fragment::ResponseFragment;
use crate::reconcile::reconcile_fragments;
use crate::types::SendRequest;

enum StreamEnd {
    /// Idle seen (or assumed) and the anchor is known.
    Complete(String),
    Failed(String),
    ReceiverGone,
}

/// Tells the triggering user message apart from assistant output.
///
/// Role events are authoritative. Without them, a text part whose message
/// is not yet known and whose text equals what was sent is taken as the
/// echo of the user message. An `assistant` role event for that message
/// withdraws the guess.
struct MessageRoles {
    sent_text: String,
    user_message: Option<String>,
    guessed: bool,
    assistant_messages: HashSet<String>,
    /// Messages whose parts were already treated as output.
    output_messages: HashSet<String>,
    session_error: Option<String>,
}

impl MessageRoles {
    fn new(sent_text: &str) -> Self {
        Self {
            sent_text: sent_text.trim().to_string(),
            user_message: None,
            guessed: false,
            assistant_messages: HashSet::new(),
            output_messages: HashSet::new(),
            session_error: None,
        }
    }

    fn note(&mut self, message_id: &str, role: &str) {
        match role {
            "user" if self.user_message.is_none() || self.guessed => {
                self.user_message = Some(message_id.to_string());
                self.guessed = false;
            }
            "assistant" => {
                self.assistant_messages.insert(message_id.to_string());
                if self.guessed && self.user_message.as_deref() == Some(message_id) {
                    debug!(message = %message_id, "message is the assistant's, not the user's");
                    self.user_message = None;
                    self.guessed = false;
                }
            }
            _ => {}
        }
    }

    /// `true` if `part` belongs to the user message.
    fn is_user_part(&mut self, part: &Part) -> bool {
        if self.user_message.is_none() && self.looks_like_echo(part) {
            debug!(message = %part.message_id, "user message identified from its echoed text");
            self.user_message = Some(part.message_id.clone());
            self.guessed = true;
        }
        if self.user_message.as_deref() == Some(part.message_id.as_str()) {
            return true;
        }
        self.output_messages.insert(part.message_id.clone());
        false
    }

    fn looks_like_echo(&self, part: &Part) -> bool {
        part.kind == PartKind::Text
            && !self.assistant_messages.contains(&part.message_id)
            && !self.output_messages.contains(&part.message_id)
            && part.text.trim() == self.sent_text
    }
}

impl SendPipeline {
    /// Streaming path. Subscribes before sending so no early event is lost,
    /// races the request against the subscription, then reconciles.
    #[instrument(skip_all, fields(session = %session_id))]
    pub async fn run_streaming(
        &self,
        session_id: &str,
        req: SendRequest,
        tx: mpsc::Sender<ResponseFragment>,
        cancel: CancellationToken,
    ) {
        let mut turn = Turn::new(session_id, tx);
        let mut roles = MessageRoles::new(&req.content);
        let mut sub = self.mux.subscribe(session_id);
        turn.enter(PipelineState::Subscribed);

        let api = Arc::clone(&self.api);
        let sid = session_id.to_string();
        let mut request = tokio::spawn(async move { api.send_message(&sid, &req).await });
        turn.enter(PipelineState::Sending);

        let mut anchor: Option<String> = None;
        let mut request_done = false;
        let mut idle = false;
        let mut deadline: Option<Instant> = None;

        let end = loop {
            if idle {
                if let Some(anchor) = anchor.take() {
                    break StreamEnd::Complete(anchor);
                }
            }

            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    break StreamEnd::Failed(EngineError::Cancelled.to_string());
                }

                joined = &mut request, if !request_done => {
                    request_done = true;
                    match joined {
                        Ok(Ok(envelope)) => {
                            debug!(anchor = %envelope.info.id, "request returned");
                            anchor = Some(envelope.info.id);
                            deadline = Some(Instant::now() + self.idle_grace);
                        }
                        Ok(Err(e)) => {
                            warn!(error = %e, "send request failed");
                            break StreamEnd::Failed(e.to_string());
                        }
                        Err(e) => {
                            warn!(error = %e, "send task aborted");
                            break StreamEnd::Failed(format!("request task failed: {e}"));
                        }
                    }
                }

                event = sub.recv(), if !idle => {
                    let Some(event) = event else {
                        debug!("subscription closed");
                        idle = true;
                        continue;
                    };
                    if turn.state == PipelineState::Sending {
                        turn.enter(PipelineState::StreamingEvents);
                    }
                    match &*event {
                        BackendEvent::PartUpdated { part, .. } => {
                            if roles.is_user_part(part) || part.kind == PartKind::Operational {
                                continue;
                            }
                            let is_update = turn.seen.observe(part);
                            if let Some(frag) = ResponseFragment::from_part(session_id, part, is_update) {
                                if !turn.emit(frag).await {
                                    break StreamEnd::ReceiverGone;
                                }
                            }
                        }
                        BackendEvent::MessageUpdated { message_id, role, .. } => {
                            roles.note(message_id, role);
                        }
                        BackendEvent::SessionIdle { .. } => {
                            debug!("session idle");
                            idle = true;
                        }
                        BackendEvent::SessionError { message, .. } => {
                            warn!(error = %message, "backend reported session error");
                            roles.session_error = Some(message.clone());
                        }
                        _ => {}
                    }
                }

                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                    if deadline.is_some() && !idle =>
                {
                    warn!(grace_ms = self.idle_grace.as_millis() as u64, "idle signal not seen, reconciling");
                    idle = true;
                }
            }
        };

        self.mux.unsubscribe(sub);

        let anchor = match end {
            StreamEnd::Complete(anchor) => anchor,
            StreamEnd::Failed(error) => {
                request.abort();
                turn.finish(Some(error)).await;
                return;
            }
            StreamEnd::ReceiverGone => {
                request.abort();
                return;
            }
        };

        turn.enter(PipelineState::Reconciling);
        match self.poll_turn(session_id, &anchor, &cancel).await {
            Ok(messages) => {
                let frags = reconcile_fragments(session_id, &messages, &mut turn.seen);
                if !frags.is_empty() {
                    debug!(count = frags.len(), "reconciliation filled gaps");
                }
                if !turn.emit_all(frags).await {
                    return;
                }
            }
            Err(e) => {
                warn!(error = %e, anchor = %anchor, "reconciliation failed, keeping streamed output");
            }
        }

        let error = roles.session_error.filter(|_| turn.seen.is_empty());
        turn.finish(error).await;
    }
}
