//! Send pipeline: one user message in, an ordered fragment sequence out.
//!
//! Two paths produce the same final fragment set:
//! - `streaming` consumes live events for the session, then reconciles
//!   against polled history to fill any gap the stream left.
//! - `blocking` issues the request, then emits the polled turn in one pass.
//!   Used whenever the event connection is down.
//!
//! Either path ends with exactly one `done` fragment.

mod blocking;
mod streaming;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::BackendApi;
use crate::error::EngineError;
use crate::fragment::ResponseFragment;
use crate::multiplexer::Multiplexer;
use crate::reconcile::{fetch_turn, SeenParts};
use crate::types::MessageEnvelope;

/// How long to wait for the idle signal once the request has returned.
pub const DEFAULT_IDLE_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Subscribed,
    Sending,
    StreamingEvents,
    Reconciling,
    BlockingSend,
    Done,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::Subscribed => "subscribed",
            PipelineState::Sending => "sending",
            PipelineState::StreamingEvents => "streaming",
            PipelineState::Reconciling => "reconciling",
            PipelineState::BlockingSend => "blocking",
            PipelineState::Done => "done",
        };
        f.write_str(name)
    }
}

/// Shared collaborators of every turn.
#[derive(Clone)]
pub struct SendPipeline {
    api: Arc<dyn BackendApi>,
    mux: Arc<Multiplexer>,
    poll_limits: Vec<usize>,
    idle_grace: Duration,
}

impl SendPipeline {
    pub fn new(api: Arc<dyn BackendApi>, mux: Arc<Multiplexer>, poll_limits: Vec<usize>) -> Self {
        let poll_limits = if poll_limits.is_empty() {
            tether_core::config::DEFAULT_POLL_LIMITS.to_vec()
        } else {
            poll_limits
        };
        Self {
            api,
            mux,
            poll_limits,
            idle_grace: DEFAULT_IDLE_GRACE,
        }
    }

    pub fn with_idle_grace(mut self, grace: Duration) -> Self {
        self.idle_grace = grace;
        self
    }

    async fn poll_turn(
        &self,
        session_id: &str,
        anchor: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<MessageEnvelope>, EngineError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            r = fetch_turn(self.api.as_ref(), session_id, anchor, &self.poll_limits) => r,
        }
    }
}

/// Per-turn bookkeeping: state, output queue, and what was already sent.
struct Turn {
    session_id: String,
    state: PipelineState,
    tx: mpsc::Sender<ResponseFragment>,
    seen: SeenParts,
    /// Set once the receiver is gone; nothing more is sent.
    closed: bool,
}

impl Turn {
    fn new(session_id: &str, tx: mpsc::Sender<ResponseFragment>) -> Self {
        Self {
            session_id: session_id.to_string(),
            state: PipelineState::Idle,
            tx,
            seen: SeenParts::new(),
            closed: false,
        }
    }

    fn enter(&mut self, next: PipelineState) {
        debug!(session = %self.session_id, from = %self.state, to = %next, "pipeline state");
        self.state = next;
    }

    /// Returns `false` once the caller has dropped its receiver.
    async fn emit(&mut self, frag: ResponseFragment) -> bool {
        if self.closed {
            return false;
        }
        if self.tx.send(frag).await.is_err() {
            debug!(session = %self.session_id, "fragment receiver dropped");
            self.closed = true;
        }
        !self.closed
    }

    async fn emit_all(&mut self, frags: Vec<ResponseFragment>) -> bool {
        for frag in frags {
            if !self.emit(frag).await {
                return false;
            }
        }
        true
    }

    async fn finish(&mut self, error: Option<String>) {
        self.enter(PipelineState::Done);
        let frag = match error {
            Some(e) => ResponseFragment::failed(&self.session_id, e),
            None => ResponseFragment::done(&self.session_id),
        };
        self.emit(frag).await;
    }
}
