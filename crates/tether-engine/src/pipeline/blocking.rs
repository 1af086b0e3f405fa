use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use super::{PipelineState, SendPipeline, Turn};
use crate::error::EngineError;
use crate::fragment::ResponseFragment;
use crate::reconcile::reconcile_fragments;
use crate::types::SendRequest;

impl SendPipeline {
    /// Fallback path for when no event connection is live: send, then emit
    /// the polled turn in one pass. If polling fails, the parts carried by
    /// the send response itself are emitted instead.
    #[instrument(skip_all, fields(session = %session_id))]
    pub async fn run_blocking(
        &self,
        session_id: &str,
        req: SendRequest,
        tx: mpsc::Sender<ResponseFragment>,
        cancel: CancellationToken,
    ) {
        let mut turn = Turn::new(session_id, tx);
        turn.enter(PipelineState::BlockingSend);

        let sent = tokio::select! {
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            r = self.api.send_message(session_id, &req) => r,
        };
        let envelope = match sent {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "send request failed");
                turn.finish(Some(e.to_string())).await;
                return;
            }
        };

        let frags = match self.poll_turn(session_id, &envelope.info.id, &cancel).await {
            Ok(messages) => reconcile_fragments(session_id, &messages, &mut turn.seen),
            Err(e) => {
                warn!(error = %e, anchor = %envelope.info.id, "history poll failed, using send response");
                reconcile_fragments(session_id, std::slice::from_ref(&envelope), &mut turn.seen)
            }
        };
        if !turn.emit_all(frags).await {
            return;
        }
        turn.finish(None).await;
    }
}
