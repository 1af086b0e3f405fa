//! Persistent event-stream connection to the backend.
//!
//! One background task owns the stream: it decodes blocks into
//! [`BackendEvent`]s, hands them to the [`Multiplexer`], and reconnects with
//! exponential backoff whenever the stream ends or fails. Dispatch never
//! waits on subscribers, so a slow consumer cannot stall the read loop.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::error::EngineError;
use crate::event::BackendEvent;
use crate::multiplexer::Multiplexer;
use crate::sse::SseDecoder;

/// Raw byte chunks of one open event connection.
pub type EventByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, EngineError>> + Send>>;

/// Opens the long-lived event connection. Credentials are attached by the
/// implementation on every call.
#[async_trait]
pub trait EventTransport: Send + Sync {
    async fn open(&self) -> Result<EventByteStream, EngineError>;
}

/// Owns the event loop task and exposes the live connection state.
pub struct ConnectionManager {
    transport: Arc<dyn EventTransport>,
    mux: Arc<Multiplexer>,
    connected: Arc<AtomicBool>,
    backoff_initial: Duration,
    backoff_max: Duration,
    cancel: Mutex<Option<CancellationToken>>,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn EventTransport>,
        mux: Arc<Multiplexer>,
        backoff_initial: Duration,
        backoff_max: Duration,
    ) -> Self {
        Self {
            transport,
            mux,
            connected: Arc::new(AtomicBool::new(false)),
            backoff_initial,
            backoff_max,
            cancel: Mutex::new(None),
        }
    }

    /// Spawn the event loop. It runs until [`stop`](Self::stop) is called or
    /// `parent` is cancelled. Calling `start` while running is a no-op.
    pub fn start(&self, parent: &CancellationToken) {
        let mut slot = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|t| !t.is_cancelled()) {
            debug!("event loop already running");
            return;
        }
        let token = parent.child_token();
        *slot = Some(token.clone());

        let event_loop = EventLoop {
            transport: Arc::clone(&self.transport),
            mux: Arc::clone(&self.mux),
            connected: Arc::clone(&self.connected),
            backoff: Backoff::new(self.backoff_initial, self.backoff_max),
        };
        tokio::spawn(event_loop.run(token));
    }

    pub fn stop(&self) {
        if let Some(token) = self
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            token.cancel();
        }
    }

    /// `true` while an event connection is open.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

enum StreamEnd {
    Closed,
    Failed(EngineError),
    Cancelled,
}

struct EventLoop {
    transport: Arc<dyn EventTransport>,
    mux: Arc<Multiplexer>,
    connected: Arc<AtomicBool>,
    backoff: Backoff,
}

impl EventLoop {
    async fn run(mut self, token: CancellationToken) {
        info!("event loop started");
        loop {
            let opened = tokio::select! {
                _ = token.cancelled() => break,
                r = self.transport.open() => r,
            };

            match opened {
                Ok(stream) => {
                    self.connected.store(true, Ordering::Release);
                    self.backoff.reset();
                    info!("event stream connected");

                    let end = self.consume(stream, &token).await;
                    self.connected.store(false, Ordering::Release);
                    match end {
                        StreamEnd::Cancelled => break,
                        StreamEnd::Closed => info!("event stream closed by backend"),
                        StreamEnd::Failed(e) => warn!(error = %e, "event stream dropped"),
                    }
                }
                Err(e) => {
                    warn!(error = %e, "event stream connect failed");
                }
            }

            let delay = self.backoff.next_delay();
            info!(retry_after_ms = delay.as_millis() as u64, "reconnecting event stream");
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        self.connected.store(false, Ordering::Release);
        info!("event loop stopped");
    }

    async fn consume(&self, mut stream: EventByteStream, token: &CancellationToken) -> StreamEnd {
        let mut decoder = SseDecoder::new();
        loop {
            let chunk = tokio::select! {
                _ = token.cancelled() => return StreamEnd::Cancelled,
                c = stream.next() => c,
            };
            match chunk {
                None => return StreamEnd::Closed,
                Some(Err(e)) => return StreamEnd::Failed(e),
                Some(Ok(bytes)) => {
                    for payload in decoder.feed(&bytes) {
                        match BackendEvent::decode(&payload) {
                            Some(event) => self.mux.dispatch(event),
                            None => debug!(len = payload.len(), "dropping undecodable event"),
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use tokio::time::Instant;

    /// One scripted `open()` outcome: `Some(chunks)` connects and serves the
    /// chunks, `None` fails. `hold_open` keeps a served stream pending forever.
    struct ScriptedTransport {
        script: Mutex<VecDeque<Option<Vec<Vec<u8>>>>>,
        hold_open: bool,
        opens: Mutex<Vec<Instant>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Option<Vec<Vec<u8>>>>, hold_open: bool) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                hold_open,
                opens: Mutex::new(Vec::new()),
            })
        }

        fn open_times(&self) -> Vec<Instant> {
            self.opens.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EventTransport for ScriptedTransport {
        async fn open(&self) -> Result<EventByteStream, EngineError> {
            self.opens.lock().unwrap().push(Instant::now());
            let next = self.script.lock().unwrap().pop_front().flatten();
            match next {
                Some(chunks) => {
                    let served = futures_util::stream::iter(chunks.into_iter().map(Ok));
                    if self.hold_open {
                        Ok(Box::pin(served.chain(futures_util::stream::pending())))
                    } else {
                        Ok(Box::pin(served))
                    }
                }
                None => Err(EngineError::Unavailable("connection refused".into())),
            }
        }
    }

    fn manager(transport: Arc<ScriptedTransport>, mux: Arc<Multiplexer>) -> ConnectionManager {
        ConnectionManager::new(
            transport,
            mux,
            Duration::from_secs(1),
            Duration::from_secs(8),
        )
    }

    fn gaps_secs(times: &[Instant]) -> Vec<u64> {
        times
            .windows(2)
            .map(|w| (w[1] - w[0]).as_secs())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn dispatches_decoded_events_and_reports_connected() {
        let part = br#"data: {"type":"message.part.updated","properties":{"part":{"id":"p1","sessionID":"s1","messageID":"m1","type":"text","text":"Hi"}}}"#;
        let (head, tail) = part.split_at(40);
        let chunks = vec![
            head.to_vec(),
            tail.to_vec(),
            b"\n\ndata: not-json\n\n".to_vec(),
            b"data: {\"type\":\"session.idle\",\"properties\":{\"sessionID\":\"s1\"}}\n\n".to_vec(),
        ];
        let transport = ScriptedTransport::new(vec![Some(chunks)], true);
        let mux = Arc::new(Multiplexer::new(16));
        let mut sub = mux.subscribe("s1");
        let conn = manager(transport, Arc::clone(&mux));
        let root = CancellationToken::new();

        assert!(!conn.is_connected());
        conn.start(&root);

        let first = sub.recv().await.expect("part event");
        assert!(matches!(&*first, BackendEvent::PartUpdated { part, .. } if part.text == "Hi"));
        let second = sub.recv().await.expect("idle event");
        assert!(matches!(&*second, BackendEvent::SessionIdle { .. }));
        assert!(conn.is_connected());

        conn.stop();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!conn.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_delays_double_until_cap() {
        let transport = ScriptedTransport::new(Vec::new(), false);
        let conn = manager(Arc::clone(&transport), Arc::new(Multiplexer::new(4)));
        let root = CancellationToken::new();
        conn.start(&root);

        tokio::time::sleep(Duration::from_secs(40)).await;
        root.cancel();

        let gaps = gaps_secs(&transport.open_times());
        assert!(gaps.len() >= 6, "too few attempts: {gaps:?}");
        assert_eq!(&gaps[..6], &[1, 2, 4, 8, 8, 8]);
        assert!(gaps.windows(2).all(|w| w[0] <= w[1]));
        assert!(!conn.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_resets_after_successful_connect() {
        // fail, fail, connect (stream closes at once), fail, fail
        let script = vec![None, None, Some(Vec::new()), None, None];
        let transport = ScriptedTransport::new(script, false);
        let conn = manager(Arc::clone(&transport), Arc::new(Multiplexer::new(4)));
        let root = CancellationToken::new();
        conn.start(&root);

        tokio::time::sleep(Duration::from_secs(10)).await;
        root.cancel();

        let gaps = gaps_secs(&transport.open_times());
        assert_eq!(&gaps[..5], &[1, 2, 1, 2, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn start_twice_runs_one_loop() {
        let transport = ScriptedTransport::new(Vec::new(), false);
        let conn = manager(Arc::clone(&transport), Arc::new(Multiplexer::new(4)));
        let root = CancellationToken::new();
        conn.start(&root);
        conn.start(&root);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(transport.open_times().len(), 1);
        conn.stop();
    }
}
