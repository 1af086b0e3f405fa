//! Per-session fan-out of backend events.
//!
//! One event connection serves every conversation; the multiplexer hands
//! each event to the subscriptions registered for its session plus every
//! global subscription. Delivery never blocks: a full queue drops the event
//! for that subscriber only.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::event::BackendEvent;

/// Session id used to subscribe to every session.
pub const GLOBAL_SESSION: &str = "";

type Registry = RwLock<HashMap<String, Vec<Subscriber>>>;

/// A live registration for one session's events.
///
/// Dropping it closes the queue and deregisters it.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    session_id: String,
    rx: mpsc::Receiver<Arc<BackendEvent>>,
    registry: Weak<Registry>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Wait for the next event. `None` once the subscription is closed and drained.
    pub async fn recv(&mut self) -> Option<Arc<BackendEvent>> {
        self.rx.recv().await
    }

    /// Non-blocking receive.
    pub fn try_recv(&mut self) -> Option<Arc<BackendEvent>> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.rx.close();
        if let Some(registry) = self.registry.upgrade() {
            let mut subs = registry.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(list) = subs.get_mut(&self.session_id) {
                list.retain(|s| s.id != self.id);
                if list.is_empty() {
                    subs.remove(&self.session_id);
                }
            }
        }
        debug!(session = %self.session_id, subscription = self.id, "unsubscribed");
    }
}

#[derive(Debug)]
struct Subscriber {
    id: u64,
    tx: mpsc::Sender<Arc<BackendEvent>>,
}

/// Registry of subscriptions keyed by session id.
///
/// Read-locked on dispatch, write-locked on subscribe/unsubscribe. The lock
/// is never held across an await.
pub struct Multiplexer {
    capacity: usize,
    next_id: AtomicU64,
    subscribers: Arc<Registry>,
}

impl Multiplexer {
    /// `capacity` is the number of queued events per subscription.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            next_id: AtomicU64::new(1),
            subscribers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register interest in `session_id` ([`GLOBAL_SESSION`] for all sessions).
    pub fn subscribe(&self, session_id: &str) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.capacity);

        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(session_id.to_string())
            .or_default()
            .push(Subscriber { id, tx });
        debug!(session = %session_id, subscription = id, "subscribed");

        Subscription {
            id,
            session_id: session_id.to_string(),
            rx,
            registry: Arc::downgrade(&self.subscribers),
        }
    }

    /// Deregister and close the subscription's queue. Same as dropping it.
    pub fn unsubscribe(&self, sub: Subscription) {
        drop(sub);
    }

    /// Deliver `event` to its session's subscribers and to global subscribers.
    pub fn dispatch(&self, event: BackendEvent) {
        let event = Arc::new(event);
        let subs = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(session_id) = event.session_id().filter(|s| *s != GLOBAL_SESSION) {
            if let Some(list) = subs.get(session_id) {
                deliver(list, &event, session_id);
            }
        }
        if let Some(list) = subs.get(GLOBAL_SESSION) {
            deliver(list, &event, GLOBAL_SESSION);
        }
    }

    /// Number of live registrations across all sessions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Vec::len)
            .sum()
    }
}

fn deliver(list: &[Subscriber], event: &Arc<BackendEvent>, session_id: &str) {
    for sub in list {
        match sub.tx.try_send(Arc::clone(event)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(
                    session = %session_id,
                    subscription = sub.id,
                    "subscriber queue full, dropping event"
                );
            }
            Err(TrySendError::Closed(_)) => {
                debug!(subscription = sub.id, "subscriber closed, skipping");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle(session: &str) -> BackendEvent {
        BackendEvent::SessionIdle {
            session_id: session.to_string(),
        }
    }

    #[test]
    fn events_reach_only_their_session() {
        let mux = Multiplexer::new(8);
        let mut a = mux.subscribe("A");
        let mut b = mux.subscribe("B");

        mux.dispatch(idle("A"));
        mux.dispatch(idle("A"));

        assert_eq!(a.try_recv().as_deref(), Some(&idle("A")));
        assert_eq!(a.try_recv().as_deref(), Some(&idle("A")));
        assert!(a.try_recv().is_none());
        assert!(b.try_recv().is_none());
    }

    #[test]
    fn global_subscription_sees_every_session() {
        let mux = Multiplexer::new(8);
        let mut global = mux.subscribe(GLOBAL_SESSION);
        let mut a = mux.subscribe("A");

        mux.dispatch(idle("A"));
        mux.dispatch(idle("B"));
        mux.dispatch(BackendEvent::ServerConnected);

        assert_eq!(global.try_recv().as_deref(), Some(&idle("A")));
        assert_eq!(global.try_recv().as_deref(), Some(&idle("B")));
        assert_eq!(
            global.try_recv().as_deref(),
            Some(&BackendEvent::ServerConnected)
        );
        assert_eq!(a.try_recv().as_deref(), Some(&idle("A")));
        assert!(a.try_recv().is_none());
    }

    #[test]
    fn full_queue_drops_without_blocking_others() {
        let mux = Multiplexer::new(2);
        let mut slow = mux.subscribe("A");
        let mut other = mux.subscribe("A");

        for _ in 0..3 {
            mux.dispatch(idle("A"));
        }
        // slow consumer only kept the first two
        assert!(slow.try_recv().is_some());
        assert!(slow.try_recv().is_some());
        assert!(slow.try_recv().is_none());
        assert!(other.try_recv().is_some());
        assert!(other.try_recv().is_some());
    }

    #[tokio::test]
    async fn unsubscribe_closes_queue_and_deregisters() {
        let mux = Multiplexer::new(4);
        let keep = mux.subscribe("A");
        let gone = mux.subscribe("A");
        assert_eq!(mux.subscriber_count(), 2);

        mux.unsubscribe(gone);
        assert_eq!(mux.subscriber_count(), 1);

        mux.unsubscribe(keep);
        assert_eq!(mux.subscriber_count(), 0);

        // dispatch with nobody listening is a no-op
        mux.dispatch(idle("A"));
    }

    #[tokio::test]
    async fn recv_returns_none_after_close() {
        let mux = Multiplexer::new(4);
        let mut sub = mux.subscribe("A");
        mux.dispatch(idle("A"));
        sub.rx.close();
        // already-queued event is still drained, then the queue reports closed
        assert!(sub.recv().await.is_some());
        assert!(sub.recv().await.is_none());
    }

    #[test]
    fn dropping_subscription_deregisters_it() {
        let mux = Multiplexer::new(4);
        let abandoned = mux.subscribe("A");
        let _kept = mux.subscribe("A");
        drop(abandoned);
        assert_eq!(mux.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn aborted_task_releases_its_subscription() {
        let mux = Arc::new(Multiplexer::new(4));
        let task = {
            let mux = Arc::clone(&mux);
            tokio::spawn(async move {
                let mut sub = mux.subscribe("A");
                sub.recv().await
            })
        };
        while mux.subscriber_count() == 0 {
            tokio::task::yield_now().await;
        }
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert_eq!(mux.subscriber_count(), 0);
    }

    #[test]
    fn subscription_outliving_multiplexer_drops_cleanly() {
        let mux = Multiplexer::new(4);
        let sub = mux.subscribe("A");
        drop(mux);
        drop(sub);
    }
}
