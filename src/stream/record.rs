//! Per-vehicle connection state.
//!
//! One `StreamRecord` exists per observed vehicle, holding the subscriber
//! slots and the connection state machine
//! `Idle -> Connecting -> Live -> (Closed | Idle)`. All mutation happens
//! under a synchronous lock that is never held across an await, so
//! registration and removal are atomic with respect to fan-out and teardown.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use smallvec::SmallVec;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::SyncError;
use crate::status::StatusSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// No transport; will connect on the next trigger
    Idle,
    /// A connection attempt is in progress
    Connecting,
    /// Transport open, frames flowing
    Live,
    /// Record retired; no further connects
    Closed,
}

pub type UpdateHandler = Arc<dyn Fn(&StatusSnapshot) + Send + Sync>;
pub type ErrorHandler = Arc<dyn Fn(&SyncError) + Send + Sync>;

struct Subscriber {
    on_update: UpdateHandler,
    on_error: ErrorHandler,
}

struct RecordInner {
    state: ConnState,
    /// Guards against duplicate connection attempts; covers the window
    /// between deciding to connect and the transport reporting open
    started: bool,
    /// Keyed by a monotonically growing token, so iteration order is
    /// registration order and removal never disturbs other subscribers
    subscribers: BTreeMap<u64, Subscriber>,
    next_token: u64,
    task: Option<JoinHandle<()>>,
    cancel: Option<CancellationToken>,
}

pub struct StreamRecord {
    vehicle_id: String,
    inner: Mutex<RecordInner>,
}

impl StreamRecord {
    pub fn new(vehicle_id: impl Into<String>) -> Self {
        Self {
            vehicle_id: vehicle_id.into(),
            inner: Mutex::new(RecordInner {
                state: ConnState::Idle,
                started: false,
                subscribers: BTreeMap::new(),
                next_token: 0,
                task: None,
                cancel: None,
            }),
        }
    }

    pub fn vehicle_id(&self) -> &str {
        &self.vehicle_id
    }

    pub fn state(&self) -> ConnState {
        self.inner.lock().unwrap().state
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().unwrap().subscribers.len()
    }

    /// Register a subscriber; returns the token used to unregister it.
    pub fn register(&self, on_update: UpdateHandler, on_error: ErrorHandler) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        let token = inner.next_token;
        inner.next_token += 1;
        inner.subscribers.insert(
            token,
            Subscriber {
                on_update,
                on_error,
            },
        );
        token
    }

    /// Remove a subscriber; returns how many remain.
    pub fn unregister(&self, token: u64) -> usize {
        let mut inner = self.inner.lock().unwrap();
        inner.subscribers.remove(&token);
        inner.subscribers.len()
    }

    /// Claim the right to connect. Returns a fresh cancellation token for
    /// the connection task, or `None` when an attempt is already under way,
    /// the transport is live, or the record is retired.
    pub fn begin_connect(&self) -> Option<CancellationToken> {
        let mut inner = self.inner.lock().unwrap();
        if inner.started || matches!(inner.state, ConnState::Live | ConnState::Closed) {
            return None;
        }
        inner.state = ConnState::Connecting;
        inner.started = true;
        let cancel = CancellationToken::new();
        inner.cancel = Some(cancel.clone());
        Some(cancel)
    }

    pub fn set_task(&self, task: JoinHandle<()>) {
        self.inner.lock().unwrap().task = Some(task);
    }

    /// First open/message arrived.
    pub fn mark_live(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == ConnState::Connecting {
            inner.state = ConnState::Live;
        }
    }

    /// The connection attempt or transport ended without the caller asking;
    /// the record stays reconnectable and keeps its subscribers.
    pub fn mark_idle(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != ConnState::Closed {
            inner.state = ConnState::Idle;
        }
        inner.started = false;
        inner.task = None;
        inner.cancel = None;
    }

    /// Visibility-hide: drop the transport but keep every registration so a
    /// later show resumes without re-subscribing.
    pub fn suspend(&self) {
        self.teardown(ConnState::Idle);
    }

    /// Final teardown at refcount zero or service shutdown.
    pub fn close(&self) {
        self.teardown(ConnState::Closed);
    }

    fn teardown(&self, target: ConnState) {
        let (cancel, task) = {
            let mut inner = self.inner.lock().unwrap();
            inner.state = target;
            inner.started = false;
            (inner.cancel.take(), inner.task.take())
        };
        // Cancel first so the connection task exits its select without
        // treating the close as a transport failure.
        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        if let Some(task) = task {
            task.abort();
        }
    }

    /// Deliver a snapshot to every subscriber in registration order. The
    /// handler list is snapshotted under the lock and invoked outside it, so
    /// a handler may unsubscribe without deadlocking.
    pub fn fan_out_update(&self, snapshot: &StatusSnapshot) {
        let handlers: SmallVec<[UpdateHandler; 4]> = {
            let inner = self.inner.lock().unwrap();
            inner
                .subscribers
                .values()
                .map(|s| s.on_update.clone())
                .collect()
        };
        for handler in handlers {
            handler(snapshot);
        }
    }

    pub fn fan_out_error(&self, error: &SyncError) {
        let handlers: SmallVec<[ErrorHandler; 4]> = {
            let inner = self.inner.lock().unwrap();
            inner
                .subscribers
                .values()
                .map(|s| s.on_error.clone())
                .collect()
        };
        for handler in handlers {
            handler(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn noop_update() -> UpdateHandler {
        Arc::new(|_| {})
    }

    fn noop_error() -> ErrorHandler {
        Arc::new(|_| {})
    }

    #[test]
    fn test_tokens_grow_and_order_is_registration_order() {
        let record = StreamRecord::new("veh-1");
        let a = record.register(noop_update(), noop_error());
        let b = record.register(noop_update(), noop_error());
        assert!(b > a);
        assert_eq!(record.subscriber_count(), 2);

        record.unregister(a);
        assert_eq!(record.subscriber_count(), 1);
        // Token of a removed subscriber stays retired
        let c = record.register(noop_update(), noop_error());
        assert!(c > b);
    }

    #[test]
    fn test_begin_connect_is_idempotent() {
        let record = StreamRecord::new("veh-1");
        assert!(record.begin_connect().is_some());
        assert!(record.begin_connect().is_none());
        assert_eq!(record.state(), ConnState::Connecting);

        record.mark_live();
        assert!(record.begin_connect().is_none());

        record.mark_idle();
        assert!(record.begin_connect().is_some());
    }

    #[test]
    fn test_closed_record_never_reconnects() {
        let record = StreamRecord::new("veh-1");
        record.close();
        assert!(record.begin_connect().is_none());
        record.mark_idle();
        assert_eq!(record.state(), ConnState::Closed);
    }

    #[test]
    fn test_unsubscribe_during_fan_out_does_not_deadlock() {
        let record = Arc::new(StreamRecord::new("veh-1"));
        let hits = Arc::new(AtomicUsize::new(0));

        let record_in_handler = record.clone();
        let hits_in_handler = hits.clone();
        let token = Arc::new(Mutex::new(None::<u64>));
        let token_in_handler = token.clone();

        let registered = record.register(
            Arc::new(move |_| {
                hits_in_handler.fetch_add(1, Ordering::SeqCst);
                if let Some(t) = *token_in_handler.lock().unwrap() {
                    record_in_handler.unregister(t);
                }
            }),
            noop_error(),
        );
        *token.lock().unwrap() = Some(registered);

        let snapshot = crate::status::test_support::snapshot("veh-1", 10.0);
        record.fan_out_update(&snapshot);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(record.subscriber_count(), 0);
    }
}
