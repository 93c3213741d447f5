//! # State-Change Observers
//!
//! Subscribers are notified synchronously, in registration order, on every
//! state transition. A subscriber that panics is logged and skipped; the
//! remaining subscribers and the state machine carry on.
//!
//! Observers run on the thread that caused the transition, while that
//! thread may hold the connection's socket lock. They may read
//! [`Connection::state`](super::Connection::state) and
//! [`Connection::is_connected`](super::Connection::is_connected) but must
//! not call operations that touch the socket.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::error;

use super::ConnectionState;
use crate::sync::lock;

/// Receives connection state transitions.
pub trait ConnectionObserver: Send + Sync {
    fn on_state_changed(&self, state: ConnectionState);
}

impl<F> ConnectionObserver for F
where
    F: Fn(ConnectionState) + Send + Sync,
{
    fn on_state_changed(&self, state: ConnectionState) {
        self(state)
    }
}

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Ordered list of subscribers.
#[derive(Default)]
pub(crate) struct ObserverRegistry {
    next_id: AtomicU64,
    entries: Mutex<Vec<(SubscriptionId, Arc<dyn ConnectionObserver>)>>,
}

impl ObserverRegistry {
    pub(crate) fn subscribe(&self, observer: Arc<dyn ConnectionObserver>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.entries).push((id, observer));
        id
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut entries = lock(&self.entries);
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    /// Deliver `state` to every subscriber.
    ///
    /// The list is snapshotted first so observers may (un)subscribe from
    /// inside the callback.
    pub(crate) fn notify(&self, state: ConnectionState) {
        let snapshot: Vec<_> = lock(&self.entries)
            .iter()
            .map(|(id, observer)| (*id, Arc::clone(observer)))
            .collect();

        for (id, observer) in snapshot {
            let result = panic::catch_unwind(AssertUnwindSafe(|| observer.on_state_changed(state)));
            if result.is_err() {
                error!(subscription = ?id, ?state, "state observer panicked");
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
