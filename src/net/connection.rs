//! Connection identity and lifecycle tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Count connections handed to the worker pool
//! - Let shutdown wait until every tracked connection has closed
//! - Count exchanges in progress on one connection, so shutdown can tell
//!   in-flight work from an idle or half-sent request

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Tracks open connections so shutdown can drain them.
///
/// The count lives in a watch channel; every guard drop publishes the new value.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    active: Arc<watch::Sender<u64>>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self {
            active: Arc::new(tx),
        }
    }

    /// Record a new connection. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.active.send_modify(|count| *count += 1);
        let id = ConnectionId::new();
        tracing::trace!(connection_id = %id, "Connection opened");
        ConnectionGuard {
            active: Arc::clone(&self.active),
            id,
        }
    }

    pub fn active_count(&self) -> u64 {
        *self.active.borrow()
    }

    /// Resolve once no tracked connection remains. No deadline.
    pub async fn drained(&self) {
        let mut rx = self.active.subscribe();
        let _ = rx.wait_for(|count| *count == 0).await;
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that tracks a connection's lifetime.
#[derive(Debug)]
pub struct ConnectionGuard {
    active: Arc<watch::Sender<u64>>,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active.send_modify(|count| *count -= 1);
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}

/// Exchanges in progress on a single connection.
///
/// An exchange starts when a complete request head has been parsed and ends
/// once its response body has been handed to the codec.
#[derive(Debug, Clone)]
pub struct ExchangeTracker {
    active: Arc<watch::Sender<usize>>,
}

impl ExchangeTracker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self {
            active: Arc::new(tx),
        }
    }

    pub fn begin(&self) -> ExchangeGuard {
        self.active.send_modify(|count| *count += 1);
        ExchangeGuard {
            active: Arc::clone(&self.active),
        }
    }

    pub fn in_progress(&self) -> usize {
        *self.active.borrow()
    }

    /// Resolve once no exchange has been in progress for `grace`.
    /// Any new exchange restarts the wait.
    pub async fn idle_for(&self, grace: Duration) {
        let mut rx = self.active.subscribe();
        loop {
            if rx.wait_for(|count| *count == 0).await.is_err() {
                return;
            }
            tokio::select! {
                _ = tokio::time::sleep(grace) => return,
                changed = rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

impl Default for ExchangeTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps one exchange counted until dropped.
#[derive(Debug)]
pub struct ExchangeGuard {
    active: Arc<watch::Sender<usize>>,
}

impl Drop for ExchangeGuard {
    fn drop(&mut self) {
        self.active.send_modify(|count| *count -= 1);
    }
}
