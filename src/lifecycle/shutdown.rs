//! Shutdown coordination for the server.

use std::sync::{Arc, Condvar, Mutex};
use tokio::sync::watch;

/// Shutdown trigger shared by the handle, the acceptor and the admin endpoint.
///
/// Triggering only raises a flag; the acceptor thread owns the actual drain,
/// so a connection task can stop the server without waiting on itself.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Raise the shutdown flag. Repeated calls are no-ops.
    pub fn trigger(&self) {
        self.tx.send_if_modified(|stopping| !std::mem::replace(stopping, true));
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of [`Shutdown`].
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Resolve once shutdown has been triggered, including before this call.
    pub async fn wait(&mut self) {
        let _ = self.rx.wait_for(|stopping| *stopping).await;
    }
}

/// Latch set when the listening socket is closed and the pools are down.
#[derive(Debug, Clone)]
pub struct Closed {
    state: Arc<(Mutex<bool>, Condvar)>,
    tx: Arc<watch::Sender<bool>>,
}

impl Closed {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            state: Arc::new((Mutex::new(false), Condvar::new())),
            tx: Arc::new(tx),
        }
    }

    pub fn mark(&self) {
        let (lock, cvar) = &*self.state;
        let mut closed = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *closed = true;
        cvar.notify_all();
        drop(closed);
        self.tx.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.tx.borrow()
    }

    /// Block the calling thread until closed.
    pub fn wait(&self) {
        let (lock, cvar) = &*self.state;
        let mut closed = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        while !*closed {
            closed = cvar
                .wait(closed)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    pub async fn wait_async(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl Default for Closed {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn late_subscriber_sees_trigger() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        shutdown.trigger();
        assert!(shutdown.is_triggered());

        let mut signal = shutdown.subscribe();
        tokio::time::timeout(Duration::from_secs(1), signal.wait())
            .await
            .unwrap();
    }

    #[test]
    fn closed_wakes_blocking_waiter() {
        let closed = Closed::new();
        let waiter = std::thread::spawn({
            let closed = closed.clone();
            move || closed.wait()
        });
        std::thread::sleep(Duration::from_millis(20));
        closed.mark();
        waiter.join().unwrap();
        assert!(closed.is_closed());
        closed.wait();
    }
}
