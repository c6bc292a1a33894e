//! TCP listener and the dedicated acceptor thread.
//!
//! # Responsibilities
//! - Bind the listening socket synchronously so failures reach the caller
//! - Run the accept loop on its own OS thread
//! - Hand every accepted socket to the worker pool
//! - Own the drain sequence once shutdown is triggered

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;

use crate::http::server::ConnectionHandler;
use crate::lifecycle::shutdown::{Closed, Shutdown};
use crate::net::connection::ConnectionTracker;
use crate::observability::Logger;

/// Error type for listener operations.
#[derive(Debug)]
pub enum ListenerError {
    /// Failed to bind to address.
    Bind(std::io::Error),
    /// Failed to start the acceptor thread.
    Spawn(std::io::Error),
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::Bind(e) => write!(f, "Failed to bind: {}", e),
            ListenerError::Spawn(e) => write!(f, "Failed to start acceptor: {}", e),
        }
    }
}

impl std::error::Error for ListenerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ListenerError::Bind(e) | ListenerError::Spawn(e) => Some(e),
        }
    }
}

/// A bound, not yet accepting, listening socket.
#[derive(Debug)]
pub struct Listener {
    inner: std::net::TcpListener,
    local_addr: SocketAddr,
}

impl Listener {
    /// Bind `host:port`; port 0 lets the OS pick.
    pub fn bind(host: &str, port: u16) -> Result<Self, ListenerError> {
        let inner = std::net::TcpListener::bind((host, port)).map_err(ListenerError::Bind)?;
        inner.set_nonblocking(true).map_err(ListenerError::Bind)?;
        let local_addr = inner.local_addr().map_err(ListenerError::Bind)?;

        tracing::debug!(address = %local_addr, "Listener bound");
        Ok(Self { inner, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Register the socket with the runtime that will drive the accept loop.
    pub fn register(self, runtime: &Runtime) -> Result<TcpListener, ListenerError> {
        let _entered = runtime.enter();
        TcpListener::from_std(self.inner).map_err(ListenerError::Bind)
    }
}

/// Everything the acceptor thread owns.
pub struct Acceptor {
    pub listener: TcpListener,
    pub local_addr: SocketAddr,
    /// Current-thread runtime driving the accept loop.
    pub runtime: Runtime,
    /// Multi-thread runtime executing connection handlers.
    pub workers: Runtime,
    pub handler: Arc<ConnectionHandler>,
    pub shutdown: Shutdown,
    pub closed: Closed,
    pub logger: Logger,
}

impl Acceptor {
    /// Start the acceptor thread. On failure nothing keeps running.
    pub fn spawn(self) -> Result<std::thread::JoinHandle<()>, ListenerError> {
        let (tx, rx) = std::sync::mpsc::channel::<Acceptor>();
        let thread = match std::thread::Builder::new()
            .name("mock-acceptor".into())
            .spawn(move || {
                if let Ok(acceptor) = rx.recv() {
                    acceptor.run();
                }
            }) {
            Ok(thread) => thread,
            Err(e) => {
                self.abandon();
                return Err(ListenerError::Spawn(e));
            }
        };
        if let Err(returned) = tx.send(self) {
            returned.0.abandon();
            return Err(ListenerError::Spawn(std::io::Error::other(
                "acceptor thread exited early",
            )));
        }
        Ok(thread)
    }

    /// Tear down without blocking; safe from inside an async context.
    pub fn abandon(self) {
        drop(self.listener);
        self.runtime.shutdown_background();
        self.workers.shutdown_background();
    }

    fn run(self) {
        let Acceptor {
            listener,
            local_addr,
            runtime,
            workers,
            handler,
            shutdown,
            closed,
            logger,
        } = self;
        let tracker = ConnectionTracker::new();

        runtime.block_on(logger.wrap(async {
            accept_loop(listener, local_addr, &workers, &handler, &shutdown, &tracker, &logger)
                .await;
            // listening socket is closed at this point
            tracker.drained().await;
        }));

        drop(handler);
        drop(workers);
        logger.scope(|| tracing::info!("stop: shutdown complete"));
        closed.mark();
    }
}

async fn accept_loop(
    listener: TcpListener,
    local_addr: SocketAddr,
    workers: &Runtime,
    handler: &Arc<ConnectionHandler>,
    shutdown: &Shutdown,
    tracker: &ConnectionTracker,
    logger: &Logger,
) {
    let mut signal = shutdown.subscribe();
    loop {
        tokio::select! {
            biased;
            _ = signal.wait() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::trace!(peer_addr = %peer, "Connection accepted");
                    hand_off(stream, local_addr, workers, handler, shutdown, tracker, logger);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
    tracing::info!("stop: shutting down");
    drop(listener);
}

/// Move an accepted socket onto the worker pool.
fn hand_off(
    stream: TcpStream,
    local_addr: SocketAddr,
    workers: &Runtime,
    handler: &Arc<ConnectionHandler>,
    shutdown: &Shutdown,
    tracker: &ConnectionTracker,
    logger: &Logger,
) {
    // The socket is re-registered with the worker runtime's reactor.
    let stream = match stream.into_std() {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to detach accepted socket");
            return;
        }
    };

    let guard = tracker.track();
    let handler = Arc::clone(handler);
    let signal = shutdown.subscribe();

    workers.spawn(logger.wrap(async move {
        let id = guard.id();
        match TcpStream::from_std(stream) {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                handler.serve(stream, local_addr, id, signal).await;
            }
            Err(e) => tracing::warn!(connection_id = %id, error = %e, "Failed to register socket"),
        }
        drop(guard);
    }));
}
