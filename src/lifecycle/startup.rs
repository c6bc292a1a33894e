//! Startup orchestration and the server handle.
//!
//! # Responsibilities
//! - Build the backend, TLS context and both thread pools
//! - Bind the listener and start the acceptor thread
//! - Expose lifecycle controls: block until closed, stop
//!
//! # Design Decisions
//! - Fail fast: any startup error is returned and nothing stays bound
//! - The socket is bound before any runtime exists, so the common failure
//!   (port in use) never has to tear a runtime down
//! - Drain after stop has no deadline; a hung backend call holds it open

use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use tokio::runtime::{Builder, Runtime};

use crate::backend::{Backend, BackendContext, BackendError};
use crate::config::ServerConfig;
use crate::http::server::ConnectionHandler;
use crate::lifecycle::shutdown::{Closed, Shutdown};
use crate::net::listener::{Acceptor, Listener, ListenerError};
use crate::net::tls::{build_tls_context, AlpnProtocol, ClientAuth, TlsConfig, TlsError};
use crate::observability::Logger;

/// Host reported for every bound server.
pub const REPORTED_HOST: &str = "127.0.0.1";

/// Error raised while starting the server.
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("backend construction failed: {0}")]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Tls(#[from] TlsError),
    #[error(transparent)]
    Listener(#[from] ListenerError),
    #[error("failed to build {pool} pool: {source}")]
    Runtime {
        pool: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Everything `start` needs.
#[derive(Debug, Clone)]
pub struct StartOptions {
    /// Address to bind; the reported host is always loopback.
    pub bind_host: String,
    /// 0 requests an ephemeral port.
    pub port: u16,
    pub tls: Option<TlsConfig>,
    /// Worker pool size; available parallelism when `None`.
    pub workers: Option<usize>,
    pub backend: BackendContext,
}

impl StartOptions {
    pub fn new(port: u16) -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port,
            tls: None,
            workers: None,
            backend: BackendContext::default(),
        }
    }

    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }
}

impl Default for StartOptions {
    fn default() -> Self {
        Self::new(0)
    }
}

impl From<&ServerConfig> for StartOptions {
    fn from(config: &ServerConfig) -> Self {
        let tls = config.tls.as_ref().and_then(|settings| {
            let client_auth = ClientAuth::parse(&settings.client_auth);
            let mut tls = match (&settings.cert_path, &settings.key_path) {
                (Some(cert), Some(key)) => TlsConfig::from_files(cert, key, client_auth),
                _ if settings.self_signed => TlsConfig::self_signed(client_auth),
                _ => return None,
            };
            tls.alpn_protocols = settings
                .alpn_protocols
                .iter()
                .filter_map(|name| AlpnProtocol::from_name(name))
                .collect();
            tls.cipher_policy = settings.cipher_policy;
            tls.client_ca = settings.client_ca_path.as_ref().map(Into::into);
            Some(tls)
        });

        Self {
            bind_host: config.listener.host.clone(),
            port: config.listener.port,
            tls,
            workers: config.workers,
            backend: BackendContext {
                source: config.feature_path.as_ref().map(Into::into),
                variables: config.variables.clone(),
            },
        }
    }
}

/// Handle to a running server. Clones refer to the same server.
#[derive(Clone)]
pub struct ServerHandle {
    inner: Arc<Inner>,
}

struct Inner {
    port: u16,
    tls_enabled: bool,
    shutdown: Shutdown,
    closed: Closed,
    acceptor: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("port", &self.inner.port)
            .field("tls_enabled", &self.inner.tls_enabled)
            .field("closed", &self.inner.closed.is_closed())
            .finish()
    }
}

/// Start a server: one acceptor thread plus a worker pool.
pub fn start<F>(options: StartOptions, make_backend: F) -> Result<ServerHandle, StartError>
where
    F: FnOnce(&BackendContext) -> Result<Arc<dyn Backend>, BackendError>,
{
    let backend = make_backend(&options.backend)?;
    let tls = options.tls.as_ref().map(build_tls_context).transpose()?;
    let listener = Listener::bind(&options.bind_host, options.port)?;
    let port = listener.local_addr().port();

    let workers = worker_runtime(options.workers)?;
    let runtime = match Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(source) => {
            workers.shutdown_background();
            return Err(StartError::Runtime { pool: "acceptor", source });
        }
    };
    let local_addr = listener.local_addr();
    let listener = match listener.register(&runtime) {
        Ok(listener) => listener,
        Err(e) => {
            runtime.shutdown_background();
            workers.shutdown_background();
            return Err(e.into());
        }
    };

    let logger = Logger::capture(port);
    let shutdown = Shutdown::new();
    let closed = Closed::new();
    let tls_enabled = tls.is_some();
    let handler = Arc::new(ConnectionHandler::new(
        backend,
        tls,
        shutdown.clone(),
        logger.clone(),
    ));

    let thread = Acceptor {
        listener,
        local_addr,
        runtime,
        workers,
        handler,
        shutdown: shutdown.clone(),
        closed: closed.clone(),
        logger: logger.clone(),
    }
    .spawn()?;

    logger.scope(|| {
        tracing::info!(
            "server started - {}://{}:{}",
            if tls_enabled { "https" } else { "http" },
            REPORTED_HOST,
            port
        )
    });

    Ok(ServerHandle {
        inner: Arc::new(Inner {
            port,
            tls_enabled,
            shutdown,
            closed,
            acceptor: Mutex::new(Some(thread)),
        }),
    })
}

fn worker_runtime(size: Option<usize>) -> Result<Runtime, StartError> {
    let size = size.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(usize::from)
            .unwrap_or(1)
    });
    Builder::new_multi_thread()
        .worker_threads(size.max(1))
        .thread_name("mock-worker")
        .enable_all()
        .build()
        .map_err(|source| StartError::Runtime { pool: "worker", source })
}

impl ServerHandle {
    pub fn host(&self) -> &str {
        REPORTED_HOST
    }

    pub fn port(&self) -> u16 {
        self.inner.port
    }

    pub fn tls_enabled(&self) -> bool {
        self.inner.tls_enabled
    }

    /// `scheme://127.0.0.1:port`
    pub fn url(&self) -> String {
        let scheme = if self.inner.tls_enabled { "https" } else { "http" };
        format!("{}://{}:{}", scheme, REPORTED_HOST, self.inner.port)
    }

    /// Capability that requests shutdown without waiting for it.
    pub fn shutdown_trigger(&self) -> Shutdown {
        self.inner.shutdown.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_closed()
    }

    /// Block the calling thread until the listening socket is closed.
    pub fn wait_until_closed(&self) {
        self.inner.closed.wait();
    }

    /// Resolve once the listening socket is closed.
    pub async fn closed(&self) {
        self.inner.closed.wait_async().await;
    }

    /// Graceful shutdown: stop accepting, let open connections finish, then
    /// stop both pools. Blocks until done; later calls return immediately.
    ///
    /// Calling this from inside a backend callback would wait on itself; use
    /// [`ServerHandle::shutdown_trigger`] there instead.
    pub fn stop(&self) {
        self.inner.shutdown.trigger();
        self.wait_until_closed();
        let thread = self
            .inner
            .acceptor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(thread) = thread {
            if thread.join().is_err() {
                tracing::error!("acceptor thread panicked");
            }
        }
    }
}
