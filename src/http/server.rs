//! Per-connection request handling.
//!
//! # Responsibilities
//! - Finish the TLS handshake and pick HTTP/1.1 or HTTP/2 from ALPN
//! - Route admin stop requests to the shutdown trigger
//! - Translate wire ↔ generic messages around the backend call
//! - Apply stream correlation and the close/keep-open policy
//! - Turn exchange failures into a logged, forced connection close
//! - On shutdown, let exchanges in progress finish but drop connections that
//!   are idle, mid-handshake or holding only a partial request
//!
//! # Exchange states
//! ```text
//! ACCEPTED → (TLS_HANDSHAKE) → REQUEST_PARSED → DISPATCHED → RESPONSE_WRITTEN
//!     → CLOSED       (HTTP/1.1 without a stream id)
//!     → KEPT_OPEN    (stream id present; next exchange re-enters REQUEST_PARSED)
//! ```

use bytes::{Bytes, BytesMut};
use h2::server::SendResponse;
use h2::RecvStream;
use http::header::{HeaderValue, HOST};
use http::Request;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Frame, Incoming, SizeHint};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant, SystemTime};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use crate::admin;
use crate::backend::{Backend, BackendError};
use crate::http::correlation::StreamCorrelation;
use crate::http::request::GenericRequest;
use crate::http::response::WireResponse;
use crate::lifecycle::shutdown::{Shutdown, ShutdownSignal};
use crate::net::connection::{ConnectionId, ExchangeGuard, ExchangeTracker};
use crate::net::tls::TlsContext;
use crate::observability::Logger;

/// How long a connection with nothing in progress may take to close by
/// itself once shutdown starts. Covers flushing the last response.
const IDLE_DRAIN_GRACE: Duration = Duration::from_millis(200);

/// Failure of a single exchange. The connection is closed without a response.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("failed to read request body: {0}")]
    Body(#[source] hyper::Error),
    #[error("HTTP/2 stream error: {0}")]
    H2(#[from] h2::Error),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("backend task failed: {0}")]
    BackendTask(#[from] tokio::task::JoinError),
    #[error("invalid response status {0}")]
    InvalidStatus(u16),
    #[error("invalid response header {0:?}")]
    InvalidHeader(String),
}

/// Log an exchange failure. Errors without a message get a full debug dump.
fn report_failure(connection: ConnectionId, err: &ExchangeError) {
    let summary = err.to_string();
    if summary.is_empty() {
        tracing::error!(connection_id = %connection, error = ?err, "error, closing connection");
    } else {
        tracing::error!(connection_id = %connection, "error, closing connection: {}", summary);
    }
}

/// HTTP/1.1 response body that keeps its exchange counted until hyper has
/// taken the last frame.
pub struct ExchangeBody {
    inner: Full<Bytes>,
    _guard: ExchangeGuard,
}

impl Body for ExchangeBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, Infallible>>> {
        Pin::new(&mut self.get_mut().inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// Shared state for every exchange on the server.
pub struct ConnectionHandler {
    backend: Arc<dyn Backend>,
    tls: Option<TlsContext>,
    shutdown: Shutdown,
    logger: Logger,
}

impl ConnectionHandler {
    pub fn new(
        backend: Arc<dyn Backend>,
        tls: Option<TlsContext>,
        shutdown: Shutdown,
        logger: Logger,
    ) -> Self {
        Self {
            backend,
            tls,
            shutdown,
            logger,
        }
    }

    /// Serve one accepted connection until it closes.
    pub async fn serve<IO>(
        self: Arc<Self>,
        stream: IO,
        local_addr: SocketAddr,
        id: ConnectionId,
        mut signal: ShutdownSignal,
    ) where
        IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let Some(tls) = self.tls.clone() else {
            let served = self.serve_http1(stream, local_addr, id, signal).await;
            if let Err(e) = served {
                tracing::debug!(connection_id = %id, error = %e, "HTTP/1.1 connection ended");
            }
            return;
        };

        let stream = tokio::select! {
            accepted = tls.accept(stream) => match accepted {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::debug!(connection_id = %id, error = %e, "TLS handshake failed");
                    return;
                }
            },
            _ = signal.wait() => {
                tracing::debug!(connection_id = %id, "shutdown during TLS handshake, closing");
                return;
            }
        };
        let negotiated_h2 = stream.get_ref().1.alpn_protocol() == Some(b"h2".as_slice());
        tracing::trace!(connection_id = %id, h2 = negotiated_h2, "TLS established");

        if negotiated_h2 {
            if let Err(e) = self.serve_h2(stream, local_addr, id, signal).await {
                tracing::debug!(connection_id = %id, error = %e, "HTTP/2 connection ended");
            }
        } else if let Err(e) = self.serve_http1(stream, local_addr, id, signal).await {
            tracing::debug!(connection_id = %id, error = %e, "HTTP/1.1 connection ended");
        }
    }

    async fn serve_http1<IO>(
        self: &Arc<Self>,
        stream: IO,
        local_addr: SocketAddr,
        id: ConnectionId,
        mut signal: ShutdownSignal,
    ) -> Result<(), hyper::Error>
    where
        IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let exchanges = ExchangeTracker::new();
        let handler = Arc::clone(self);
        let tracked = exchanges.clone();
        let service = service_fn(move |request: Request<Incoming>| {
            let handler = Arc::clone(&handler);
            let guard = tracked.begin();
            async move {
                let result = handler.exchange_http1(request, local_addr, guard).await;
                if let Err(e) = &result {
                    report_failure(id, e);
                }
                result
            }
        });

        let connection = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
        tokio::pin!(connection);

        tokio::select! {
            result = connection.as_mut() => result,
            _ = signal.wait() => {
                connection.as_mut().graceful_shutdown();
                tokio::select! {
                    result = connection.as_mut() => result,
                    _ = exchanges.idle_for(IDLE_DRAIN_GRACE) => {
                        tracing::debug!(connection_id = %id, "nothing in progress, closing on shutdown");
                        Ok(())
                    }
                }
            }
        }
    }

    async fn exchange_http1(
        &self,
        request: Request<Incoming>,
        local_addr: SocketAddr,
        guard: ExchangeGuard,
    ) -> Result<hyper::Response<ExchangeBody>, ExchangeError> {
        let started_at = SystemTime::now();
        let correlation = StreamCorrelation::extract(request.headers());
        let (parts, body) = request.into_parts();
        let body = body.collect().await.map_err(ExchangeError::Body)?.to_bytes();

        let response = self
            .dispatch(Request::from_parts(parts, body), local_addr, started_at)
            .await?;
        Ok(response.into_http1(&correlation).map(|inner| ExchangeBody {
            inner,
            _guard: guard,
        }))
    }

    async fn serve_h2<IO>(
        self: &Arc<Self>,
        stream: IO,
        local_addr: SocketAddr,
        id: ConnectionId,
        mut signal: ShutdownSignal,
    ) -> Result<(), h2::Error>
    where
        IO: AsyncRead + AsyncWrite + Unpin,
    {
        let mut connection = h2::server::handshake(stream).await?;
        let (failed_tx, mut failed_rx) = mpsc::channel::<()>(1);
        let exchanges = ExchangeTracker::new();
        let mut draining = false;

        loop {
            tokio::select! {
                accepted = connection.accept() => match accepted {
                    Some(Ok((request, respond))) => {
                        let handler = Arc::clone(self);
                        let failed = failed_tx.clone();
                        let guard = exchanges.begin();
                        tokio::spawn(self.logger.wrap(async move {
                            if let Err(e) = handler.exchange_h2(request, respond, local_addr).await {
                                report_failure(id, &e);
                                let _ = failed.try_send(());
                            }
                            drop(guard);
                        }));
                    }
                    Some(Err(e)) => return Err(e),
                    None => return Ok(()),
                },
                // Dropping the connection tears it down without further frames.
                Some(()) = failed_rx.recv() => return Ok(()),
                _ = signal.wait(), if !draining => {
                    draining = true;
                    connection.graceful_shutdown();
                }
                // A peer that never acknowledges GOAWAY must not hold the drain.
                _ = exchanges.idle_for(IDLE_DRAIN_GRACE), if draining => {
                    tracing::debug!(connection_id = %id, "no open streams, closing on shutdown");
                    return Ok(());
                }
            }
        }
    }

    async fn exchange_h2(
        &self,
        request: Request<RecvStream>,
        mut respond: SendResponse<Bytes>,
        local_addr: SocketAddr,
    ) -> Result<(), ExchangeError> {
        let started_at = SystemTime::now();
        let (mut parts, mut body) = request.into_parts();

        let correlation = StreamCorrelation::from_stream_id(respond.stream_id().as_u32());
        correlation.apply(&mut parts.headers);
        if !parts.headers.contains_key(HOST) {
            if let Some(authority) = parts.uri.authority() {
                if let Ok(host) = HeaderValue::from_str(authority.as_str()) {
                    parts.headers.insert(HOST, host);
                }
            }
        }

        let mut buf = BytesMut::new();
        while let Some(chunk) = body.data().await {
            let chunk = chunk?;
            let _ = body.flow_control().release_capacity(chunk.len());
            buf.extend_from_slice(&chunk);
        }

        let response = self
            .dispatch(Request::from_parts(parts, buf.freeze()), local_addr, started_at)
            .await?;
        let (head, body) = response.into_h2(&correlation);
        let mut send = respond.send_response(head, body.is_none())?;
        if let Some(body) = body {
            send.send_data(body, true)?;
        }
        Ok(())
    }

    /// Admin check, translation and backend call for one parsed request.
    pub async fn dispatch(
        &self,
        request: Request<Bytes>,
        local_addr: SocketAddr,
        started_at: SystemTime,
    ) -> Result<WireResponse, ExchangeError> {
        let clock = Instant::now();
        tracing::debug!(method = %request.method(), uri = %request.uri(), "handling request");

        if admin::is_stop_request(request.uri()) {
            tracing::info!("stop uri invoked, shutting down");
            self.shutdown.trigger();
            return admin::stopped_response().into_wire();
        }

        let (parts, body) = request.into_parts();
        let generic = GenericRequest::from_wire(
            &parts,
            body,
            self.tls.is_some(),
            local_addr,
            started_at,
        );

        let backend = Arc::clone(&self.backend);
        let logger = self.logger.clone();
        let response = tokio::task::spawn_blocking(move || {
            logger.scope(|| backend.build_response(generic, started_at))
        })
        .await??;

        tracing::trace!(status = response.status, elapsed = ?clock.elapsed(), "response built");
        response.into_wire()
    }
}
