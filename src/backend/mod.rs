//! Backend collaborator boundary.
//!
//! # Responsibilities
//! - Define the contract the connection handler calls for every exchange
//! - Carry the startup context (source location, variables) to backend construction
//! - Ship an identity backend for the CLI and for tests
//!
//! # Design Decisions
//! - Backends are shared across workers, so they must be `Send + Sync`
//! - Calls are synchronous; the handler runs them on the blocking pool
//! - Failures are values, not panics (a panic is still contained per exchange)

use serde_json::Value;
use std::path::PathBuf;
use std::time::SystemTime;

use crate::http::{GenericRequest, GenericResponse};

/// Opaque variable bindings handed to the backend at construction.
pub type Variables = serde_json::Map<String, Value>;

/// Startup inputs the listener does not interpret itself.
#[derive(Debug, Clone, Default)]
pub struct BackendContext {
    /// Where the backend loads its behaviour from (e.g. a feature file).
    pub source: Option<PathBuf>,
    pub variables: Variables,
}

/// Error raised by a backend while building a response.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct BackendError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

/// Computes a response for a request.
pub trait Backend: Send + Sync + 'static {
    fn build_response(
        &self,
        request: GenericRequest,
        started_at: SystemTime,
    ) -> Result<GenericResponse, BackendError>;
}

impl<F> Backend for F
where
    F: Fn(GenericRequest, SystemTime) -> Result<GenericResponse, BackendError> + Send + Sync + 'static,
{
    fn build_response(
        &self,
        request: GenericRequest,
        started_at: SystemTime,
    ) -> Result<GenericResponse, BackendError> {
        self(request, started_at)
    }
}

/// Identity backend: echoes headers and body back with a fixed status.
#[derive(Debug, Clone)]
pub struct EchoBackend {
    status: u16,
}

impl EchoBackend {
    pub fn new() -> Self {
        Self { status: 200 }
    }

    /// Reads an optional numeric `status` binding.
    pub fn from_context(context: &BackendContext) -> Result<Self, BackendError> {
        match context.variables.get("status") {
            None => Ok(Self::new()),
            Some(value) => value
                .as_u64()
                .and_then(|s| u16::try_from(s).ok())
                .map(|status| Self { status })
                .ok_or_else(|| BackendError::new(format!("invalid status binding: {}", value))),
        }
    }
}

impl Default for EchoBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for EchoBackend {
    fn build_response(
        &self,
        request: GenericRequest,
        _started_at: SystemTime,
    ) -> Result<GenericResponse, BackendError> {
        let mut response = GenericResponse::new(self.status);
        for (name, value) in request.headers.iter() {
            if name.eq_ignore_ascii_case("host") || name.eq_ignore_ascii_case("content-length") {
                continue;
            }
            response.headers.add(name, value);
        }
        response.body = request.body;
        Ok(response)
    }
}
