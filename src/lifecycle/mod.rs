//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Build backend → TLS context → bind socket → pools → acceptor thread
//!
//! Shutdown (shutdown.rs):
//!     stop() or /__admin/stop → trigger → stop accepting, close socket
//!         → connections finish in-flight work → pools stop → closed
//! ```
//!
//! # Design Decisions
//! - Ordered startup, fail fast, nothing left half-bound
//! - Ordered shutdown: stop accept, drain, close
//! - The trigger is a flag, so a request handler can stop its own server

pub mod shutdown;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{start, ServerHandle, StartError, StartOptions};
