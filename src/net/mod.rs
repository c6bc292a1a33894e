//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (acceptor thread, hand-off to the worker pool)
//!     → tls.rs (optional TLS handshake, ALPN selection)
//!     → connection.rs (lifecycle tracking for the drain)
//!     → Hand off to HTTP layer
//!
//! Server States:
//!     Starting → Listening → Draining → Closed
//! ```
//!
//! # Design Decisions
//! - Accepting never waits on request processing
//! - Each connection tracked for graceful shutdown
//! - TLS is optional and handled transparently

pub mod connection;
pub mod listener;
pub mod tls;
