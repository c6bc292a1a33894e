//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! start()
//!     → logging.rs (capture caller's dispatcher into a Logger)
//!     → acceptor thread, connection tasks, blocking backend calls
//!       each run under that Logger
//! ```
//!
//! # Design Decisions
//! - Structured events via `tracing`, one span per server carrying its port
//! - Subscriber setup belongs to the binary, not the library

pub mod logging;

pub use logging::Logger;
