//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (ALPN protocol detection, HTTP/1.1 or HTTP/2 exchange)
//!     → request.rs (wire request → GenericRequest)
//!     → backend (build GenericResponse)
//!     → response.rs (GenericResponse → wire response, exact content-length)
//!     → correlation.rs (mirror stream id, decide close vs keep-open)
//!     → Send to client
//! ```

pub mod correlation;
pub mod multimap;
pub mod request;
pub mod response;
pub mod server;

pub use correlation::{StreamCorrelation, STREAM_ID_HEADER};
pub use multimap::MultiMap;
pub use request::GenericRequest;
pub use response::GenericResponse;
pub use server::{ConnectionHandler, ExchangeError};
