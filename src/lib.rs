//! Embeddable HTTP/1.1 + HTTP/2 mock server library.
//!
//! Start a server with [`start`], hand it a [`Backend`], and drive its
//! lifecycle through the returned [`ServerHandle`].

pub mod admin;
pub mod backend;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use backend::{Backend, BackendContext, BackendError, EchoBackend};
pub use config::ServerConfig;
pub use http::{GenericRequest, GenericResponse, MultiMap};
pub use lifecycle::{start, ServerHandle, Shutdown, StartError, StartOptions};
pub use net::tls::{ClientAuth, TlsConfig};
