//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the mock server.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::backend::Variables;
use crate::net::tls::CipherPolicy;

/// Root configuration for the mock server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration (bind host, port).
    pub listener: ListenerConfig,

    /// Optional TLS configuration; plain HTTP/1.1 when absent.
    pub tls: Option<TlsSettings>,

    /// Backend source location (e.g. a feature file), opaque to the server.
    pub feature_path: Option<String>,

    /// Initial variable bindings handed to the backend.
    pub variables: Variables,

    /// Worker pool size (defaults to available parallelism).
    pub workers: Option<usize>,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind host (e.g., "0.0.0.0").
    pub host: String,

    /// Port to bind; 0 picks an ephemeral port.
    pub port: u16,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 0,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TlsSettings {
    /// Generate a self-signed certificate at startup.
    pub self_signed: bool,

    /// Path to certificate file (PEM).
    pub cert_path: Option<String>,

    /// Path to private key file (PEM).
    pub key_path: Option<String>,

    /// "none", "optional" or "require" (case-insensitive).
    pub client_auth: String,

    /// CA bundle (PEM) used to verify client certificates.
    pub client_ca_path: Option<String>,

    /// ALPN protocols in preference order.
    pub alpn_protocols: Vec<String>,

    pub cipher_policy: CipherPolicy,
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self {
            self_signed: false,
            cert_path: None,
            key_path: None,
            client_auth: "none".to_string(),
            client_ca_path: None,
            alpn_protocols: vec!["h2".to_string(), "http/1.1".to_string()],
            cipher_policy: CipherPolicy::default(),
        }
    }
}

impl ServerConfig {
    /// Effective log level, `info` when unset.
    pub fn log_level(&self) -> &str {
        if self.log_level.is_empty() {
            "info"
        } else {
            &self.log_level
        }
    }
}
