//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - TLS material supplied consistently (pair of files, or self-signed)
//! - ALPN list limited to protocols the server can speak
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Unknown client-auth strings are not errors; they mean "none" and are
//!   reported as warnings

use crate::config::schema::ServerConfig;
use crate::net::tls::{AlpnProtocol, ClientAuth};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Only one of cert_path / key_path was given.
    IncompleteKeyPair,
    /// Both self_signed and explicit certificate files were given.
    ConflictingCertificateSource,
    /// TLS section present but neither self_signed nor files.
    MissingCertificateSource,
    EmptyAlpnList,
    UnsupportedAlpn(String),
    ZeroWorkers,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::IncompleteKeyPair => {
                write!(f, "tls.cert_path and tls.key_path must be set together")
            }
            ValidationError::ConflictingCertificateSource => {
                write!(f, "tls.self_signed conflicts with certificate files")
            }
            ValidationError::MissingCertificateSource => {
                write!(f, "tls requires self_signed or cert_path/key_path")
            }
            ValidationError::EmptyAlpnList => write!(f, "tls.alpn_protocols is empty"),
            ValidationError::UnsupportedAlpn(p) => write!(f, "unsupported ALPN protocol {:?}", p),
            ValidationError::ZeroWorkers => write!(f, "workers must be greater than 0"),
        }
    }
}

impl std::error::Error for ValidationError {}

/// A non-fatal problem: the config is usable but probably not what was meant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationWarning {
    /// Client-auth mode other than none/optional/require; treated as none.
    UnknownClientAuth(String),
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationWarning::UnknownClientAuth(mode) => {
                write!(f, "unknown tls.client_auth {:?}, using none", mode)
            }
        }
    }
}

pub fn config_warnings(config: &ServerConfig) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();
    if let Some(tls) = &config.tls {
        if ClientAuth::parse(&tls.client_auth) == ClientAuth::None
            && !tls.client_auth.eq_ignore_ascii_case("none")
        {
            warnings.push(ValidationWarning::UnknownClientAuth(tls.client_auth.clone()));
        }
    }
    warnings
}

pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if let Some(tls) = &config.tls {
        match (&tls.cert_path, &tls.key_path) {
            (Some(_), Some(_)) if tls.self_signed => {
                errors.push(ValidationError::ConflictingCertificateSource)
            }
            (Some(_), None) | (None, Some(_)) => errors.push(ValidationError::IncompleteKeyPair),
            (None, None) if !tls.self_signed => {
                errors.push(ValidationError::MissingCertificateSource)
            }
            _ => {}
        }

        if tls.alpn_protocols.is_empty() {
            errors.push(ValidationError::EmptyAlpnList);
        }
        for name in &tls.alpn_protocols {
            if AlpnProtocol::from_name(name).is_none() {
                errors.push(ValidationError::UnsupportedAlpn(name.clone()));
            }
        }
    }

    if config.workers == Some(0) {
        errors.push(ValidationError::ZeroWorkers);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
