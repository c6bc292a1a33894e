//! TLS configuration, certificate loading and ALPN selection.
//!
//! # Responsibilities
//! - Produce certificate material, generated or read from PEM files
//! - Map the client-auth mode onto a rustls client verifier
//! - Advertise ALPN candidates in preference order (h2 before http/1.1)
//! - Fall back to plain HTTP/1.1 when ALPN negotiation finds no match
//!
//! # Design Decisions
//! - One explicit `TlsConfig` value, immutable once the listener starts
//! - Any problem with the material is a startup error, never a partial context
//! - The ClientHello is inspected before choosing the rustls config, because
//!   rustls alone would abort a handshake with no ALPN overlap

use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::server::{VerifierBuilderError, WebPkiClientVerifier};
use rustls::{CipherSuite, RootCertStore, ServerConfig};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::server::TlsStream;
use tokio_rustls::LazyConfigAcceptor;

/// Error type for TLS context construction.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no certificates found in {0:?}")]
    NoCertificates(PathBuf),
    #[error("no private key found in {0:?}")]
    NoPrivateKey(PathBuf),
    #[error("self-signed certificate generation failed: {0}")]
    Generate(#[from] rcgen::Error),
    #[error("invalid TLS configuration: {0}")]
    Rustls(#[from] rustls::Error),
    #[error("invalid client verifier: {0}")]
    ClientVerifier(#[from] VerifierBuilderError),
    #[error("ALPN protocol list is empty")]
    NoAlpnProtocols,
}

/// Where the server certificate comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateSource {
    /// Fresh self-signed certificate for `localhost` / `127.0.0.1`.
    SelfSigned,
    /// PEM certificate chain and private key.
    Files { cert: PathBuf, key: PathBuf },
}

/// Client certificate policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ClientAuth {
    #[default]
    None,
    Optional,
    Require,
}

impl ClientAuth {
    /// Case-insensitive; anything other than `optional`/`require` is `None`.
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("optional") {
            ClientAuth::Optional
        } else if value.eq_ignore_ascii_case("require") {
            ClientAuth::Require
        } else {
            ClientAuth::None
        }
    }
}

/// Application protocols this server can speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlpnProtocol {
    Http2,
    Http11,
}

impl AlpnProtocol {
    pub const fn id(&self) -> &'static [u8] {
        match self {
            AlpnProtocol::Http2 => b"h2",
            AlpnProtocol::Http11 => b"http/1.1",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "h2" => Some(AlpnProtocol::Http2),
            "http/1.1" => Some(AlpnProtocol::Http11),
            _ => None,
        }
    }
}

/// Cipher-suite policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CipherPolicy {
    /// TLS 1.3 suites plus the TLS 1.2 ECDHE AEAD suites HTTP/2 permits.
    #[default]
    Http2Secure,
    /// Whatever the crypto provider enables by default.
    ProviderDefault,
}

const HTTP2_SECURE_SUITES: &[CipherSuite] = &[
    CipherSuite::TLS13_AES_128_GCM_SHA256,
    CipherSuite::TLS13_AES_256_GCM_SHA384,
    CipherSuite::TLS13_CHACHA20_POLY1305_SHA256,
    CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
    CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
    CipherSuite::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
    CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
    CipherSuite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
    CipherSuite::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
];

/// Full TLS settings for the listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    pub source: CertificateSource,
    pub client_auth: ClientAuth,
    /// Most preferred first.
    pub alpn_protocols: Vec<AlpnProtocol>,
    pub cipher_policy: CipherPolicy,
    /// Trust anchors for client certificates; the server chain when absent.
    pub client_ca: Option<PathBuf>,
}

impl TlsConfig {
    pub fn self_signed(client_auth: ClientAuth) -> Self {
        Self::with_source(CertificateSource::SelfSigned, client_auth)
    }

    pub fn from_files(
        cert: impl Into<PathBuf>,
        key: impl Into<PathBuf>,
        client_auth: ClientAuth,
    ) -> Self {
        Self::with_source(
            CertificateSource::Files {
                cert: cert.into(),
                key: key.into(),
            },
            client_auth,
        )
    }

    fn with_source(source: CertificateSource, client_auth: ClientAuth) -> Self {
        Self {
            source,
            client_auth,
            alpn_protocols: vec![AlpnProtocol::Http2, AlpnProtocol::Http11],
            cipher_policy: CipherPolicy::default(),
            client_ca: None,
        }
    }
}

/// Built TLS context shared by every connection.
#[derive(Clone)]
pub struct TlsContext {
    /// Advertises the configured ALPN list.
    negotiating: Arc<ServerConfig>,
    /// Same context with ALPN disabled, for peers we share no protocol with.
    fallback: Arc<ServerConfig>,
    protocols: Vec<AlpnProtocol>,
}

impl std::fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsContext")
            .field("protocols", &self.protocols)
            .finish_non_exhaustive()
    }
}

impl TlsContext {
    /// Perform the server handshake on an accepted stream.
    pub async fn accept<IO>(&self, stream: IO) -> std::io::Result<TlsStream<IO>>
    where
        IO: AsyncRead + AsyncWrite + Unpin,
    {
        let start = LazyConfigAcceptor::new(rustls::server::Acceptor::default(), stream).await?;
        let offered: Option<Vec<Vec<u8>>> = start
            .client_hello()
            .alpn()
            .map(|protocols| protocols.map(<[u8]>::to_vec).collect());
        let config = self.select_config(offered.as_deref());
        start.into_stream(config).await
    }

    /// Pick the config for a ClientHello's ALPN offer.
    ///
    /// No offer, or an offer sharing a protocol with us, negotiates normally.
    /// An offer with no overlap is served without ALPN rather than rejected.
    pub fn select_config(&self, offered: Option<&[Vec<u8>]>) -> Arc<ServerConfig> {
        match offered {
            Some(offered)
                if !self
                    .protocols
                    .iter()
                    .any(|p| offered.iter().any(|o| o.as_slice() == p.id())) =>
            {
                tracing::debug!("no common ALPN protocol, accepting without negotiation");
                Arc::clone(&self.fallback)
            }
            _ => Arc::clone(&self.negotiating),
        }
    }
}

/// Build the TLS context from its configuration.
pub fn build_tls_context(config: &TlsConfig) -> Result<TlsContext, TlsError> {
    if config.alpn_protocols.is_empty() {
        return Err(TlsError::NoAlpnProtocols);
    }

    let (chain, key) = match &config.source {
        CertificateSource::SelfSigned => generate_self_signed()?,
        CertificateSource::Files { cert, key } => (load_certs(cert)?, load_key(key)?),
    };

    let provider = Arc::new(crypto_provider(config.cipher_policy));
    let builder = ServerConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()?;

    let builder = match config.client_auth {
        ClientAuth::None => builder.with_no_client_auth(),
        mode => {
            let mut roots = RootCertStore::empty();
            let anchors = match &config.client_ca {
                Some(path) => load_certs(path)?,
                None => chain.clone(),
            };
            for anchor in anchors {
                roots.add(anchor)?;
            }
            let verifier =
                WebPkiClientVerifier::builder_with_provider(Arc::new(roots), Arc::clone(&provider));
            let verifier = if mode == ClientAuth::Optional {
                verifier.allow_unauthenticated().build()?
            } else {
                verifier.build()?
            };
            builder.with_client_cert_verifier(verifier)
        }
    };

    let mut negotiating = builder.with_single_cert(chain, key)?;
    let mut fallback = negotiating.clone();
    negotiating.alpn_protocols = config
        .alpn_protocols
        .iter()
        .map(|p| p.id().to_vec())
        .collect();
    fallback.alpn_protocols.clear();

    tracing::debug!(
        source = ?config.source,
        client_auth = ?config.client_auth,
        alpn = ?config.alpn_protocols,
        "TLS context built"
    );

    Ok(TlsContext {
        negotiating: Arc::new(negotiating),
        fallback: Arc::new(fallback),
        protocols: config.alpn_protocols.clone(),
    })
}

fn crypto_provider(policy: CipherPolicy) -> CryptoProvider {
    let mut provider = rustls::crypto::aws_lc_rs::default_provider();
    if policy == CipherPolicy::Http2Secure {
        provider
            .cipher_suites
            .retain(|suite| HTTP2_SECURE_SUITES.contains(&suite.suite()));
    }
    provider
}

fn generate_self_signed() -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), TlsError> {
    let certified = rcgen::generate_simple_self_signed(vec![
        "localhost".to_string(),
        "127.0.0.1".to_string(),
    ])?;
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der()));
    Ok((vec![certified.cert.der().clone()], key))
}

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TlsError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| TlsError::Io {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_path_buf()))
}
