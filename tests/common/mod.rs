//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use karate_mock_server::backend::{Backend, BackendError};
use karate_mock_server::http::{GenericRequest, GenericResponse};
use karate_mock_server::lifecycle::{start, ServerHandle, StartOptions};
use karate_mock_server::net::tls::TlsConfig;

/// Backend that records every request and echoes a fixed body.
#[derive(Clone, Default)]
pub struct RecordingBackend {
    pub seen: Arc<Mutex<Vec<GenericRequest>>>,
}

impl RecordingBackend {
    pub fn requests(&self) -> Vec<GenericRequest> {
        self.seen.lock().unwrap().clone()
    }
}

impl Backend for RecordingBackend {
    fn build_response(
        &self,
        request: GenericRequest,
        _started_at: SystemTime,
    ) -> Result<GenericResponse, BackendError> {
        let body = request.body.clone();
        self.seen.lock().unwrap().push(request);
        let response = GenericResponse::new(200).with_header("X-Mock", "yes");
        Ok(match body {
            Some(body) => response.with_body(body),
            None => response,
        })
    }
}

/// Backend that always fails.
pub fn failing_backend() -> Arc<dyn Backend> {
    Arc::new(
        |_req: GenericRequest, _at: SystemTime| -> Result<GenericResponse, BackendError> {
            Err(BackendError::new("boom"))
        },
    )
}

/// Start a loopback server on an ephemeral port.
pub fn start_server(backend: Arc<dyn Backend>, tls: Option<TlsConfig>) -> ServerHandle {
    let mut options = match tls {
        Some(tls) => StartOptions::new(0).with_tls(tls),
        None => StartOptions::new(0),
    };
    options.bind_host = "127.0.0.1".to_string();
    options.workers = Some(2);
    start(options, move |_| Ok(backend)).unwrap()
}

/// `stop()` blocks, so run it off the test runtime's worker threads.
pub async fn stop(server: &ServerHandle) {
    let server = server.clone();
    tokio::time::timeout(
        Duration::from_secs(10),
        tokio::task::spawn_blocking(move || server.stop()),
    )
    .await
    .expect("stop timed out")
    .unwrap();
}

pub fn addr(server: &ServerHandle) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], server.port()))
}

/// Write a raw request, then read until the server closes the connection.
pub async fn send_and_read_to_end<S>(stream: &mut S, request: &str) -> Vec<u8>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut buf = Vec::new();
    // A reset after a forced close is as good as EOF.
    let _ = tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut buf))
        .await
        .expect("server did not close the connection");
    buf
}

/// Parsed HTTP/1.1 response read off a connection that may stay open.
#[derive(Debug)]
pub struct RawResponse {
    pub head: String,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn status(&self) -> u16 {
        self.head
            .split_whitespace()
            .nth(1)
            .and_then(|s| s.parse().ok())
            .unwrap()
    }

    /// First value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim())
        })
    }
}

pub fn parse_response(raw: &[u8]) -> RawResponse {
    let split = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("incomplete response head");
    RawResponse {
        head: String::from_utf8_lossy(&raw[..split]).into_owned(),
        body: raw[split + 4..].to_vec(),
    }
}

/// Read exactly one Content-Length framed response.
pub async fn read_response<S>(stream: &mut S) -> RawResponse
where
    S: AsyncRead + Unpin,
{
    let mut raw = Vec::new();
    let mut byte = [0u8; 1];
    while !raw.ends_with(b"\r\n\r\n") {
        let n = stream.read(&mut byte).await.unwrap();
        assert!(n > 0, "connection closed mid-head");
        raw.push(byte[0]);
    }
    let mut response = parse_response(&raw);
    let length: usize = response
        .header("content-length")
        .map(|v| v.parse().unwrap())
        .unwrap_or(0);
    let mut body = vec![0u8; length];
    stream.read_exact(&mut body).await.unwrap();
    response.body = body;
    response
}

#[derive(Debug)]
struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::aws_lc_rs::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Client identity presented during the handshake.
pub struct ClientIdentity {
    pub chain: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
}

/// TLS client trusting any server certificate.
pub fn tls_connector(alpn: &[&[u8]], identity: Option<ClientIdentity>) -> TlsConnector {
    let builder = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::aws_lc_rs::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .dangerous()
    .with_custom_certificate_verifier(Arc::new(NoVerifier));

    let mut config = match identity {
        Some(identity) => builder
            .with_client_auth_cert(identity.chain, identity.key)
            .unwrap(),
        None => builder.with_no_client_auth(),
    };
    config.alpn_protocols = alpn.iter().map(|p| p.to_vec()).collect();
    TlsConnector::from(Arc::new(config))
}

pub async fn connect_tls(
    server: &ServerHandle,
    alpn: &[&[u8]],
    identity: Option<ClientIdentity>,
) -> std::io::Result<TlsStream<TcpStream>> {
    let tcp = TcpStream::connect(addr(server)).await?;
    let name = ServerName::try_from("localhost").unwrap();
    tls_connector(alpn, identity).connect(name, tcp).await
}

/// Open an HTTP/2 client connection over TLS with ALPN `h2`.
pub async fn connect_h2(server: &ServerHandle) -> h2::client::SendRequest<Bytes> {
    let tls = connect_tls(server, &[b"h2"], None).await.unwrap();
    assert_eq!(tls.get_ref().1.alpn_protocol(), Some(b"h2".as_slice()));
    let (client, connection) = h2::client::handshake(tls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

/// Send one HTTP/2 request and collect the response.
pub async fn h2_request(
    client: &mut h2::client::SendRequest<Bytes>,
    request: http::Request<()>,
    body: Option<Bytes>,
) -> (http::response::Parts, Bytes) {
    let mut ready = client.clone().ready().await.unwrap();
    let (response, mut send) = ready.send_request(request, body.is_none()).unwrap();
    if let Some(body) = body {
        send.send_data(body, true).unwrap();
    }
    let (parts, mut stream) = response.await.unwrap().into_parts();
    let mut collected = Vec::new();
    while let Some(chunk) = stream.data().await {
        let chunk = chunk.unwrap();
        let _ = stream.flow_control().release_capacity(chunk.len());
        collected.extend_from_slice(&chunk);
    }
    (parts, Bytes::from(collected))
}

/// PEM material for a server certificate, a client CA and a client leaf.
pub struct Pki {
    pub server_cert: PathBuf,
    pub server_key: PathBuf,
    pub client_ca: PathBuf,
    pub client: ClientIdentity,
}

pub fn generate_pki(tag: &str) -> Pki {
    let dir = std::env::temp_dir().join(format!("mock-server-it-{}-{}", std::process::id(), tag));
    std::fs::create_dir_all(&dir).unwrap();

    let server = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let server_cert = dir.join("server.pem");
    let server_key = dir.join("server.key");
    std::fs::write(&server_cert, server.cert.pem()).unwrap();
    std::fs::write(&server_key, server.key_pair.serialize_pem()).unwrap();

    let mut ca_params = rcgen::CertificateParams::new(Vec::<String>::new()).unwrap();
    ca_params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
    ca_params
        .distinguished_name
        .push(rcgen::DnType::CommonName, "mock client ca");
    let ca_key = rcgen::KeyPair::generate().unwrap();
    let ca = ca_params.self_signed(&ca_key).unwrap();
    let client_ca = dir.join("client-ca.pem");
    std::fs::write(&client_ca, ca.pem()).unwrap();

    let mut leaf_params = rcgen::CertificateParams::new(vec!["client".to_string()]).unwrap();
    leaf_params
        .distinguished_name
        .push(rcgen::DnType::CommonName, "mock client");
    let leaf_key = rcgen::KeyPair::generate().unwrap();
    let leaf = leaf_params.signed_by(&leaf_key, &ca, &ca_key).unwrap();

    Pki {
        server_cert,
        server_key,
        client_ca,
        client: ClientIdentity {
            chain: vec![leaf.der().clone()],
            key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(leaf_key.serialize_der())),
        },
    }
}

/// In-memory log sink for a `tracing_subscriber::fmt` layer.
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    /// Subscriber writing plain-text events into this buffer.
    pub fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync {
        let sink = self.clone();
        tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(move || sink.clone())
            .finish()
    }
}

impl Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
