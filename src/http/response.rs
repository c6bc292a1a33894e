//! Generic response → wire response translation.
//!
//! # Responsibilities
//! - Map the backend status code onto the wire
//! - Copy every backend header, keeping duplicates
//! - Force Content-Length to the exact body length
//!
//! # Design Decisions
//! - A backend-supplied Content-Length is always discarded
//! - Absent body means Content-Length: 0, never a chunked body
//! - HTTP/2 heads drop connection-specific headers, which the framing forbids

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONNECTION, CONTENT_LENGTH, TRANSFER_ENCODING, UPGRADE};
use http::{Response, StatusCode};
use http_body_util::Full;

use crate::http::correlation::StreamCorrelation;
use crate::http::multimap::MultiMap;
use crate::http::server::ExchangeError;

/// Response produced by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericResponse {
    pub status: u16,
    pub headers: MultiMap,
    pub body: Option<Bytes>,
}

impl GenericResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: MultiMap::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.add(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Consume the response into a wire head plus optional body.
    pub fn into_wire(self) -> Result<WireResponse, ExchangeError> {
        let status = StatusCode::from_u16(self.status)
            .map_err(|_| ExchangeError::InvalidStatus(self.status))?;

        let mut head = Response::new(());
        *head.status_mut() = status;

        let headers = head.headers_mut();
        for (name, value) in self.headers.iter() {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ExchangeError::InvalidHeader(name.to_string()))?;
            if name == CONTENT_LENGTH {
                continue;
            }
            let value = HeaderValue::from_str(value)
                .map_err(|_| ExchangeError::InvalidHeader(name.to_string()))?;
            headers.append(name, value);
        }

        let length = self.body.as_ref().map_or(0, Bytes::len);
        headers.insert(CONTENT_LENGTH, HeaderValue::from(length));

        Ok(WireResponse {
            head,
            body: self.body,
        })
    }
}

/// Response head and body ready for either framing.
#[derive(Debug)]
pub struct WireResponse {
    pub head: Response<()>,
    pub body: Option<Bytes>,
}

impl WireResponse {
    /// HTTP/1.1 response. Uncorrelated exchanges ask the codec to close afterwards.
    pub fn into_http1(self, correlation: &StreamCorrelation) -> Response<Full<Bytes>> {
        let (mut parts, ()) = self.head.into_parts();
        correlation.apply(&mut parts.headers);
        if !correlation.is_multiplexed() {
            parts.headers.insert(CONNECTION, HeaderValue::from_static("close"));
        }
        Response::from_parts(parts, Full::new(self.body.unwrap_or_default()))
    }

    /// HTTP/2 head and body; the connection itself always stays open.
    pub fn into_h2(self, correlation: &StreamCorrelation) -> (Response<()>, Option<Bytes>) {
        let mut head = self.head;
        let headers = head.headers_mut();
        for name in [CONNECTION, TRANSFER_ENCODING, UPGRADE] {
            headers.remove(name);
        }
        headers.remove("keep-alive");
        headers.remove("proxy-connection");
        correlation.apply(headers);
        (head, self.body)
    }
}
