//! Stream correlation for multiplexed exchanges.
//!
//! The inbound stream identifier travels as the `x-http2-stream-id` extension
//! header. HTTP/2 requests get it injected from the real stream id before
//! translation; an HTTP/1.1 client may also send it explicitly. Whenever it is
//! present the same value goes back on the response and the connection stays open.

use http::header::{HeaderMap, HeaderName, HeaderValue};

pub const STREAM_ID_HEADER: HeaderName = HeaderName::from_static("x-http2-stream-id");

/// Stream identifier of one exchange, decided once when the request arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamCorrelation(Option<HeaderValue>);

impl StreamCorrelation {
    /// Plain single-shot exchange.
    pub fn none() -> Self {
        Self(None)
    }

    pub fn from_stream_id(id: u32) -> Self {
        Self(Some(HeaderValue::from(id)))
    }

    /// Read the identifier from the inbound headers, if any.
    pub fn extract(headers: &HeaderMap) -> Self {
        match headers.get(&STREAM_ID_HEADER) {
            Some(id) => Self(Some(id.clone())),
            None => Self::none(),
        }
    }

    pub fn is_multiplexed(&self) -> bool {
        self.0.is_some()
    }

    /// Mirror the identifier onto outbound headers, replacing any backend value.
    pub fn apply(&self, headers: &mut HeaderMap) {
        if let Some(id) = &self.0 {
            headers.insert(STREAM_ID_HEADER, id.clone());
        }
    }
}
