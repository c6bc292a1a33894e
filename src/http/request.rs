//! Wire request → generic request translation.
//!
//! # Responsibilities
//! - Split the request target into `url_base` and `path`
//! - Synthesize `url_base` from the Host header for origin-form targets
//! - Copy headers and query parameters without deduplication
//! - Copy the body only when one was actually sent
//!
//! # Design Decisions
//! - Absolute-form targets (always the case for HTTP/2) supply their own base
//! - Missing Host on an origin-form target falls back to the local address
//!   the connection was accepted on

use bytes::Bytes;
use http::header::HOST;
use http::request::Parts;
use std::net::SocketAddr;
use std::time::SystemTime;

use crate::http::multimap::MultiMap;

/// Protocol-agnostic request handed to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericRequest {
    pub method: String,
    /// `scheme://authority`, never with a trailing slash.
    pub url_base: String,
    /// Path component of the target, without the query string.
    pub path: String,
    /// Raw query string, if the target had one.
    pub query: Option<String>,
    /// Every header line, duplicates kept. Values of one name keep their wire
    /// order; the relative order of different names does not survive parsing.
    pub headers: MultiMap,
    pub params: MultiMap,
    /// `None` when the message carried no body bytes.
    pub body: Option<Bytes>,
    pub received_at: SystemTime,
}

impl GenericRequest {
    /// Build a generic request from the parsed head and fully-read body.
    pub fn from_wire(
        parts: &Parts,
        body: Bytes,
        tls: bool,
        local_addr: SocketAddr,
        received_at: SystemTime,
    ) -> Self {
        let uri = &parts.uri;
        let url_base = match (uri.scheme_str(), uri.authority()) {
            (Some(scheme), Some(authority)) => format!("{}://{}", scheme, authority),
            _ => {
                let scheme = if tls { "https" } else { "http" };
                let host = parts
                    .headers
                    .get(HOST)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
                    .unwrap_or_else(|| local_addr.to_string());
                format!("{}://{}", scheme, host)
            }
        };

        let path = if uri.path().is_empty() { "/" } else { uri.path() }.to_string();
        let query = uri.query().map(str::to_string);

        let mut headers = MultiMap::new();
        for (name, value) in parts.headers.iter() {
            headers.add(name.as_str(), String::from_utf8_lossy(value.as_bytes()));
        }

        let params = query.as_deref().map(parse_query).unwrap_or_default();

        Self {
            method: parts.method.as_str().to_string(),
            url_base,
            path,
            query,
            headers,
            params,
            body: if body.is_empty() { None } else { Some(body) },
            received_at,
        }
    }

    /// Base plus path plus query, as the client addressed it.
    pub fn url(&self) -> String {
        match &self.query {
            Some(q) => format!("{}{}?{}", self.url_base, self.path, q),
            None => format!("{}{}", self.url_base, self.path),
        }
    }
}

/// Decode a query string into an ordered multimap (`+` is a space).
pub fn parse_query(query: &str) -> MultiMap {
    let mut params = MultiMap::new();
    for (k, v) in url::form_urlencoded::parse(query.as_bytes()) {
        params.add(k, v);
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Request;

    fn parts(req: Request<()>) -> Parts {
        req.into_parts().0
    }

    fn local() -> SocketAddr {
        "127.0.0.1:4444".parse().unwrap()
    }

    #[test]
    fn origin_form_uses_host_header() {
        let p = parts(
            Request::get("/foo?x=1")
                .header("Host", "localhost")
                .body(())
                .unwrap(),
        );
        let req = GenericRequest::from_wire(&p, Bytes::new(), false, local(), SystemTime::now());
        assert_eq!(req.url_base, "http://localhost");
        assert_eq!(req.path, "/foo");
        assert_eq!(req.params.get_all("x"), vec!["1"]);
        assert!(req.body.is_none());
    }

    #[test]
    fn tls_switches_scheme() {
        let p = parts(Request::get("/").header("Host", "a:8443").body(()).unwrap());
        let req = GenericRequest::from_wire(&p, Bytes::new(), true, local(), SystemTime::now());
        assert_eq!(req.url_base, "https://a:8443");
    }

    #[test]
    fn absolute_form_supplies_base() {
        let p = parts(Request::get("http://example.com/path").body(()).unwrap());
        let req = GenericRequest::from_wire(&p, Bytes::new(), false, local(), SystemTime::now());
        assert_eq!(req.url_base, "http://example.com");
        assert_eq!(req.path, "/path");
        assert_eq!(req.url(), "http://example.com/path");
    }

    #[test]
    fn missing_host_falls_back_to_local_address() {
        let p = parts(Request::get("/x").body(()).unwrap());
        let req = GenericRequest::from_wire(&p, Bytes::new(), false, local(), SystemTime::now());
        assert_eq!(req.url_base, "http://127.0.0.1:4444");
    }

    #[test]
    fn duplicate_headers_and_params_survive() {
        let p = parts(
            Request::post("/q?a=1&b=2&a=3&c")
                .header("Host", "h")
                .header("x-dup", "one")
                .header("x-dup", "two")
                .body(())
                .unwrap(),
        );
        let req = GenericRequest::from_wire(
            &p,
            Bytes::from_static(b"payload"),
            false,
            local(),
            SystemTime::now(),
        );
        assert_eq!(req.headers.get_all("x-dup"), vec!["one", "two"]);
        assert_eq!(req.params.get_all("a"), vec!["1", "3"]);
        assert_eq!(req.params.get_all("c"), vec![""]);
        assert_eq!(req.params.len(), 4);
        assert_eq!(req.body.as_deref(), Some(&b"payload"[..]));
        assert_eq!(req.method, "POST");
    }

    #[test]
    fn plus_decodes_to_space() {
        let params = parse_query("q=hello+world&enc=%2Fa");
        assert_eq!(params.get("q"), Some("hello world"));
        assert_eq!(params.get("enc"), Some("/a"));
    }
}
