//! Admin control plane.
//!
//! Any request whose target starts with `/__admin/stop` bypasses the backend,
//! fires the shutdown trigger and gets a fixed `200 stopped` reply. The method
//! is not checked.

use http::Uri;

use crate::http::GenericResponse;

pub const STOP_PATH_PREFIX: &str = "/__admin/stop";

/// Plain prefix match on the origin-form target (path plus query).
pub fn is_stop_request(uri: &Uri) -> bool {
    uri.path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path())
        .starts_with(STOP_PATH_PREFIX)
}

/// The fixed reply to a stop request.
pub fn stopped_response() -> GenericResponse {
    GenericResponse::new(200).with_body("stopped")
}
