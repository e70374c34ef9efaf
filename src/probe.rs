//! Echo probe: the zero-work round-trip target for latency samples

use bytes::Bytes;
use http_body_util::Empty;
use hyper::{Response, StatusCode};

use crate::stats::ServerStats;

/// Answer a probe with an empty, uncacheable 200
///
/// Cache headers are added by the router like for every other route.
#[must_use]
pub fn respond(stats: &ServerStats) -> Response<Empty<Bytes>> {
    stats.probe();

    let mut response = Response::new(Empty::new());
    *response.status_mut() = StatusCode::OK;
    response
}
