//! Request capture middleware
//!
//! Wraps a handler so each request is dumped verbatim (request line,
//! headers, body) before the handler runs, and the dump is queued for the
//! archive worker after the handler has produced its response. A full
//! archive channel holds the request task until space frees up.

use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{header, request::Parts, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

use super::worker::ArchiveSender;

/// Largest request body captured
pub const MAX_CAPTURE_BYTES: usize = 64 * 1024 * 1024;

/// Render a request in HTTP/1.x wire form
pub fn dump_request(parts: &Parts, body: &[u8]) -> Vec<u8> {
    let mut dump = Vec::with_capacity(256 + body.len());

    let target = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let request_line = format!("{} {} {:?}\r\n", parts.method, target, parts.version);
    dump.extend_from_slice(request_line.as_bytes());

    if !parts.headers.contains_key(header::HOST) {
        if let Some(authority) = parts.uri.authority() {
            dump.extend_from_slice(format!("Host: {}\r\n", authority).as_bytes());
        }
    }

    for (name, value) in &parts.headers {
        dump.extend_from_slice(name.as_str().as_bytes());
        dump.extend_from_slice(b": ");
        dump.extend_from_slice(value.as_bytes());
        dump.extend_from_slice(b"\r\n");
    }
    dump.extend_from_slice(b"\r\n");
    dump.extend_from_slice(body);

    dump
}

/// Middleware that archives the wrapped route's traffic.
///
/// Install with `axum::middleware::from_fn_with_state(sender, archive_request)`.
pub async fn archive_request(
    State(archive): State<ArchiveSender>,
    request: Request,
    next: Next,
) -> Response {
    let (parts, body) = request.into_parts();

    let body: Bytes = match axum::body::to_bytes(body, MAX_CAPTURE_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Dump failure for {} {}: {}", parts.method, parts.uri, e);
            return (StatusCode::BAD_REQUEST, "Unable to read request body").into_response();
        }
    };

    // Snapshot before the handler gets the request
    let dump = dump_request(&parts, &body);

    let response = next.run(Request::from_parts(parts, Body::from(body))).await;

    if archive.send(dump).await.is_err() {
        warn!("Archive worker is not running, request was not archived");
    }

    response
}
