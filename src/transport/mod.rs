//! HTTP transport layer: the streamable MCP endpoint and the tool-catalog
//! façade, plus the framing and compression helpers they share.

use axum::http::HeaderMap;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;
use tracing::warn;

pub mod catalog;
pub mod streamable_http;

pub use catalog::handle_tools_catalog;
pub use streamable_http::{handle_delete, handle_get, handle_post};

/// Responses at or under this size are never compressed.
pub(crate) const GZIP_MIN_BYTES: usize = 1024;

/// Whether the client advertised gzip support.
pub(crate) fn accepts_gzip(headers: &HeaderMap) -> bool {
    headers
        .get(axum::http::header::ACCEPT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("gzip"))
        .unwrap_or(false)
}

/// Gzip a response body. Returns `None` on encoder failure so callers fall
/// back to the uncompressed bytes.
pub(crate) fn gzip(data: &[u8]) -> Option<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    if let Err(e) = encoder.write_all(data) {
        warn!(error = %e, "Failed to gzip response body");
        return None;
    }
    match encoder.finish() {
        Ok(compressed) => Some(compressed),
        Err(e) => {
            warn!(error = %e, "Failed to finish gzip stream");
            None
        },
    }
}

/// Render one SSE frame: `event: <name>\ndata: <payload>\n\n`.
pub(crate) fn sse_frame(event: &str, data: &str) -> String {
    format!("event: {}\ndata: {}\n\n", event, data)
}
