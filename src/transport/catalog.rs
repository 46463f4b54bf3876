//! Tool-catalog HTTP façade.
//!
//! `GET /{tenant}/tools` returns the synthesized tool list as plain JSON,
//! bypassing JSON-RPC. Intended for dashboards and quick inspection, so
//! responses are cacheable and compact by default.

use crate::spec::ParsedSpec;
use crate::transport::{accepts_gzip, gzip, GZIP_MIN_BYTES};
use axum::body::Body;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

const CACHE_CONTROL_VALUE: &str = "public, max-age=300";

#[derive(Debug, Default, Deserialize)]
pub struct CatalogQuery {
    pub compact: Option<bool>,
    pub compressed: Option<bool>,
    pub limit: Option<usize>,
}

/// Render the catalog response for one spec.
pub fn handle_tools_catalog(
    spec: &Arc<ParsedSpec>,
    query: &CatalogQuery,
    request_headers: &HeaderMap,
) -> Response {
    let compact = query.compact.unwrap_or(true);
    let compressed = query.compressed.unwrap_or(true);

    let total = spec.tools.len();
    let bindings = match query.limit {
        Some(limit) => &spec.tools[..limit.min(total)],
        None => &spec.tools[..],
    };

    let tools: Vec<Value> = bindings
        .iter()
        .map(|binding| {
            if compact {
                json!({
                    "name": binding.tool.name,
                    "description": binding
                        .tool
                        .description
                        .as_deref()
                        .map(strip_control_chars)
                        .unwrap_or_default(),
                })
            } else {
                json!(binding.tool)
            }
        })
        .collect();

    let body = match serde_json::to_vec(&tools) {
        Ok(body) => body,
        Err(e) => return crate::error::Error::Internal(e.to_string()).into_response(),
    };

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CACHE_CONTROL, CACHE_CONTROL_VALUE);

    if query.limit.is_some() {
        builder = builder
            .header("X-Total-Tools", total.to_string())
            .header("X-Returned-Tools", bindings.len().to_string());
    }

    let body = if compressed && body.len() > GZIP_MIN_BYTES && accepts_gzip(request_headers) {
        match gzip(&body) {
            Some(compressed_body) => {
                builder = builder
                    .header(header::CONTENT_ENCODING, "gzip")
                    .header(header::VARY, "Accept-Encoding");
                compressed_body
            },
            None => body,
        }
    } else {
        body
    };

    builder
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Drop control characters that break single-line consumers, keeping
/// tab, newline, and carriage return.
fn strip_control_chars(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\t' | '\n' | '\r'))
        .collect()
}
