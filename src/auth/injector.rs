//! Credential injection on outbound upstream requests.
//!
//! The caller's request is never mutated: injection clones the request,
//! adds headers or query pairs to the clone, and returns it. Headers that
//! fail HTTP validation are skipped rather than failing the call.

use super::AuthContext;
use crate::error::{Error, Result};
use crate::spec::{AuthKind, AuthLocation};
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::Request;
use tracing::warn;

/// Header names fanned out when an apiKey spec declared no usable
/// parameter name.
const FANOUT_HEADERS: &[&str] = &["Authorization", "X-API-Key", "Api-Key", "X-RapidAPI-Key"];

/// Query names fanned out in the same situation.
const FANOUT_QUERY: &[&str] = &["key", "api_key", "apikey"];

/// Clone `request` and apply the resolved credentials from `ctx`.
pub fn inject(request: &Request, ctx: &AuthContext) -> Result<Request> {
    let mut injected = request
        .try_clone()
        .ok_or_else(|| Error::Internal("upstream request body is not cloneable".to_string()))?;

    if !ctx.has_token() {
        return Ok(injected);
    }

    match ctx.kind {
        AuthKind::Bearer => {
            set_header(&mut injected, "Authorization", &format!("Bearer {}", ctx.token));
        },
        AuthKind::Basic => {
            // Token is already base64-encoded by the caller side.
            set_header(&mut injected, "Authorization", &format!("Basic {}", ctx.token));
        },
        AuthKind::ApiKey => match ctx.location {
            AuthLocation::Header if !ctx.param_name.is_empty() => {
                set_header(&mut injected, &ctx.param_name, &ctx.token);
                apply_host_headers(&mut injected, ctx);
            },
            AuthLocation::Query if !ctx.param_name.is_empty() => {
                injected
                    .url_mut()
                    .query_pairs_mut()
                    .append_pair(&ctx.param_name, &ctx.token);
            },
            // Unknown parameter name: fan out across the common spellings.
            _ => {
                for name in FANOUT_HEADERS {
                    set_header(&mut injected, name, &ctx.token);
                }
                {
                    let mut pairs = injected.url_mut().query_pairs_mut();
                    for name in FANOUT_QUERY {
                        pairs.append_pair(name, &ctx.token);
                    }
                }
                apply_host_headers(&mut injected, ctx);
            },
        },
        AuthKind::None => {},
    }

    Ok(injected)
}

fn apply_host_headers(request: &mut Request, ctx: &AuthContext) {
    for (name, value) in &ctx.host_headers {
        set_header(request, name, value);
    }
}

fn set_header(request: &mut Request, name: &str, value: &str) {
    let header_name = match HeaderName::from_bytes(name.as_bytes()) {
        Ok(name) => name,
        Err(_) => {
            warn!(header = %name, "Skipping invalid auth header name");
            return;
        },
    };
    let header_value = match HeaderValue::from_str(value) {
        Ok(value) => value,
        Err(_) => {
            warn!(header = %name, "Skipping auth header with invalid value");
            return;
        },
    };
    request.headers_mut().insert(header_name, header_value);
}
