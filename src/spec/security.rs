//! Security-scheme classification for a parsed OpenAPI document.
//!
//! The first scheme in `components.securitySchemes` (document order)
//! determines how tool calls authenticate against the upstream API.

use super::header_case::HeaderCaseMap;
use serde_json::Value;
use std::collections::HashMap;

/// Authentication flavor declared by the spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthKind {
    Bearer,
    Basic,
    ApiKey,
    None,
}

/// Where the credential is injected on the upstream request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthLocation {
    Header,
    Query,
}

/// Per-spec authentication descriptor, derived once at load time.
#[derive(Debug, Clone)]
pub struct AuthDescriptor {
    pub kind: AuthKind,
    pub location: AuthLocation,

    /// Header or query parameter carrying the credential, in the original
    /// casing recovered from the raw spec text.
    pub param_name: String,

    /// Host-style companion headers (e.g. `X-RapidAPI-Host`) mapped to the
    /// value they must carry on every upstream call.
    pub host_headers: HashMap<String, String>,

    /// Upstream host from `servers[0].url`, scheme and path stripped.
    pub api_host: String,
}

impl AuthDescriptor {
    pub fn none() -> Self {
        Self {
            kind: AuthKind::None,
            location: AuthLocation::Header,
            param_name: String::new(),
            host_headers: HashMap::new(),
            api_host: String::new(),
        }
    }
}

/// Classify the document's security scheme and derive the injection plan.
pub fn extract_auth(document: &Value, case_map: &HeaderCaseMap) -> AuthDescriptor {
    let api_host = extract_api_host(document);
    let host_headers = extract_host_headers(document, case_map, &api_host);

    let schemes = document
        .get("components")
        .and_then(|c| c.get("securitySchemes"))
        .and_then(Value::as_object);

    let Some(schemes) = schemes else {
        return AuthDescriptor {
            api_host,
            host_headers,
            ..AuthDescriptor::none()
        };
    };

    // First scheme in document order wins.
    let Some(scheme) = schemes.values().next() else {
        return AuthDescriptor {
            api_host,
            host_headers,
            ..AuthDescriptor::none()
        };
    };

    let scheme_type = scheme.get("type").and_then(Value::as_str).unwrap_or_default();
    let (kind, location, param_name) = match scheme_type {
        "apiKey" => {
            let name = scheme.get("name").and_then(Value::as_str).unwrap_or_default();
            let location = match scheme.get("in").and_then(Value::as_str) {
                Some("query") => AuthLocation::Query,
                _ => AuthLocation::Header,
            };
            let param_name = match location {
                AuthLocation::Header => case_map
                    .original_or(&name.to_ascii_lowercase(), name)
                    .to_string(),
                AuthLocation::Query => name.to_string(),
            };
            (AuthKind::ApiKey, location, param_name)
        },
        "http" => match scheme.get("scheme").and_then(Value::as_str) {
            Some("bearer") => (AuthKind::Bearer, AuthLocation::Header, "Authorization".to_string()),
            Some("basic") => (AuthKind::Basic, AuthLocation::Header, "Authorization".to_string()),
            _ => (AuthKind::None, AuthLocation::Header, String::new()),
        },
        _ => (AuthKind::None, AuthLocation::Header, String::new()),
    };

    AuthDescriptor {
        kind,
        location,
        param_name,
        host_headers,
        api_host,
    }
}

/// Host portion of `servers[0].url`, scheme and path stripped.
fn extract_api_host(document: &Value) -> String {
    let server_url = document
        .get("servers")
        .and_then(Value::as_array)
        .and_then(|servers| servers.first())
        .and_then(|server| server.get("url"))
        .and_then(Value::as_str)
        .unwrap_or_default();

    match url::Url::parse(server_url) {
        Ok(url) => {
            let host = url.host_str().unwrap_or_default();
            match url.port() {
                Some(port) => format!("{}:{}", host, port),
                None => host.to_string(),
            }
        },
        // Relative or bare server URLs: strip any scheme prefix and path tail.
        Err(_) => server_url
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .split('/')
            .next()
            .unwrap_or_default()
            .to_string(),
    }
}

/// Header parameters whose name contains `host` (case-insensitive), mapped
/// to their schema default or, failing that, to the upstream host. RapidAPI
/// mandates an `X-RapidAPI-Host` companion for every keyed call.
fn extract_host_headers(
    document: &Value,
    case_map: &HeaderCaseMap,
    api_host: &str,
) -> HashMap<String, String> {
    let mut host_headers = HashMap::new();

    let Some(parameters) = document
        .get("components")
        .and_then(|c| c.get("parameters"))
        .and_then(Value::as_object)
    else {
        return host_headers;
    };

    for param in parameters.values() {
        if param.get("in").and_then(Value::as_str) != Some("header") {
            continue;
        }
        let Some(name) = param.get("name").and_then(Value::as_str) else {
            continue;
        };
        let lower = name.to_ascii_lowercase();
        if !lower.contains("host") {
            continue;
        }

        let value = param
            .get("schema")
            .and_then(|s| s.get("default"))
            .and_then(Value::as_str)
            .unwrap_or(api_host);

        let original = case_map.original_or(&lower, name).to_string();
        host_headers.insert(original, value.to_string());
    }

    host_headers
}
