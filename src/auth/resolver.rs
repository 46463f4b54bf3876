//! Per-request credential resolution.
//!
//! A strict five-level cascade, first non-empty value wins:
//! tool arguments, preserved request headers, spec-bound token,
//! environment, none. The resolver is pure over its inputs and performs no
//! I/O; the environment is abstracted behind [`EnvSource`] so lookups stay
//! deterministic under test.

use crate::spec::{AuthDescriptor, AuthKind, HeaderCaseMap};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

const BEARER_PREFIX: &str = "Bearer ";
const BASIC_PREFIX: &str = "Basic ";

/// Tool-argument fallbacks consulted when the declared apiKey parameter is
/// absent from the arguments.
const ARG_KEY_FALLBACKS: &[&str] = &["key", "apikey", "api_key", "api-key"];

/// Header fallbacks scanned when the spec gave no usable apiKey header name.
const HEADER_KEY_FALLBACKS: &[&str] = &["x-api-key", "api-key", "x-rapidapi-key"];

/// Where a token came from, for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    ToolArguments,
    RequestHeaders,
    SpecToken,
    Environment,
    None,
}

#[derive(Debug, Clone)]
pub struct ResolvedToken {
    pub token: String,
    pub source: TokenSource,
}

impl ResolvedToken {
    fn new(token: impl Into<String>, source: TokenSource) -> Self {
        Self {
            token: token.into(),
            source,
        }
    }

    fn none() -> Self {
        Self {
            token: String::new(),
            source: TokenSource::None,
        }
    }
}

/// Environment lookup seam.
pub trait EnvSource {
    fn var(&self, key: &str) -> Option<String>;
}

/// Reads the real process environment.
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.is_empty())
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned().filter(|v| !v.is_empty())
    }
}

/// Run the cascade. `request_headers` are the preserved incoming MCP
/// request headers with lowercased names.
pub fn resolve_token(
    auth: &AuthDescriptor,
    case_map: &HeaderCaseMap,
    args: Option<&Value>,
    request_headers: &HashMap<String, String>,
    spec_token: Option<&str>,
    env: &dyn EnvSource,
    debug_auth: bool,
) -> ResolvedToken {
    if auth.kind == AuthKind::None {
        return ResolvedToken::none();
    }

    if let Some(resolved) = from_tool_args(auth, args) {
        if debug_auth {
            debug!(kind = ?auth.kind, "Token resolved from tool arguments");
        }
        return resolved;
    }

    if let Some(resolved) = from_request_headers(auth, case_map, request_headers) {
        if debug_auth {
            debug!(kind = ?auth.kind, "Token resolved from request headers");
        }
        return resolved;
    }

    if let Some(token) = spec_token.filter(|t| !t.is_empty()) {
        if debug_auth {
            debug!(kind = ?auth.kind, "Token resolved from spec record");
        }
        return ResolvedToken::new(token, TokenSource::SpecToken);
    }

    if let Some(resolved) = from_environment(auth, env) {
        if debug_auth {
            debug!(kind = ?auth.kind, "Token resolved from environment");
        }
        return resolved;
    }

    if debug_auth {
        debug!(kind = ?auth.kind, "No token resolved; upstream call proceeds unauthenticated");
    }
    ResolvedToken::none()
}

fn from_tool_args(auth: &AuthDescriptor, args: Option<&Value>) -> Option<ResolvedToken> {
    let args = args?.as_object()?;

    match auth.kind {
        AuthKind::ApiKey => {
            if let Some(token) = arg_str(args.get(&auth.param_name)) {
                return Some(ResolvedToken::new(token, TokenSource::ToolArguments));
            }
            for key in ARG_KEY_FALLBACKS {
                if let Some(token) = arg_str(args.get(*key)) {
                    return Some(ResolvedToken::new(token, TokenSource::ToolArguments));
                }
            }
            None
        },
        AuthKind::Bearer => {
            if let Some(value) = arg_str(args.get("Authorization")) {
                if let Some(token) = value.strip_prefix(BEARER_PREFIX) {
                    if !token.is_empty() {
                        return Some(ResolvedToken::new(token, TokenSource::ToolArguments));
                    }
                }
            }
            for key in ["token", "bearer_token"] {
                if let Some(token) = arg_str(args.get(key)) {
                    return Some(ResolvedToken::new(token, TokenSource::ToolArguments));
                }
            }
            None
        },
        _ => None,
    }
}

fn from_request_headers(
    auth: &AuthDescriptor,
    case_map: &HeaderCaseMap,
    headers: &HashMap<String, String>,
) -> Option<ResolvedToken> {
    match auth.kind {
        AuthKind::Bearer => {
            let value = non_empty(headers.get("authorization"))?;
            let token = value.strip_prefix(BEARER_PREFIX).unwrap_or(value);
            Some(ResolvedToken::new(token, TokenSource::RequestHeaders))
        },
        AuthKind::Basic => {
            let value = non_empty(headers.get("authorization"))?;
            let token = value.strip_prefix(BASIC_PREFIX).unwrap_or(value);
            Some(ResolvedToken::new(token, TokenSource::RequestHeaders))
        },
        AuthKind::ApiKey => {
            // The declared parameter, rendered through the casing map, is
            // looked up by its lowercase form.
            let declared = auth.param_name.to_ascii_lowercase();
            let declared = case_map.original_or(&declared, &auth.param_name).to_ascii_lowercase();
            if !declared.is_empty() {
                if let Some(token) = non_empty(headers.get(&declared)) {
                    return Some(ResolvedToken::new(token, TokenSource::RequestHeaders));
                }
            }

            // Authorization counts only when it is not a bearer or basic
            // credential.
            if let Some(value) = non_empty(headers.get("authorization")) {
                if !value.starts_with(BEARER_PREFIX) && !value.starts_with(BASIC_PREFIX) {
                    return Some(ResolvedToken::new(value, TokenSource::RequestHeaders));
                }
            }
            for key in HEADER_KEY_FALLBACKS {
                if let Some(token) = non_empty(headers.get(*key)) {
                    return Some(ResolvedToken::new(token, TokenSource::RequestHeaders));
                }
            }
            None
        },
        AuthKind::None => None,
    }
}

fn from_environment(auth: &AuthDescriptor, env: &dyn EnvSource) -> Option<ResolvedToken> {
    let vars: &[&str] = match auth.kind {
        AuthKind::Bearer => &["BEARER_TOKEN", "API_KEY"],
        AuthKind::Basic => &["BASIC_AUTH"],
        AuthKind::ApiKey => &["API_KEY", "RAPIDAPI_KEY", "X_API_KEY"],
        AuthKind::None => return None,
    };

    for var in vars {
        if let Some(token) = env.var(var) {
            return Some(ResolvedToken::new(token, TokenSource::Environment));
        }
    }
    None
}

fn arg_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::AuthLocation;
    use serde_json::json;

    fn descriptor(kind: AuthKind, param_name: &str) -> AuthDescriptor {
        AuthDescriptor {
            kind,
            location: AuthLocation::Header,
            param_name: param_name.to_string(),
            host_headers: HashMap::new(),
            api_host: "api.example.com".to_string(),
        }
    }

    fn resolve(
        auth: &AuthDescriptor,
        args: Option<&Value>,
        headers: &HashMap<String, String>,
        spec_token: Option<&str>,
        env: &HashMap<String, String>,
    ) -> ResolvedToken {
        resolve_token(auth, &HeaderCaseMap::default(), args, headers, spec_token, env, false)
    }

    #[test]
    fn test_tool_args_beat_everything() {
        let auth = descriptor(AuthKind::Bearer, "Authorization");
        let args = json!({"Authorization": "Bearer T_TOOL"});
        let mut headers = HashMap::new();
        headers.insert("authorization".to_string(), "Bearer T_HEADER".to_string());

        let resolved = resolve(&auth, Some(&args), &headers, Some("T_DB"), &HashMap::new());
        assert_eq!(resolved.token, "T_TOOL");
        assert_eq!(resolved.source, TokenSource::ToolArguments);
    }

    #[test]
    fn test_api_key_arg_fallback_names() {
        let auth = descriptor(AuthKind::ApiKey, "X-RapidAPI-Key");
        let args = json!({"api_key": "K1"});
        let resolved = resolve(&auth, Some(&args), &HashMap::new(), None, &HashMap::new());
        assert_eq!(resolved.token, "K1");
    }

    #[test]
    fn test_headers_beat_spec_token() {
        let auth = descriptor(AuthKind::Bearer, "Authorization");
        let mut headers = HashMap::new();
        headers.insert("authorization".to_string(), "Bearer XYZ".to_string());

        let resolved = resolve(&auth, None, &headers, Some("T_DB"), &HashMap::new());
        assert_eq!(resolved.token, "XYZ");
        assert_eq!(resolved.source, TokenSource::RequestHeaders);
    }

    #[test]
    fn test_basic_prefix_stripped() {
        let auth = descriptor(AuthKind::Basic, "Authorization");
        let encoded = "dXNlcjpwYXNz";
        let mut headers = HashMap::new();
        headers.insert("authorization".to_string(), format!("Basic {}", encoded));

        let resolved = resolve(&auth, None, &headers, None, &HashMap::new());
        assert_eq!(resolved.token, encoded);
    }

    #[test]
    fn test_api_key_header_fallback_scan_skips_bearer_authorization() {
        let auth = descriptor(AuthKind::ApiKey, "");
        let mut headers = HashMap::new();
        headers.insert("authorization".to_string(), "Bearer not-an-api-key".to_string());
        headers.insert("x-rapidapi-key".to_string(), "K9".to_string());

        let resolved = resolve(&auth, None, &headers, None, &HashMap::new());
        assert_eq!(resolved.token, "K9");
    }

    #[test]
    fn test_spec_token_beats_environment() {
        let auth = descriptor(AuthKind::ApiKey, "X-Api-Key");
        let mut env = HashMap::new();
        env.insert("API_KEY".to_string(), "envK".to_string());

        let resolved = resolve(&auth, None, &HashMap::new(), Some("T_DB"), &env);
        assert_eq!(resolved.token, "T_DB");
        assert_eq!(resolved.source, TokenSource::SpecToken);
    }

    #[test]
    fn test_environment_fallback_order() {
        let auth = descriptor(AuthKind::ApiKey, "X-Api-Key");
        let mut env = HashMap::new();
        env.insert("RAPIDAPI_KEY".to_string(), "rk".to_string());
        env.insert("X_API_KEY".to_string(), "xk".to_string());

        let resolved = resolve(&auth, None, &HashMap::new(), None, &env);
        assert_eq!(resolved.token, "rk");
        assert_eq!(resolved.source, TokenSource::Environment);
    }

    #[test]
    fn test_nothing_resolves_to_empty() {
        let auth = descriptor(AuthKind::Bearer, "Authorization");
        let resolved = resolve(&auth, None, &HashMap::new(), None, &HashMap::new());
        assert!(resolved.token.is_empty());
        assert_eq!(resolved.source, TokenSource::None);
    }

    #[test]
    fn test_none_kind_short_circuits() {
        let auth = descriptor(AuthKind::None, "");
        let args = json!({"key": "ignored"});
        let resolved = resolve(&auth, Some(&args), &HashMap::new(), Some("T"), &HashMap::new());
        assert!(resolved.token.is_empty());
    }
}
