//! Request-scoped authentication.
//!
//! Credentials never live in process-wide state: each tool call builds an
//! [`AuthContext`] from the resolver's cascade and hands it to the injector,
//! which clones the outbound request before touching it.

use crate::spec::{AuthKind, AuthLocation};
use std::collections::HashMap;

pub mod injector;
pub mod resolver;

pub use injector::inject;
pub use resolver::{resolve_token, EnvSource, ProcessEnv, ResolvedToken, TokenSource};

/// Resolved credentials for one upstream call. Lifetime ends with the
/// request; nothing here is ever written back to shared state.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Tenant key of the spec being served.
    pub endpoint: String,
    pub token: String,
    pub kind: AuthKind,
    pub location: AuthLocation,
    pub param_name: String,
    pub api_host: String,
    pub host_headers: HashMap<String, String>,
}

impl AuthContext {
    pub fn has_token(&self) -> bool {
        !self.token.is_empty()
    }
}
