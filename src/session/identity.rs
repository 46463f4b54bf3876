//! Session identity generation, validation, and termination.
//!
//! Two implementations behind one contract. Deployments that front the
//! gateway with their own session cookie run stateless; everyone else gets
//! the prefixed-UUID variant. The trait boundary lets a signed-token
//! variant drop in without touching callers.

use thiserror::Error;
use uuid::Uuid;

/// Prefix of every stateful session id.
pub const SESSION_ID_PREFIX: &str = "mcp-session-";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("session id must not be supplied to a stateless server")]
    UnexpectedId,

    #[error("invalid session id: {0}")]
    Invalid(String),

    #[error("session termination not allowed")]
    NotAllowed,
}

/// Contract for minting, validating, and terminating session ids.
pub trait SessionIdentity: Send + Sync {
    fn generate(&self) -> String;
    fn validate(&self, id: &str) -> Result<(), IdentityError>;
    fn terminate(&self, id: &str) -> Result<(), IdentityError>;
}

/// No session identity at all. Any client-supplied id is a validation
/// failure; termination is a no-op.
pub struct StatelessIdentity;

impl SessionIdentity for StatelessIdentity {
    fn generate(&self) -> String {
        String::new()
    }

    fn validate(&self, id: &str) -> Result<(), IdentityError> {
        if id.is_empty() {
            Ok(())
        } else {
            Err(IdentityError::UnexpectedId)
        }
    }

    fn terminate(&self, _id: &str) -> Result<(), IdentityError> {
        Ok(())
    }
}

/// Prefixed UUID v4 ids. Validation is purely structural; no server-side
/// state is consulted.
pub struct StatefulIdentity;

impl SessionIdentity for StatefulIdentity {
    fn generate(&self) -> String {
        format!("{}{}", SESSION_ID_PREFIX, Uuid::new_v4())
    }

    fn validate(&self, id: &str) -> Result<(), IdentityError> {
        let tail = id
            .strip_prefix(SESSION_ID_PREFIX)
            .ok_or_else(|| IdentityError::Invalid(id.to_string()))?;
        Uuid::parse_str(tail).map_err(|_| IdentityError::Invalid(id.to_string()))?;
        Ok(())
    }

    fn terminate(&self, _id: &str) -> Result<(), IdentityError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stateful_roundtrip() {
        let identity = StatefulIdentity;
        let id = identity.generate();
        assert!(id.starts_with(SESSION_ID_PREFIX));
        assert!(identity.validate(&id).is_ok());
    }

    #[test]
    fn test_stateful_rejects_mutation() {
        let identity = StatefulIdentity;
        let id = identity.generate();

        // Flip the last character to something that cannot appear there.
        let mut mutated = id[..id.len() - 1].to_string();
        mutated.push('!');
        assert!(identity.validate(&mutated).is_err());

        assert!(identity.validate("mcp-session-not-a-uuid").is_err());
        assert!(identity.validate("wrong-prefix-00000000-0000-0000-0000-000000000000").is_err());
        assert!(identity.validate("").is_err());
    }

    #[test]
    fn test_stateful_terminate_allowed() {
        let identity = StatefulIdentity;
        assert!(identity.terminate("mcp-session-whatever").is_ok());
    }

    #[test]
    fn test_stateless_generates_empty() {
        let identity = StatelessIdentity;
        assert_eq!(identity.generate(), "");
        assert!(identity.validate("").is_ok());
    }

    #[test]
    fn test_stateless_rejects_any_id() {
        let identity = StatelessIdentity;
        assert_eq!(
            identity.validate("mcp-session-123"),
            Err(IdentityError::UnexpectedId)
        );
    }
}
