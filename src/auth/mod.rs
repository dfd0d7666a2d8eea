//! Access credentials: short-lived signed claims.
//!
//! Access credentials are HS256 JWTs carrying the bearer identity (host or
//! operator), its role, and a 24-hour expiry. They are never stored
//! server-side; possession of a verifying signature is the whole proof.
//! Hosts recover from expiry through their refresh credential, operators by
//! logging in again.

pub(crate) mod password;

use crate::proto::OperatorRole;
use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Access-credential lifetime.
pub(crate) const ACCESS_TOKEN_TTL: Duration = Duration::hours(24);

/// Role label carried by host-issued credentials.
static AGENT_ROLE: &str = "agent";

/// Validation failure; details stay in internal logs.
#[derive(Debug, Error)]
pub(crate) enum CredentialError {
    #[error("credential expired")]
    Expired,
    #[error("credential invalid: {0}")]
    Invalid(String),
}

/// Signed-claim contents.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub(crate) struct Claims {
    /// Bearer identifier (host or operator id).
    pub(crate) sub: Uuid,
    /// Bearer role: `agent` or an operator role.
    pub(crate) role: String,
    /// Expiry, seconds since the epoch.
    pub(crate) exp: i64,
    /// Issuance, seconds since the epoch.
    pub(crate) iat: i64,
}

impl Claims {
    /// Whether this credential belongs to a host agent.
    pub(crate) fn is_agent(&self) -> bool {
        self.role == AGENT_ROLE
    }

    /// Operator role, if this is an operator credential.
    pub(crate) fn operator_role(&self) -> Option<OperatorRole> {
        self.role.parse().ok()
    }
}

/// Credential signer/validator around the process-wide secret.
#[derive(Clone)]
pub(crate) struct TokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner").finish_non_exhaustive()
    }
}

impl TokenSigner {
    /// Build a signer from the configured secret.
    pub(crate) fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Sign a fresh access credential for a host agent.
    pub(crate) fn sign_agent(&self, host_id: Uuid) -> Result<String> {
        self.sign(host_id, AGENT_ROLE)
    }

    /// Sign a fresh access credential for an operator.
    pub(crate) fn sign_operator(&self, operator_id: Uuid, role: OperatorRole) -> Result<String> {
        self.sign(operator_id, role.as_str())
    }

    fn sign(&self, sub: Uuid, role: &str) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub,
            role: role.to_string(),
            exp: (now + ACCESS_TOKEN_TTL).timestamp(),
            iat: now.timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding)
            .context("failed to sign access credential")
    }

    /// Validate a bearer credential and return its claims.
    pub(crate) fn verify(&self, token: &str) -> Result<Claims, CredentialError> {
        let validation = Validation::default();
        match decode::<Claims>(token, &self.decoding, &validation) {
            Ok(data) => Ok(data.claims),
            Err(e) => match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => Err(CredentialError::Expired),
                _ => Err(CredentialError::Invalid(e.to_string())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> TokenSigner {
        TokenSigner::new("0123456789abcdef0123456789abcdef")
    }

    #[test]
    fn test_agent_roundtrip() {
        let host = Uuid::new_v4();
        let token = signer().sign_agent(host).unwrap();
        let claims = signer().verify(&token).unwrap();
        assert_eq!(claims.sub, host);
        assert!(claims.is_agent());
        assert!(claims.operator_role().is_none());
    }

    #[test]
    fn test_operator_roundtrip() {
        let op = Uuid::new_v4();
        let token = signer().sign_operator(op, OperatorRole::Admin).unwrap();
        let claims = signer().verify(&token).unwrap();
        assert_eq!(claims.operator_role(), Some(OperatorRole::Admin));
        assert!(!claims.is_agent());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = signer().sign_agent(Uuid::new_v4()).unwrap();
        let other = TokenSigner::new("ffffffffffffffffffffffffffffffff");
        assert!(matches!(
            other.verify(&token),
            Err(CredentialError::Invalid(_))
        ));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(signer().verify("not-a-token").is_err());
    }
}
