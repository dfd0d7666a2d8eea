//! Operator password hashing.

use anyhow::{Context, Result};

/// Hash a password for storage.
pub(crate) fn hash(plain: &str) -> Result<String> {
    bcrypt::hash(plain, bcrypt::DEFAULT_COST).context("failed to hash password")
}

/// Verify a password against a stored hash.
///
/// A malformed stored hash counts as a mismatch; the caller only ever sees
/// a boolean so login failures stay undifferentiated.
pub(crate) fn verify(plain: &str, hashed: &str) -> bool {
    bcrypt::verify(plain, hashed).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_verify_roundtrip() {
        let hashed = hash("correct horse battery staple").unwrap();
        assert!(verify("correct horse battery staple", &hashed));
        assert!(!verify("Tr0ub4dor&3", &hashed));
    }

    #[test]
    fn test_malformed_hash_is_mismatch() {
        assert!(!verify("anything", "not-a-bcrypt-hash"));
    }
}
