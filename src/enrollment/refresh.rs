//! Refresh credentials: long-lived secrets that mint access credentials.
//!
//! Only the SHA-256 digest of a refresh secret is stored. Renewal slides
//! the 90-day expiry window forward; the secret itself is never rotated,
//! the window is the rotation boundary.

use super::generate_secret;
use anyhow::Result;
use chrono::{Duration, Utc};
use prometheus::IntCounter;
use sha2::{Digest, Sha256};
use sqlx::postgres::{PgConnection, PgPool};
use thiserror::Error;
use uuid::Uuid;

/// Sliding lifetime of a refresh credential.
pub(crate) const REFRESH_TTL_DAYS: i64 = 90;

lazy_static::lazy_static! {
    static ref RENEWALS: IntCounter = register_int_counter!(opts!(
        "redflag_refresh_renewals_total",
        "Total number of successful access-credential renewals."
    )).unwrap();
    static ref RENEWAL_FAILURES: IntCounter = register_int_counter!(opts!(
        "redflag_refresh_renewal_failures_total",
        "Total number of rejected renewal attempts."
    )).unwrap();
}

/// Why a renewal was rejected; surfaced as an opaque 401.
#[derive(Debug, Error)]
pub(crate) enum RenewError {
    #[error("refresh credential unknown, expired, or revoked")]
    Rejected,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Hex-encoded SHA-256 digest of a secret.
pub(crate) fn digest(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

/// Issue a refresh credential for a host inside an open transaction.
///
/// Returns the plaintext secret; only its digest is persisted.
pub(crate) async fn issue(conn: &mut PgConnection, host_id: Uuid) -> Result<String, sqlx::Error> {
    let secret = generate_secret();
    sqlx::query(
        "INSERT INTO refresh_tokens (host_id, secret_hash, expires_at) VALUES ($1, $2, $3)",
    )
    .bind(host_id)
    .bind(digest(&secret))
    .bind(Utc::now() + Duration::days(REFRESH_TTL_DAYS))
    .execute(conn)
    .await?;
    Ok(secret)
}

/// Renew: validate the presented secret and slide the expiry window.
///
/// The row is locked so concurrent renewals of the same credential
/// serialize; both end up observing a fresh expiry.
pub(crate) async fn renew(pool: &PgPool, host_id: Uuid, secret: &str) -> Result<(), RenewError> {
    let mut tx = pool.begin().await?;

    let row: Option<(Uuid,)> = sqlx::query_as(
        "SELECT id FROM refresh_tokens \
         WHERE host_id = $1 AND secret_hash = $2 AND revoked = FALSE AND expires_at > now() \
         FOR UPDATE",
    )
    .bind(host_id)
    .bind(digest(secret))
    .fetch_optional(tx.as_mut())
    .await?;

    let (id,) = match row {
        Some(r) => r,
        None => {
            RENEWAL_FAILURES.inc();
            log::warn!("renewal rejected for host {}", host_id);
            return Err(RenewError::Rejected);
        }
    };

    sqlx::query(
        "UPDATE refresh_tokens SET expires_at = $2, last_used_at = now() WHERE id = $1",
    )
    .bind(id)
    .bind(Utc::now() + Duration::days(REFRESH_TTL_DAYS))
    .execute(tx.as_mut())
    .await?;

    tx.commit().await?;
    RENEWALS.inc();
    Ok(())
}

/// Revoke every refresh credential belonging to a host.
pub(crate) async fn revoke_all_for_host(conn: &mut PgConnection, host_id: Uuid) -> Result<u64> {
    let res = sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE host_id = $1")
        .bind(host_id)
        .execute(conn)
        .await?;
    Ok(res.rows_affected())
}

/// Drop revoked and expired rows. Returns the sweep count.
pub(crate) async fn gc(pool: &PgPool) -> Result<u64> {
    let res = sqlx::query("DELETE FROM refresh_tokens WHERE revoked = TRUE OR expires_at <= now()")
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_shape() {
        let d = digest("secret");
        assert_eq!(d.len(), 64);
        // Stable: SHA-256 of the ASCII string "secret".
        assert_eq!(
            d,
            "2bb80d537b1da3e38bd30361aa855686bde0eacd7162fef6a25fe97bf527a25b"
        );
    }

    #[test]
    fn test_digest_differs_per_secret() {
        assert_ne!(digest("a"), digest("b"));
    }
}
