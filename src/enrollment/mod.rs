//! Enrollment tokens: seat-counted permission to create hosts.
//!
//! A token is a 64-char hex secret minted by an operator and distributed to
//! machines awaiting enrollment. Each successful registration consumes one
//! seat inside a row-locking transaction, so concurrent enrollments can
//! never oversubscribe a token. Every credential failure collapses to the
//! same opaque 401 at the API boundary; the distinct reasons live only in
//! internal logs and metrics.

pub(crate) mod refresh;

use crate::proto::TokenStatus;
use crate::store::hosts::{self, HostFingerprint};
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use prometheus::IntCounterVec;
use rand::RngCore;
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgConnection, PgPool};
use thiserror::Error;
use uuid::Uuid;

lazy_static::lazy_static! {
    static ref ENROLLMENT_FAILURES: IntCounterVec = register_int_counter_vec!(
        "redflag_enrollment_failures_total",
        "Total number of rejected enrollment attempts.",
        &["reason"]
    ).unwrap();
    static ref SEATS_CONSUMED: IntCounterVec = register_int_counter_vec!(
        "redflag_enrollment_seats_consumed_total",
        "Total number of enrollment seats consumed.",
        &["os_type"]
    ).unwrap();
}

/// Why an enrollment attempt was rejected.
///
/// All variants except `Database` surface as an undifferentiated 401.
#[derive(Debug, Error)]
pub(crate) enum ConsumeError {
    #[error("unknown enrollment token")]
    UnknownToken,
    #[error("enrollment token expired")]
    Expired,
    #[error("enrollment token revoked")]
    Revoked,
    #[error("enrollment token seats exhausted")]
    SeatsExhausted,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ConsumeError {
    /// Metric label for the rejection reason.
    fn reason(&self) -> &'static str {
        match self {
            ConsumeError::UnknownToken => "unknown",
            ConsumeError::Expired => "expired",
            ConsumeError::Revoked => "revoked",
            ConsumeError::SeatsExhausted => "seats_exhausted",
            ConsumeError::Database(_) => "database",
        }
    }
}

/// An enrollment token at rest.
#[derive(Clone, Debug)]
pub(crate) struct EnrollmentToken {
    pub(crate) id: Uuid,
    pub(crate) secret: String,
    pub(crate) label: Option<String>,
    pub(crate) status: TokenStatus,
    pub(crate) max_seats: i32,
    pub(crate) seats_used: i32,
    pub(crate) created_by: String,
    pub(crate) metadata: JsonValue,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) expires_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct TokenRow {
    id: Uuid,
    secret: String,
    label: Option<String>,
    status: String,
    max_seats: i32,
    seats_used: i32,
    created_by: String,
    metadata: JsonValue,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl TryFrom<TokenRow> for EnrollmentToken {
    type Error = anyhow::Error;

    fn try_from(row: TokenRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            secret: row.secret,
            label: row.label,
            status: row.status.parse()?,
            max_seats: row.max_seats,
            seats_used: row.seats_used,
            created_by: row.created_by,
            metadata: row.metadata,
            created_at: row.created_at,
            expires_at: row.expires_at,
        })
    }
}

/// Generate 32 bytes of OS randomness, hex-encoded.
pub(crate) fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Mint parameters, already clamped by the caller's policy.
#[derive(Clone, Debug)]
pub(crate) struct MintParams {
    pub(crate) label: Option<String>,
    pub(crate) ttl: Duration,
    pub(crate) max_seats: i32,
    pub(crate) created_by: String,
    pub(crate) metadata: JsonValue,
}

/// Policy violations for token administration.
#[derive(Debug, Error)]
pub(crate) enum MintError {
    #[error("active token cap ({0}) reached")]
    TokenCapReached(u32),
    #[error("max_seats {got} exceeds the configured cap of {cap}")]
    SeatCapExceeded { got: i32, cap: u32 },
    #[error("max_seats must be at least 1")]
    ZeroSeats,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Mint a new token, enforcing the active-token and seat caps.
pub(crate) async fn mint(
    pool: &PgPool,
    params: MintParams,
    token_cap: u32,
    seat_cap: u32,
) -> Result<EnrollmentToken, MintError> {
    if params.max_seats < 1 {
        return Err(MintError::ZeroSeats);
    }
    if params.max_seats > seat_cap as i32 {
        return Err(MintError::SeatCapExceeded {
            got: params.max_seats,
            cap: seat_cap,
        });
    }

    let active: i64 =
        sqlx::query_scalar("SELECT count(*) FROM enrollment_tokens WHERE status = 'active'")
            .fetch_one(pool)
            .await
            .map_err(anyhow::Error::from)?;
    if active >= i64::from(token_cap) {
        return Err(MintError::TokenCapReached(token_cap));
    }

    let secret = generate_secret();
    let row: TokenRow = sqlx::query_as(
        "INSERT INTO enrollment_tokens (secret, label, max_seats, created_by, metadata, expires_at) \
         VALUES ($1, $2, $3, $4, $5, $6) RETURNING *",
    )
    .bind(&secret)
    .bind(&params.label)
    .bind(params.max_seats)
    .bind(&params.created_by)
    .bind(&params.metadata)
    .bind(Utc::now() + params.ttl)
    .fetch_one(pool)
    .await
    .map_err(anyhow::Error::from)?;

    let token = EnrollmentToken::try_from(row)?;
    log::info!(
        "minted enrollment token {} ({} seats, expires {})",
        token.id,
        token.max_seats,
        token.expires_at
    );
    Ok(token)
}

/// Consume one seat inside an open transaction.
///
/// Locks the token row for the full validate+increment, records the
/// `(token, host)` usage, and flips the token to `used` exactly when the
/// increment fills the last seat.
pub(crate) async fn try_consume(
    conn: &mut PgConnection,
    secret: &str,
    host_id: Uuid,
) -> Result<Uuid, ConsumeError> {
    let row: Option<TokenRow> =
        sqlx::query_as("SELECT * FROM enrollment_tokens WHERE secret = $1 FOR UPDATE")
            .bind(secret)
            .fetch_optional(&mut *conn)
            .await?;

    let row = match row {
        Some(r) => r,
        None => return Err(fail(ConsumeError::UnknownToken)),
    };

    match row.status.as_str() {
        "revoked" => return Err(fail(ConsumeError::Revoked)),
        "expired" => return Err(fail(ConsumeError::Expired)),
        "used" => return Err(fail(ConsumeError::SeatsExhausted)),
        _ => {}
    }
    if row.expires_at <= Utc::now() {
        return Err(fail(ConsumeError::Expired));
    }
    if row.seats_used >= row.max_seats {
        return Err(fail(ConsumeError::SeatsExhausted));
    }

    let now_full = row.seats_used + 1 >= row.max_seats;
    sqlx::query(
        "UPDATE enrollment_tokens \
         SET seats_used = seats_used + 1, \
             status = CASE WHEN $2 THEN 'used' ELSE status END \
         WHERE id = $1",
    )
    .bind(row.id)
    .bind(now_full)
    .execute(&mut *conn)
    .await?;

    sqlx::query("INSERT INTO enrollment_token_usages (token_id, host_id) VALUES ($1, $2)")
        .bind(row.id)
        .bind(host_id)
        .execute(&mut *conn)
        .await?;

    Ok(row.id)
}

fn fail(err: ConsumeError) -> ConsumeError {
    ENROLLMENT_FAILURES
        .with_label_values(&[err.reason()])
        .inc();
    log::warn!("enrollment rejected: {}", err);
    err
}

/// Outcome of a successful registration.
#[derive(Debug)]
pub(crate) struct Enrollment {
    pub(crate) host_id: Uuid,
    /// Refresh secret; returned to the agent exactly once.
    pub(crate) refresh_secret: String,
}

/// Register a host: consume a seat, create the host row, issue a refresh
/// credential. One transaction end to end.
pub(crate) async fn register_host(
    pool: &PgPool,
    secret: &str,
    fingerprint: HostFingerprint,
) -> Result<Enrollment, ConsumeError> {
    let os_label = fingerprint.os_type.as_str();
    let mut tx = pool.begin().await?;

    let host_id = hosts::insert(tx.as_mut(), &fingerprint).await?;
    try_consume(tx.as_mut(), secret, host_id).await?;
    let refresh_secret = refresh::issue(tx.as_mut(), host_id).await?;

    tx.commit().await?;

    SEATS_CONSUMED.with_label_values(&[os_label]).inc();
    log::info!(
        "registered host {} ('{}', {})",
        host_id,
        fingerprint.hostname,
        os_label
    );
    Ok(Enrollment {
        host_id,
        refresh_secret,
    })
}

/// Revoke a token by id. Terminal; seats stay as they were.
pub(crate) async fn revoke(pool: &PgPool, id: Uuid) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE enrollment_tokens SET status = 'revoked' WHERE id = $1 AND status <> 'revoked'",
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() > 0)
}

/// Delete a token row outright.
pub(crate) async fn delete(pool: &PgPool, id: Uuid) -> Result<bool> {
    let res = sqlx::query("DELETE FROM enrollment_tokens WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

/// List all tokens, newest first.
pub(crate) async fn list(pool: &PgPool) -> Result<Vec<EnrollmentToken>> {
    let rows: Vec<TokenRow> =
        sqlx::query_as("SELECT * FROM enrollment_tokens ORDER BY created_at DESC")
            .fetch_all(pool)
            .await?;
    rows.into_iter().map(EnrollmentToken::try_from).collect()
}

/// Flip active-but-expired tokens to `expired`. Returns the sweep count.
pub(crate) async fn expire_sweep(pool: &PgPool) -> Result<u64> {
    let res = sqlx::query(
        "UPDATE enrollment_tokens SET status = 'expired' \
         WHERE status = 'active' AND expires_at <= now()",
    )
    .execute(pool)
    .await?;
    Ok(res.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_secret_shape() {
        let secret = generate_secret();
        assert_eq!(secret.len(), 64);
        assert!(secret.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(secret, generate_secret());
    }

    #[test]
    fn test_consume_error_reasons() {
        assert_eq!(ConsumeError::UnknownToken.reason(), "unknown");
        assert_eq!(ConsumeError::SeatsExhausted.reason(), "seats_exhausted");
    }
}
