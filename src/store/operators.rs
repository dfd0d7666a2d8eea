//! Operator accounts.

use crate::auth::password;
use crate::proto::OperatorRole;
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use uuid::Uuid;

/// An operator account.
#[derive(Clone, Debug)]
pub(crate) struct Operator {
    pub(crate) id: Uuid,
    pub(crate) username: String,
    pub(crate) email: String,
    pub(crate) password_hash: String,
    pub(crate) role: OperatorRole,
    pub(crate) last_login_at: Option<DateTime<Utc>>,
    pub(crate) created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct OperatorRow {
    id: Uuid,
    username: String,
    email: String,
    password_hash: String,
    role: String,
    last_login_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<OperatorRow> for Operator {
    type Error = anyhow::Error;

    fn try_from(row: OperatorRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            username: row.username,
            email: row.email,
            password_hash: row.password_hash,
            role: row.role.parse()?,
            last_login_at: row.last_login_at,
            created_at: row.created_at,
        })
    }
}

/// Look up an operator by username.
pub(crate) async fn find_by_username(pool: &PgPool, username: &str) -> Result<Option<Operator>> {
    let row: Option<OperatorRow> =
        sqlx::query_as("SELECT * FROM operators WHERE username = $1")
            .bind(username)
            .fetch_optional(pool)
            .await?;
    row.map(Operator::try_from).transpose()
}

/// Stamp a successful login.
pub(crate) async fn touch_login(pool: &PgPool, id: Uuid) -> Result<()> {
    sqlx::query("UPDATE operators SET last_login_at = now() WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Ensure an admin account exists with the given credentials.
///
/// Creates the row on first run; an existing row keeps its password (the
/// configured one is a bootstrap value, not a rotation mechanism).
pub(crate) async fn ensure_admin(pool: &PgPool, username: &str, plain: &str) -> Result<()> {
    if find_by_username(pool, username).await?.is_some() {
        return Ok(());
    }
    let hashed = password::hash(plain)?;
    sqlx::query(
        "INSERT INTO operators (username, password_hash, role) VALUES ($1, $2, 'admin') \
         ON CONFLICT (username) DO NOTHING",
    )
    .bind(username)
    .bind(&hashed)
    .execute(pool)
    .await?;
    log::info!("created bootstrap admin operator '{}'", username);
    Ok(())
}
