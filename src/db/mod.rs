//! Postgres pool assembly and migrations.

use anyhow::{Context, Result};
use fn_error_context::context;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// Maximum open connections in the pool.
const POOL_MAX_CONNECTIONS: u32 = 25;

/// Idle connections kept warm.
const POOL_MIN_CONNECTIONS: u32 = 5;

/// Per-acquire timeout.
const POOL_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Embedded, ordered migrations.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Connect to Postgres with the standard pool sizing.
#[context("failed to connect to database")]
pub(crate) async fn connect(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(POOL_MAX_CONNECTIONS)
        .min_connections(POOL_MIN_CONNECTIONS)
        .acquire_timeout(POOL_ACQUIRE_TIMEOUT)
        .connect(database_url)
        .await
        .context("pool connection failed")?;
    Ok(pool)
}

/// Apply pending migrations; a no-op when the schema is current.
#[context("failed to run database migrations")]
pub(crate) async fn migrate(pool: &PgPool) -> Result<()> {
    MIGRATOR.run(pool).await.context("migration run failed")?;
    Ok(())
}
