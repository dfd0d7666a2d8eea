//! Per-host command queue.
//!
//! Strict FIFO per host by creation time. The claim statement is the
//! at-most-once delivery primitive; lifecycle transitions are guarded by
//! status predicates so a late or duplicate report is a no-op. Retries
//! never mutate the failed row: they spawn a child carrying
//! `retry_parent_id`, and the active view hides failures whose retry chain
//! eventually completed.

use crate::proto::{ArchiveScope, CommandSource, CommandStatus, CommandType};
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use prometheus::IntCounterVec;
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgConnection, PgPool};
use thiserror::Error;
use uuid::Uuid;

/// Commands handed out per claim call; a backlog drains over polls.
pub(crate) const CLAIM_LIMIT: i64 = 10;

lazy_static::lazy_static! {
    static ref COMMANDS_ENQUEUED: IntCounterVec = register_int_counter_vec!(
        "redflag_commands_enqueued_total",
        "Total number of commands enqueued.",
        &["type", "source"]
    ).unwrap();
    static ref COMMANDS_CLAIMED: IntCounterVec = register_int_counter_vec!(
        "redflag_commands_claimed_total",
        "Total number of commands delivered to agents.",
        &["type"]
    ).unwrap();
}

/// One work item addressed to a single host.
#[derive(Clone, Debug)]
pub(crate) struct Command {
    pub(crate) id: Uuid,
    pub(crate) host_id: Uuid,
    pub(crate) command_type: CommandType,
    pub(crate) params: JsonValue,
    pub(crate) status: CommandStatus,
    pub(crate) source: CommandSource,
    pub(crate) result: Option<JsonValue>,
    pub(crate) retry_parent_id: Option<Uuid>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) sent_at: Option<DateTime<Utc>>,
    pub(crate) completed_at: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow)]
struct CommandRow {
    id: Uuid,
    host_id: Uuid,
    command_type: String,
    params: JsonValue,
    status: String,
    source: String,
    result: Option<JsonValue>,
    retry_parent_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    sent_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<CommandRow> for Command {
    type Error = anyhow::Error;

    fn try_from(row: CommandRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            host_id: row.host_id,
            command_type: row.command_type.parse()?,
            params: row.params,
            status: row.status.parse()?,
            source: row.source.parse()?,
            result: row.result,
            retry_parent_id: row.retry_parent_id,
            created_at: row.created_at,
            sent_at: row.sent_at,
            completed_at: row.completed_at,
        })
    }
}

/// A refused queue operation.
#[derive(Debug, Error)]
pub(crate) enum QueueError {
    #[error("command not found")]
    NotFound,
    #[error("operation refused, command is '{current}'")]
    Conflict { current: CommandStatus },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<sqlx::Error> for QueueError {
    fn from(e: sqlx::Error) -> Self {
        QueueError::Other(e.into())
    }
}

/// Enqueue a command. No dedup: duplicate scans are legal.
pub(crate) async fn push(
    conn: &mut PgConnection,
    host_id: Uuid,
    command_type: CommandType,
    params: JsonValue,
    source: CommandSource,
    retry_parent_id: Option<Uuid>,
) -> Result<Command> {
    let row: CommandRow = sqlx::query_as(
        "INSERT INTO commands (host_id, command_type, params, source, retry_parent_id) \
         VALUES ($1, $2, $3, $4, $5) RETURNING *",
    )
    .bind(host_id)
    .bind(command_type.as_str())
    .bind(&params)
    .bind(source.as_str())
    .bind(retry_parent_id)
    .fetch_one(conn)
    .await?;

    COMMANDS_ENQUEUED
        .with_label_values(&[command_type.as_str(), source.as_str()])
        .inc();
    Command::try_from(row)
}

/// Convenience wrapper for single-statement pushes.
pub(crate) async fn push_one(
    pool: &PgPool,
    host_id: Uuid,
    command_type: CommandType,
    params: JsonValue,
    source: CommandSource,
) -> Result<Command> {
    let mut conn = pool.acquire().await?;
    push(&mut conn, host_id, command_type, params, source, None).await
}

/// Claim the oldest pending commands for a host and flip them to `sent`.
///
/// One statement, row-locked with SKIP LOCKED, so each pending command is
/// returned to at most one caller even under concurrent check-ins.
pub(crate) async fn claim(pool: &PgPool, host_id: Uuid, limit: i64) -> Result<Vec<Command>> {
    let rows: Vec<CommandRow> = sqlx::query_as(
        "UPDATE commands SET status = 'sent', sent_at = now() \
         WHERE id IN ( \
             SELECT id FROM commands \
             WHERE host_id = $1 AND status = 'pending' \
             ORDER BY created_at \
             LIMIT $2 \
             FOR UPDATE SKIP LOCKED) \
         RETURNING *",
    )
    .bind(host_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    let commands = rows
        .into_iter()
        .map(Command::try_from)
        .collect::<Result<Vec<_>>>()?;
    for cmd in &commands {
        COMMANDS_CLAIMED
            .with_label_values(&[cmd.command_type.as_str()])
            .inc();
    }
    // RETURNING does not guarantee ordering.
    let mut commands = commands;
    commands.sort_by_key(|c| c.created_at);
    Ok(commands)
}

/// Acknowledge execution start: `sent` → `running`.
///
/// Past this point cancellation is best-effort only.
pub(crate) async fn start(pool: &PgPool, id: Uuid, host_id: Uuid) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE commands SET status = 'running' \
         WHERE id = $1 AND host_id = $2 AND status = 'sent'",
    )
    .bind(id)
    .bind(host_id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() > 0)
}

/// Settle a command for its owning host.
///
/// Only delivered work can settle: the row must still be `sent` or
/// `running`, and must belong to the reporting host. A second settlement
/// of a terminal row (or a report against someone else's command) is a
/// no-op.
pub(crate) async fn settle(
    pool: &PgPool,
    id: Uuid,
    host_id: Uuid,
    success: bool,
    result: JsonValue,
) -> Result<bool> {
    let status = if success { "completed" } else { "failed" };
    let res = sqlx::query(
        "UPDATE commands SET status = $3, result = $4, completed_at = now() \
         WHERE id = $1 AND host_id = $2 AND status IN ('sent', 'running')",
    )
    .bind(id)
    .bind(host_id)
    .bind(status)
    .bind(&result)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() > 0)
}

/// Cancel a command that has not started executing.
pub(crate) async fn cancel(pool: &PgPool, id: Uuid) -> Result<Command, QueueError> {
    let row: Option<CommandRow> = sqlx::query_as(
        "UPDATE commands SET status = 'cancelled', completed_at = now() \
         WHERE id = $1 AND status IN ('pending', 'sent') RETURNING *",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(r) => Ok(Command::try_from(r)?),
        None => Err(refusal(pool, id).await?),
    }
}

/// Retry a settled failure: a new pending row pointing at the original.
pub(crate) async fn retry(pool: &PgPool, id: Uuid) -> Result<Command, QueueError> {
    let mut tx = pool.begin().await?;

    let row: Option<CommandRow> =
        sqlx::query_as("SELECT * FROM commands WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(tx.as_mut())
            .await?;
    let original = match row {
        Some(r) => Command::try_from(r)?,
        None => return Err(QueueError::NotFound),
    };
    if !original.status.can_retry() {
        return Err(QueueError::Conflict {
            current: original.status,
        });
    }

    let child = push(
        tx.as_mut(),
        original.host_id,
        original.command_type,
        original.params.clone(),
        original.source,
        Some(original.id),
    )
    .await?;
    tx.commit().await?;
    Ok(child)
}

async fn refusal(pool: &PgPool, id: Uuid) -> Result<QueueError, QueueError> {
    let current: Option<(String,)> = sqlx::query_as("SELECT status FROM commands WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    match current {
        Some((status,)) => Ok(QueueError::Conflict {
            current: status.parse().map_err(anyhow::Error::from)?,
        }),
        None => Ok(QueueError::NotFound),
    }
}

/// Fetch one command.
pub(crate) async fn get(pool: &PgPool, id: Uuid) -> Result<Option<Command>> {
    let row: Option<CommandRow> = sqlx::query_as("SELECT * FROM commands WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.map(Command::try_from).transpose()
}

/// Commands that still need attention.
///
/// Excludes terminal-for-visibility rows and any settled failure whose
/// retry chain reached a completed descendant.
pub(crate) async fn active(pool: &PgPool, host_id: Option<Uuid>) -> Result<Vec<Command>> {
    let rows: Vec<CommandRow> = sqlx::query_as(
        "WITH RECURSIVE descendants AS ( \
             SELECT id AS root, id, status FROM commands \
             UNION ALL \
             SELECT d.root, c.id, c.status \
             FROM commands c JOIN descendants d ON c.retry_parent_id = d.id \
         ) \
         SELECT * FROM commands cmd \
         WHERE ($1::uuid IS NULL OR cmd.host_id = $1) \
           AND cmd.status NOT IN ('completed', 'cancelled', 'archived_failed') \
           AND NOT (cmd.status IN ('failed', 'timed_out') AND EXISTS ( \
               SELECT 1 FROM descendants d \
               WHERE d.root = cmd.id AND d.id <> cmd.id AND d.status = 'completed')) \
         ORDER BY cmd.created_at DESC",
    )
    .bind(host_id)
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(Command::try_from).collect()
}

/// Most recent commands regardless of status.
pub(crate) async fn recent(pool: &PgPool, host_id: Option<Uuid>, limit: i64) -> Result<Vec<Command>> {
    let rows: Vec<CommandRow> = sqlx::query_as(
        "SELECT * FROM commands \
         WHERE ($1::uuid IS NULL OR host_id = $1) \
         ORDER BY created_at DESC LIMIT $2",
    )
    .bind(host_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(Command::try_from).collect()
}

/// Walk the retry lineage from a command back to its root.
///
/// Children are strictly created after parents, so the chain is acyclic
/// and the walk terminates at a row with no parent.
pub(crate) async fn lineage(pool: &PgPool, id: Uuid) -> Result<Vec<Command>> {
    let rows: Vec<CommandRow> = sqlx::query_as(
        "WITH RECURSIVE chain AS ( \
             SELECT *, 0 AS depth FROM commands WHERE id = $1 \
             UNION ALL \
             SELECT c.*, chain.depth + 1 \
             FROM commands c JOIN chain ON chain.retry_parent_id = c.id \
         ) \
         SELECT id, host_id, command_type, params, status, source, result, \
                retry_parent_id, created_at, sent_at, completed_at \
         FROM chain ORDER BY depth",
    )
    .bind(id)
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(Command::try_from).collect()
}

/// Archive settled failures past an age bound. Returns the count.
pub(crate) async fn archive_failed(
    pool: &PgPool,
    older_than: Duration,
    scope: ArchiveScope,
) -> Result<u64> {
    let cutoff = Utc::now() - older_than;
    let only_retried = matches!(scope, ArchiveScope::OnlyRetried);
    let res = sqlx::query(
        "UPDATE commands SET status = 'archived_failed' \
         WHERE status IN ('failed', 'timed_out') \
           AND created_at < $1 \
           AND ($2 = FALSE OR EXISTS ( \
               SELECT 1 FROM commands child WHERE child.retry_parent_id = commands.id))",
    )
    .bind(cutoff)
    .bind(only_retried)
    .execute(pool)
    .await?;
    Ok(res.rows_affected())
}

/// Expire commands stuck past their execution window.
pub(crate) async fn timeout_sweep(pool: &PgPool) -> Result<u64> {
    let mut total = 0;
    for ct in CommandType::ALL {
        let cutoff = Utc::now() - ct.timeout();
        let res = sqlx::query(
            "UPDATE commands SET status = 'timed_out', completed_at = now() \
             WHERE command_type = $1 AND status IN ('sent', 'running') AND sent_at < $2",
        )
        .bind(ct.as_str())
        .bind(cutoff)
        .execute(pool)
        .await?;
        total += res.rows_affected();
    }
    Ok(total)
}

/// Execution-log entry parameters.
#[derive(Clone, Debug)]
pub(crate) struct LogEntry<'a> {
    pub(crate) command_id: Uuid,
    pub(crate) host_id: Uuid,
    pub(crate) action: &'a str,
    pub(crate) result: &'a str,
    pub(crate) stdout: &'a str,
    pub(crate) stderr: &'a str,
    pub(crate) exit_code: Option<i32>,
    pub(crate) duration_ms: Option<i64>,
}

/// Persist an execution log row.
pub(crate) async fn add_log(pool: &PgPool, entry: &LogEntry<'_>) -> Result<()> {
    sqlx::query(
        "INSERT INTO command_logs (command_id, host_id, action, result, stdout, stderr, \
             exit_code, duration_ms) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .bind(entry.command_id)
    .bind(entry.host_id)
    .bind(entry.action)
    .bind(entry.result)
    .bind(entry.stdout)
    .bind(entry.stderr)
    .bind(entry.exit_code)
    .bind(entry.duration_ms)
    .execute(pool)
    .await?;
    Ok(())
}
