//! Event-sourced update inventory.
//!
//! Discovery and outcome events are append-only; `package_states` is the
//! derived projection and the only thing operators act on. The projection
//! is a deterministic function of the event log plus operator status
//! transitions; operator actions never retro-edit events.

use crate::proto::{
    BatchReceipt, DiscoveryItem, EventKind, PackageStatus, PackageType, Severity,
};
use crate::store::hosts;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use prometheus::IntCounter;
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgConnection, PgPool};
use thiserror::Error;
use uuid::Uuid;

/// Events written per SQL round-trip during bulk ingest.
const INGEST_CHUNK: usize = 100;

lazy_static::lazy_static! {
    static ref EVENTS_INGESTED: IntCounter = register_int_counter!(opts!(
        "redflag_events_ingested_total",
        "Total number of update events appended."
    )).unwrap();
    static ref EVENTS_PRUNED: IntCounter = register_int_counter!(opts!(
        "redflag_events_pruned_total",
        "Total number of update events removed by retention pruning."
    )).unwrap();
}

/// Current projection of the event log for one package on one host.
#[derive(Clone, Debug)]
pub(crate) struct PackageState {
    pub(crate) id: Uuid,
    pub(crate) host_id: Uuid,
    pub(crate) package_type: PackageType,
    pub(crate) package_name: String,
    pub(crate) current_version: String,
    pub(crate) available_version: String,
    pub(crate) severity: Severity,
    pub(crate) source: String,
    pub(crate) status: PackageStatus,
    pub(crate) metadata: JsonValue,
    pub(crate) last_discovered_at: DateTime<Utc>,
    pub(crate) last_updated_at: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow)]
struct StateRow {
    id: Uuid,
    host_id: Uuid,
    package_type: String,
    package_name: String,
    current_version: String,
    available_version: String,
    severity: String,
    source: String,
    status: String,
    metadata: JsonValue,
    last_discovered_at: DateTime<Utc>,
    last_updated_at: Option<DateTime<Utc>>,
}

impl TryFrom<StateRow> for PackageState {
    type Error = anyhow::Error;

    fn try_from(row: StateRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            host_id: row.host_id,
            package_type: row.package_type.parse()?,
            package_name: row.package_name,
            current_version: row.current_version,
            available_version: row.available_version,
            severity: row.severity.parse()?,
            source: row.source,
            status: row.status.parse()?,
            metadata: row.metadata,
            last_discovered_at: row.last_discovered_at,
            last_updated_at: row.last_updated_at,
        })
    }
}

/// One row of the install history.
#[derive(Clone, Debug, sqlx::FromRow)]
pub(crate) struct HistoryRow {
    pub(crate) id: i64,
    pub(crate) host_id: Uuid,
    pub(crate) package_state_id: Option<Uuid>,
    pub(crate) package_type: String,
    pub(crate) package_name: String,
    pub(crate) from_version: String,
    pub(crate) to_version: String,
    pub(crate) status: String,
    pub(crate) applied_at: DateTime<Utc>,
}

/// A refused state transition.
#[derive(Debug, Error)]
pub(crate) enum TransitionError {
    #[error("package state not found")]
    NotFound,
    #[error("transition refused, package is '{current}'")]
    Conflict { current: PackageStatus },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<sqlx::Error> for TransitionError {
    fn from(e: sqlx::Error) -> Self {
        TransitionError::Other(e.into())
    }
}

/// Ingest a discovery batch for a host.
///
/// The scan-batch row is created up front so a failed ingest stays
/// visible; events and projection upserts run in one transaction that
/// rolls back whole on any chunk failure.
pub(crate) async fn ingest(
    pool: &PgPool,
    host_id: Uuid,
    command_id: Option<Uuid>,
    items: &[DiscoveryItem],
) -> Result<BatchReceipt> {
    let (batch_id,): (Uuid,) = sqlx::query_as(
        "INSERT INTO scan_batches (host_id, command_id, size, status) \
         VALUES ($1, $2, $3, 'processing') RETURNING id",
    )
    .bind(host_id)
    .bind(command_id)
    .bind(items.len() as i32)
    .fetch_one(pool)
    .await?;

    match ingest_tx(pool, host_id, items).await {
        Ok(()) => {
            sqlx::query(
                "UPDATE scan_batches SET processed = $2, failed = 0, status = 'completed', \
                 completed_at = now() WHERE id = $1",
            )
            .bind(batch_id)
            .bind(items.len() as i32)
            .execute(pool)
            .await?;
            EVENTS_INGESTED.inc_by(items.len() as u64);
            Ok(BatchReceipt {
                batch_id,
                received: items.len() as u32,
                processed: items.len() as u32,
                failed: 0,
                status: "completed".to_string(),
            })
        }
        Err(e) => {
            sqlx::query(
                "UPDATE scan_batches SET processed = 0, failed = $2, status = 'failed', \
                 completed_at = now() WHERE id = $1",
            )
            .bind(batch_id)
            .bind(items.len() as i32)
            .execute(pool)
            .await?;
            Err(e)
        }
    }
}

async fn ingest_tx(pool: &PgPool, host_id: Uuid, items: &[DiscoveryItem]) -> Result<()> {
    let mut tx = pool.begin().await?;

    for chunk in items.chunks(INGEST_CHUNK) {
        let mut qb = sqlx::QueryBuilder::new(
            "INSERT INTO update_events (host_id, package_type, package_name, from_version, \
             to_version, severity, source, metadata, kind) ",
        );
        qb.push_values(chunk, |mut b, item| {
            let metadata =
                serde_json::to_value(&item.metadata).unwrap_or(JsonValue::Object(Default::default()));
            b.push_bind(host_id)
                .push_bind(item.package_type.as_str())
                .push_bind(&item.package_name)
                .push_bind(&item.current_version)
                .push_bind(&item.available_version)
                .push_bind(item.severity.as_str())
                .push_bind(&item.source)
                .push_bind(metadata)
                .push_bind(EventKind::Discovered.as_str());
        });
        qb.build().execute(tx.as_mut()).await?;

        for item in chunk {
            project(tx.as_mut(), host_id, item).await?;
        }
    }

    hosts::refresh_update_available(tx.as_mut(), host_id).await?;
    tx.commit().await?;
    Ok(())
}

/// Apply one discovery event to the projection.
///
/// Sticky statuses (`updated`, `ignored`) survive re-discovery; everything
/// else resets to `pending`. The absolute `available_version` overwrites,
/// so interleaved batches commute.
async fn project(
    conn: &mut PgConnection,
    host_id: Uuid,
    item: &DiscoveryItem,
) -> Result<(), sqlx::Error> {
    let metadata =
        serde_json::to_value(&item.metadata).unwrap_or(JsonValue::Object(Default::default()));
    sqlx::query(
        "INSERT INTO package_states (host_id, package_type, package_name, current_version, \
             available_version, severity, source, metadata, status) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending') \
         ON CONFLICT (host_id, package_type, package_name) DO UPDATE SET \
             current_version = CASE WHEN EXCLUDED.current_version <> '' \
                 THEN EXCLUDED.current_version ELSE package_states.current_version END, \
             available_version = EXCLUDED.available_version, \
             severity = EXCLUDED.severity, \
             source = EXCLUDED.source, \
             metadata = EXCLUDED.metadata, \
             last_discovered_at = now(), \
             status = CASE WHEN package_states.status IN ('updated', 'ignored') \
                 THEN package_states.status ELSE 'pending' END",
    )
    .bind(host_id)
    .bind(item.package_type.as_str())
    .bind(&item.package_name)
    .bind(&item.current_version)
    .bind(&item.available_version)
    .bind(item.severity.as_str())
    .bind(&item.source)
    .bind(metadata)
    .execute(conn)
    .await?;
    Ok(())
}

/// Append a single outcome event inside an open transaction.
pub(crate) async fn append_outcome(
    conn: &mut PgConnection,
    host_id: Uuid,
    state: &PackageState,
    kind: EventKind,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO update_events (host_id, package_type, package_name, from_version, \
             to_version, severity, source, kind) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .bind(host_id)
    .bind(state.package_type.as_str())
    .bind(&state.package_name)
    .bind(&state.current_version)
    .bind(&state.available_version)
    .bind(state.severity.as_str())
    .bind(&state.source)
    .bind(kind.as_str())
    .execute(conn)
    .await?;
    Ok(())
}

/// Fetch one package state.
pub(crate) async fn get_state(pool: &PgPool, id: Uuid) -> Result<Option<PackageState>> {
    let row: Option<StateRow> = sqlx::query_as("SELECT * FROM package_states WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.map(PackageState::try_from).transpose()
}

/// Filters for the inventory listing.
#[derive(Clone, Debug, Default)]
pub(crate) struct StateFilter {
    pub(crate) host_id: Option<Uuid>,
    pub(crate) package_type: Option<PackageType>,
    pub(crate) severity: Option<Severity>,
    pub(crate) status: Option<PackageStatus>,
}

/// List package states, filtered and paginated. Returns `(rows, total)`.
pub(crate) async fn list_states(
    pool: &PgPool,
    filter: &StateFilter,
    limit: i64,
    offset: i64,
) -> Result<(Vec<PackageState>, i64)> {
    static WHERE_CLAUSE: &str = "WHERE ($1::uuid IS NULL OR host_id = $1) \
         AND ($2::text IS NULL OR package_type = $2) \
         AND ($3::text IS NULL OR severity = $3) \
         AND ($4::text IS NULL OR status = $4)";

    let total: i64 = sqlx::query_scalar(&format!(
        "SELECT count(*) FROM package_states {}",
        WHERE_CLAUSE
    ))
    .bind(filter.host_id)
    .bind(filter.package_type.map(|t| t.as_str()))
    .bind(filter.severity.map(|s| s.as_str()))
    .bind(filter.status.map(|s| s.as_str()))
    .fetch_one(pool)
    .await?;

    let rows: Vec<StateRow> = sqlx::query_as(&format!(
        "SELECT * FROM package_states {} \
         ORDER BY CASE severity WHEN 'critical' THEN 0 WHEN 'important' THEN 1 \
             WHEN 'moderate' THEN 2 ELSE 3 END, last_discovered_at DESC \
         LIMIT $5 OFFSET $6",
        WHERE_CLAUSE
    ))
    .bind(filter.host_id)
    .bind(filter.package_type.map(|t| t.as_str()))
    .bind(filter.severity.map(|s| s.as_str()))
    .bind(filter.status.map(|s| s.as_str()))
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    let states = rows
        .into_iter()
        .map(PackageState::try_from)
        .collect::<Result<Vec<_>>>()?;
    Ok((states, total))
}

/// Guarded status transition; refuses when the row is not in an expected
/// status. Linearised by the single-writer database.
pub(crate) async fn transition(
    pool: &PgPool,
    id: Uuid,
    expected: &[PackageStatus],
    to: PackageStatus,
) -> Result<PackageState, TransitionError> {
    let expected_labels: Vec<String> = expected.iter().map(|s| s.to_string()).collect();
    let row: Option<StateRow> = sqlx::query_as(
        "UPDATE package_states SET status = $3 \
         WHERE id = $1 AND status = ANY($2) RETURNING *",
    )
    .bind(id)
    .bind(&expected_labels)
    .bind(to.as_str())
    .fetch_optional(pool)
    .await?;

    match row {
        Some(r) => Ok(PackageState::try_from(r)?),
        None => {
            let current: Option<(String,)> =
                sqlx::query_as("SELECT status FROM package_states WHERE id = $1")
                    .bind(id)
                    .fetch_optional(pool)
                    .await?;
            match current {
                Some((status,)) => Err(TransitionError::Conflict {
                    current: status.parse().map_err(anyhow::Error::from)?,
                }),
                None => Err(TransitionError::NotFound),
            }
        }
    }
}

/// Reject a package: move it to `ignored` and append the matching event.
pub(crate) async fn reject(pool: &PgPool, id: Uuid) -> Result<PackageState, TransitionError> {
    let mut tx = pool.begin().await?;

    let row: Option<StateRow> = sqlx::query_as(
        "UPDATE package_states SET status = 'ignored' \
         WHERE id = $1 AND status IN ('pending', 'approved', 'checking_dependencies', \
             'pending_dependencies', 'failed') RETURNING *",
    )
    .bind(id)
    .fetch_optional(tx.as_mut())
    .await?;

    let state = match row {
        Some(r) => PackageState::try_from(r)?,
        None => {
            let current: Option<(String,)> =
                sqlx::query_as("SELECT status FROM package_states WHERE id = $1")
                    .bind(id)
                    .fetch_optional(tx.as_mut())
                    .await?;
            return match current {
                Some((status,)) => Err(TransitionError::Conflict {
                    current: status.parse().map_err(anyhow::Error::from)?,
                }),
                None => Err(TransitionError::NotFound),
            };
        }
    };

    append_outcome(tx.as_mut(), state.host_id, &state, EventKind::Ignored).await?;
    hosts::refresh_update_available(tx.as_mut(), state.host_id).await?;
    tx.commit().await?;
    Ok(state)
}

/// Record a dry-run dependency report: stash the list in metadata and move
/// the row to `pending_dependencies`.
pub(crate) async fn set_dependencies(
    pool: &PgPool,
    id: Uuid,
    dependencies: &[String],
    dry_run_output: &str,
) -> Result<PackageState, TransitionError> {
    let extra = serde_json::json!({
        "dependencies": dependencies,
        "dry_run_output": dry_run_output,
    });
    let row: Option<StateRow> = sqlx::query_as(
        "UPDATE package_states \
         SET status = 'pending_dependencies', metadata = metadata || $2 \
         WHERE id = $1 AND status IN ('approved', 'checking_dependencies') RETURNING *",
    )
    .bind(id)
    .bind(extra)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(r) => Ok(PackageState::try_from(r)?),
        None => {
            let current: Option<(String,)> =
                sqlx::query_as("SELECT status FROM package_states WHERE id = $1")
                    .bind(id)
                    .fetch_optional(pool)
                    .await?;
            match current {
                Some((status,)) => Err(TransitionError::Conflict {
                    current: status.parse().map_err(anyhow::Error::from)?,
                }),
                None => Err(TransitionError::NotFound),
            }
        }
    }
}

/// Move a claimed dry-run's package into `checking_dependencies`.
pub(crate) async fn mark_checking(
    conn: &mut PgConnection,
    host_id: Uuid,
    package_type: PackageType,
    package_name: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE package_states SET status = 'checking_dependencies' \
         WHERE host_id = $1 AND package_type = $2 AND package_name = $3 \
           AND status = 'approved'",
    )
    .bind(host_id)
    .bind(package_type.as_str())
    .bind(package_name)
    .execute(conn)
    .await?;
    Ok(())
}

/// Record the outcome of an install attempt for a set of named packages.
///
/// Each package transitions to `updated` or `failed`, gets a history row
/// snapshotting the versions at this instant, and an outcome event. Sticky
/// rows are left alone. Unnamed (upgrade-all) outcomes are reconciled by
/// the next scan instead.
pub(crate) async fn record_install_outcome(
    pool: &PgPool,
    host_id: Uuid,
    package_type: PackageType,
    package_names: &[String],
    success: bool,
    rollback: bool,
) -> Result<()> {
    for name in package_names {
        let mut tx = pool.begin().await?;

        let row: Option<StateRow> = sqlx::query_as(
            "SELECT * FROM package_states \
             WHERE host_id = $1 AND package_type = $2 AND package_name = $3 \
               AND status NOT IN ('updated', 'ignored') FOR UPDATE",
        )
        .bind(host_id)
        .bind(package_type.as_str())
        .bind(name)
        .fetch_optional(tx.as_mut())
        .await?;

        let state = match row {
            Some(r) => PackageState::try_from(r)?,
            None => {
                tx.commit().await?;
                continue;
            }
        };

        let history_status = match (success, rollback) {
            (_, true) => "rollback",
            (true, false) => "success",
            (false, false) => "failed",
        };
        sqlx::query(
            "INSERT INTO package_history (host_id, package_state_id, package_type, \
                 package_name, from_version, to_version, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(host_id)
        .bind(state.id)
        .bind(state.package_type.as_str())
        .bind(&state.package_name)
        .bind(&state.current_version)
        .bind(&state.available_version)
        .bind(history_status)
        .execute(tx.as_mut())
        .await?;

        let kind = if success {
            EventKind::Updated
        } else {
            EventKind::Failed
        };
        append_outcome(tx.as_mut(), host_id, &state, kind).await?;

        if success {
            sqlx::query(
                "UPDATE package_states SET status = 'updated', \
                     current_version = available_version, last_updated_at = now() \
                 WHERE id = $1",
            )
            .bind(state.id)
            .execute(tx.as_mut())
            .await?;
        } else {
            sqlx::query("UPDATE package_states SET status = 'failed' WHERE id = $1")
                .bind(state.id)
                .execute(tx.as_mut())
                .await?;
        }

        hosts::refresh_update_available(tx.as_mut(), host_id).await?;
        tx.commit().await?;
    }
    Ok(())
}

/// Install history for a host, newest first.
pub(crate) async fn history(pool: &PgPool, host_id: Uuid, limit: i64) -> Result<Vec<HistoryRow>> {
    let rows: Vec<HistoryRow> = sqlx::query_as(
        "SELECT * FROM package_history WHERE host_id = $1 ORDER BY applied_at DESC LIMIT $2",
    )
    .bind(host_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Delete events past the retention window. Returns the pruned count.
pub(crate) async fn prune_events_older_than(pool: &PgPool, retention: Duration) -> Result<u64> {
    let cutoff = Utc::now() - retention;
    let res = sqlx::query("DELETE FROM update_events WHERE created_at < $1")
        .bind(cutoff)
        .execute(pool)
        .await?;
    EVENTS_PRUNED.inc_by(res.rows_affected());
    Ok(res.rows_affected())
}
