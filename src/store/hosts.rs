//! Host registry.

use crate::proto::{CheckInRequest, HostStatus, OsFamily, SystemInfoRequest};
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgConnection, PgPool};
use uuid::Uuid;

/// Identity presented by an enrolling machine.
#[derive(Clone, Debug)]
pub(crate) struct HostFingerprint {
    pub(crate) hostname: String,
    pub(crate) os_type: OsFamily,
    pub(crate) os_version: String,
    pub(crate) architecture: String,
    pub(crate) agent_version: String,
}

/// A registered host.
#[derive(Clone, Debug)]
pub(crate) struct Host {
    pub(crate) id: Uuid,
    pub(crate) hostname: String,
    pub(crate) os_type: OsFamily,
    pub(crate) os_version: String,
    pub(crate) architecture: String,
    pub(crate) agent_version: String,
    pub(crate) status: HostStatus,
    pub(crate) last_seen_at: DateTime<Utc>,
    pub(crate) reboot_required: bool,
    pub(crate) reboot_reason: Option<String>,
    pub(crate) last_reboot_at: Option<DateTime<Utc>>,
    pub(crate) update_available: bool,
    pub(crate) heartbeat_until: Option<DateTime<Utc>>,
    pub(crate) cpu_percent: Option<f64>,
    pub(crate) memory_percent: Option<f64>,
    pub(crate) disk_percent: Option<f64>,
    pub(crate) uptime_secs: Option<i64>,
    pub(crate) metadata: JsonValue,
    pub(crate) created_at: DateTime<Utc>,
    /// Completion time of the most recent scan batch, if any.
    pub(crate) last_scan_at: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow)]
struct HostRow {
    id: Uuid,
    hostname: String,
    os_type: String,
    os_version: String,
    architecture: String,
    agent_version: String,
    status: String,
    last_seen_at: DateTime<Utc>,
    reboot_required: bool,
    reboot_reason: Option<String>,
    last_reboot_at: Option<DateTime<Utc>>,
    update_available: bool,
    heartbeat_until: Option<DateTime<Utc>>,
    cpu_percent: Option<f64>,
    memory_percent: Option<f64>,
    disk_percent: Option<f64>,
    uptime_secs: Option<i64>,
    metadata: JsonValue,
    created_at: DateTime<Utc>,
    last_scan_at: Option<DateTime<Utc>>,
}

impl TryFrom<HostRow> for Host {
    type Error = anyhow::Error;

    fn try_from(row: HostRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            hostname: row.hostname,
            os_type: row.os_type.parse()?,
            os_version: row.os_version,
            architecture: row.architecture,
            agent_version: row.agent_version,
            status: row.status.parse()?,
            last_seen_at: row.last_seen_at,
            reboot_required: row.reboot_required,
            reboot_reason: row.reboot_reason,
            last_reboot_at: row.last_reboot_at,
            update_available: row.update_available,
            heartbeat_until: row.heartbeat_until,
            cpu_percent: row.cpu_percent,
            memory_percent: row.memory_percent,
            disk_percent: row.disk_percent,
            uptime_secs: row.uptime_secs,
            metadata: row.metadata,
            created_at: row.created_at,
            last_scan_at: row.last_scan_at,
        })
    }
}

/// Columns plus the derived last-scan timestamp.
static SELECT_HOST: &str = "SELECT h.*, \
    (SELECT max(b.completed_at) FROM scan_batches b WHERE b.host_id = h.id) AS last_scan_at \
    FROM hosts h";

/// Create a host row inside an open transaction; returns the new id.
pub(crate) async fn insert(
    conn: &mut PgConnection,
    fingerprint: &HostFingerprint,
) -> Result<Uuid, sqlx::Error> {
    let (id,): (Uuid,) = sqlx::query_as(
        "INSERT INTO hosts (hostname, os_type, os_version, architecture, agent_version) \
         VALUES ($1, $2, $3, $4, $5) RETURNING id",
    )
    .bind(&fingerprint.hostname)
    .bind(fingerprint.os_type.as_str())
    .bind(&fingerprint.os_version)
    .bind(&fingerprint.architecture)
    .bind(&fingerprint.agent_version)
    .fetch_one(conn)
    .await?;
    Ok(id)
}

/// Fetch one host.
pub(crate) async fn get(pool: &PgPool, id: Uuid) -> Result<Option<Host>> {
    let row: Option<HostRow> = sqlx::query_as(&format!("{} WHERE h.id = $1", SELECT_HOST))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.map(Host::try_from).transpose()
}

/// List hosts with optional status / OS-family filters.
pub(crate) async fn list(
    pool: &PgPool,
    status: Option<HostStatus>,
    os_type: Option<OsFamily>,
) -> Result<Vec<Host>> {
    let query = format!(
        "{} WHERE ($1::text IS NULL OR h.status = $1) \
           AND ($2::text IS NULL OR h.os_type = $2) \
         ORDER BY h.hostname, h.created_at",
        SELECT_HOST
    );
    let rows: Vec<HostRow> = sqlx::query_as(&query)
        .bind(status.map(|s| s.as_str()))
        .bind(os_type.map(|o| o.as_str()))
        .fetch_all(pool)
        .await?;
    rows.into_iter().map(Host::try_from).collect()
}

/// Delete a host; dependent rows cascade.
pub(crate) async fn delete(pool: &PgPool, id: Uuid) -> Result<bool> {
    let res = sqlx::query("DELETE FROM hosts WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

/// Stamp a check-in: liveness, light metrics, agent version.
///
/// Returns the heartbeat deadline so the caller can derive the effective
/// poll interval. Last-writer-wins on the metrics columns is acceptable.
pub(crate) async fn touch_check_in(
    pool: &PgPool,
    id: Uuid,
    metrics: &CheckInRequest,
) -> Result<Option<Option<DateTime<Utc>>>> {
    let row: Option<(Option<DateTime<Utc>>,)> = sqlx::query_as(
        "UPDATE hosts SET last_seen_at = now(), status = 'online', \
             cpu_percent = COALESCE($2, cpu_percent), \
             memory_percent = COALESCE($3, memory_percent), \
             disk_percent = COALESCE($4, disk_percent), \
             uptime_secs = COALESCE($5, uptime_secs), \
             agent_version = COALESCE($6, agent_version) \
         WHERE id = $1 RETURNING heartbeat_until",
    )
    .bind(id)
    .bind(metrics.cpu_percent)
    .bind(metrics.memory_percent)
    .bind(metrics.disk_percent)
    .bind(metrics.uptime_secs.map(|u| u as i64))
    .bind(metrics.agent_version.as_deref())
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|(hb,)| hb))
}

/// Replace inventory fields from a full system-info push.
pub(crate) async fn apply_system_info(
    pool: &PgPool,
    id: Uuid,
    info: &SystemInfoRequest,
) -> Result<bool> {
    let metadata = serde_json::to_value(&info.metadata)?;
    let res = sqlx::query(
        "UPDATE hosts SET \
             hostname = COALESCE($2, hostname), \
             os_version = COALESCE($3, os_version), \
             architecture = COALESCE($4, architecture), \
             agent_version = COALESCE($5, agent_version), \
             reboot_required = $6, \
             reboot_reason = $7, \
             last_reboot_at = COALESCE($8, last_reboot_at), \
             metadata = $9 \
         WHERE id = $1",
    )
    .bind(id)
    .bind(info.hostname.as_deref())
    .bind(info.os_version.as_deref())
    .bind(info.architecture.as_deref())
    .bind(info.agent_version.as_deref())
    .bind(info.reboot_required)
    .bind(info.reboot_reason.as_deref())
    .bind(info.last_reboot_at)
    .bind(metadata)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() > 0)
}

/// Open (or close) a heartbeat window on a host.
pub(crate) async fn set_heartbeat(
    pool: &PgPool,
    id: Uuid,
    enabled: bool,
    duration: Duration,
) -> Result<bool> {
    let until = if enabled {
        Some(Utc::now() + duration)
    } else {
        None
    };
    let res = sqlx::query("UPDATE hosts SET heartbeat_until = $2 WHERE id = $1")
        .bind(id)
        .bind(until)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

/// Mark hosts silent past the threshold as offline. Returns the count.
pub(crate) async fn offline_sweep(pool: &PgPool, threshold: Duration) -> Result<u64> {
    let cutoff = Utc::now() - threshold;
    let res = sqlx::query(
        "UPDATE hosts SET status = 'offline' \
         WHERE status = 'online' AND last_seen_at < $1",
    )
    .bind(cutoff)
    .execute(pool)
    .await?;
    Ok(res.rows_affected())
}

/// Recompute the update-available flag inside an open transaction.
pub(crate) async fn refresh_update_available(
    conn: &mut PgConnection,
    id: Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE hosts SET update_available = EXISTS ( \
             SELECT 1 FROM package_states \
             WHERE host_id = $1 AND status NOT IN ('updated', 'ignored')) \
         WHERE id = $1",
    )
    .bind(id)
    .execute(conn)
    .await?;
    Ok(())
}
