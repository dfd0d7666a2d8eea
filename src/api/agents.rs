//! Agent-facing dispatcher endpoints, plus operator host management.

use super::error::ApiError;
use super::extract::{AgentAuth, OperatorAuth};
use super::AppState;
use crate::enrollment::{self, refresh};
use crate::proto::{
    CheckInRequest, CheckInResponse, CommandEnvelope, CommandSource, CommandType, HeartbeatRequest,
    HostStatus, HostView, OsFamily, RegisterRequest, RegisterResponse, RenewRequest, RenewResponse,
    ReportDependenciesRequest, ReportLogRequest, ReportUpdatesRequest, SystemInfoRequest,
};
use crate::store::{commands, events, hosts};
use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{Duration, Utc};
use prometheus::IntCounter;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

lazy_static::lazy_static! {
    static ref CHECK_INS: IntCounter = register_int_counter!(opts!(
        "redflag_check_ins_total",
        "Total number of agent check-ins."
    )).unwrap();
}

impl From<hosts::Host> for HostView {
    fn from(h: hosts::Host) -> Self {
        Self {
            id: h.id,
            hostname: h.hostname,
            os_type: h.os_type,
            os_version: h.os_version,
            architecture: h.architecture,
            agent_version: h.agent_version,
            status: h.status,
            last_seen_at: h.last_seen_at,
            update_available: h.update_available,
            reboot_required: h.reboot_required,
            last_scan_at: h.last_scan_at,
            metadata: h.metadata,
        }
    }
}

impl From<commands::Command> for CommandEnvelope {
    fn from(c: commands::Command) -> Self {
        Self {
            id: c.id,
            command_type: c.command_type.as_str().to_string(),
            params: c.params,
            created_at: c.created_at,
        }
    }
}

/// `POST /api/v1/agents/register`: consume an enrollment seat.
pub(crate) async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, ApiError> {
    if req.hostname.trim().is_empty() {
        return Err(ApiError::validation("missing_hostname", "hostname is required"));
    }
    if req.token.trim().is_empty() {
        return Err(ApiError::Auth);
    }

    let fingerprint = hosts::HostFingerprint {
        hostname: req.hostname,
        os_type: req.os_type,
        os_version: req.os_version,
        architecture: req.architecture,
        agent_version: req.agent_version,
    };
    let enrollment = enrollment::register_host(&state.pool, &req.token, fingerprint).await?;
    let access_token = state.signer.sign_agent(enrollment.host_id)?;

    Ok(Json(RegisterResponse {
        agent_id: enrollment.host_id,
        access_token,
        refresh_token: enrollment.refresh_secret,
        check_in_interval: state.settings.check_in_interval_secs,
    }))
}

/// `POST /api/v1/agents/{id}/renew`: mint a fresh access credential.
pub(crate) async fn renew(
    State(state): State<AppState>,
    Path(host_id): Path<Uuid>,
    Json(req): Json<RenewRequest>,
) -> Result<Json<RenewResponse>, ApiError> {
    refresh::renew(&state.pool, host_id, &req.refresh_token).await?;
    let access_token = state.signer.sign_agent(host_id)?;
    Ok(Json(RenewResponse {
        access_token,
        expires_in: crate::auth::ACCESS_TOKEN_TTL.num_seconds() as u64,
    }))
}

/// `GET /api/v1/agents/{id}/commands`: check-in without metrics.
pub(crate) async fn check_in_get(
    state: State<AppState>,
    auth: AgentAuth,
    path: Path<Uuid>,
) -> Result<Json<CheckInResponse>, ApiError> {
    check_in(state, auth, path, Json(CheckInRequest::default())).await
}

/// `POST /api/v1/agents/{id}/commands`: check-in with light metrics.
///
/// Stamps liveness, claims up to ten pending commands, and returns the
/// effective poll interval (rapid while a heartbeat window is open).
pub(crate) async fn check_in(
    State(state): State<AppState>,
    auth: AgentAuth,
    Path(host_id): Path<Uuid>,
    Json(metrics): Json<CheckInRequest>,
) -> Result<Json<CheckInResponse>, ApiError> {
    auth.ensure_host(host_id)?;
    CHECK_INS.inc();

    let heartbeat_until = hosts::touch_check_in(&state.pool, host_id, &metrics)
        .await?
        .ok_or(ApiError::NotFound("host"))?;

    let claimed = commands::claim(&state.pool, host_id, commands::CLAIM_LIMIT).await?;

    // A claimed dry-run moves its package into checking_dependencies.
    let mut conn = state.pool.acquire().await?;
    for cmd in &claimed {
        if cmd.command_type == CommandType::DryRunUpdate {
            if let (Some(ptype), Some(name)) = (
                param_package_type(&cmd.params),
                param_str(&cmd.params, "package_name"),
            ) {
                events::mark_checking(&mut conn, host_id, ptype, &name).await?;
            }
        }
    }
    drop(conn);

    let rapid = heartbeat_until.map(|t| t > Utc::now()).unwrap_or(false);
    let interval = if rapid {
        state.settings.heartbeat_interval_secs
    } else {
        state.settings.check_in_interval_secs
    };

    Ok(Json(CheckInResponse {
        commands: claimed.into_iter().map(CommandEnvelope::from).collect(),
        check_in_interval: interval,
    }))
}

/// `POST /api/v1/agents/{id}/commands/{cmd_id}/running`: execution start.
pub(crate) async fn command_running(
    State(state): State<AppState>,
    auth: AgentAuth,
    Path((host_id, cmd_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<JsonValue>, ApiError> {
    auth.ensure_host(host_id)?;
    let started = commands::start(&state.pool, cmd_id, host_id).await?;
    Ok(Json(json!({ "running": started })))
}

/// `POST /api/v1/agents/{id}/updates`: discovery batch ingest.
pub(crate) async fn report_updates(
    State(state): State<AppState>,
    auth: AgentAuth,
    Path(host_id): Path<Uuid>,
    Json(req): Json<ReportUpdatesRequest>,
) -> Result<Json<crate::proto::BatchReceipt>, ApiError> {
    auth.ensure_host(host_id)?;

    // The referenced command must belong to this host before the batch
    // is stored against it or anything settles.
    if let Some(command_id) = req.command_id {
        commands::get(&state.pool, command_id)
            .await?
            .filter(|c| c.host_id == host_id)
            .ok_or(ApiError::NotFound("command"))?;
    }

    let receipt = events::ingest(&state.pool, host_id, req.command_id, &req.updates).await?;

    if let Some(command_id) = req.command_id {
        let result = json!({ "discovered": receipt.processed });
        commands::settle(&state.pool, command_id, host_id, true, result).await?;
    }

    Ok(Json(receipt))
}

/// `POST /api/v1/agents/{id}/logs`: command execution report.
///
/// Persists the log row, settles the referenced command, and for install
/// shaped commands folds the outcome into the package projection.
pub(crate) async fn report_log(
    State(state): State<AppState>,
    auth: AgentAuth,
    Path(host_id): Path<Uuid>,
    Json(req): Json<ReportLogRequest>,
) -> Result<Json<JsonValue>, ApiError> {
    auth.ensure_host(host_id)?;

    let cmd = commands::get(&state.pool, req.command_id)
        .await?
        .filter(|c| c.host_id == host_id)
        .ok_or(ApiError::NotFound("command"))?;

    commands::add_log(
        &state.pool,
        &commands::LogEntry {
            command_id: cmd.id,
            host_id,
            action: &req.action,
            result: if req.success { "success" } else { "failed" },
            stdout: &req.stdout,
            stderr: &req.stderr,
            exit_code: req.exit_code,
            duration_ms: req.duration_ms,
        },
    )
    .await
    .map_err(ApiError::from)?;

    let result = json!({
        "action": req.action,
        "exit_code": req.exit_code,
        "duration_ms": req.duration_ms,
    });
    let settled = commands::settle(&state.pool, cmd.id, host_id, req.success, result).await?;

    if settled {
        apply_install_outcome(&state, &cmd, req.success).await?;
    }

    Ok(Json(json!({ "settled": settled })))
}

/// Fold an install-shaped command outcome into the package projection.
async fn apply_install_outcome(
    state: &AppState,
    cmd: &commands::Command,
    success: bool,
) -> Result<(), ApiError> {
    let rollback = cmd.command_type == CommandType::RollbackUpdate;
    if !matches!(
        cmd.command_type,
        CommandType::InstallUpdates | CommandType::ConfirmDependencies | CommandType::RollbackUpdate
    ) {
        return Ok(());
    }

    let ptype = match param_package_type(&cmd.params) {
        Some(t) => t,
        // Upgrade-all carries no names; the next scan reconciles.
        None => return Ok(()),
    };
    let names = param_package_names(&cmd.params);
    if names.is_empty() {
        return Ok(());
    }

    events::record_install_outcome(&state.pool, cmd.host_id, ptype, &names, success, rollback)
        .await
        .map_err(ApiError::from)
}

/// `POST /api/v1/agents/{id}/dependencies`: dry-run dependency report.
pub(crate) async fn report_dependencies(
    State(state): State<AppState>,
    auth: AgentAuth,
    Path(host_id): Path<Uuid>,
    Json(req): Json<ReportDependenciesRequest>,
) -> Result<Json<JsonValue>, ApiError> {
    auth.ensure_host(host_id)?;

    let owned = events::get_state(&state.pool, req.package_id)
        .await?
        .map(|s| s.host_id == host_id)
        .unwrap_or(false);
    if !owned {
        return Err(ApiError::NotFound("package"));
    }

    let state_row = events::set_dependencies(
        &state.pool,
        req.package_id,
        &req.dependencies,
        &req.dry_run_output,
    )
    .await?;

    Ok(Json(json!({ "status": state_row.status })))
}

/// `POST /api/v1/agents/{id}/system-info`: full inventory push.
pub(crate) async fn report_system_info(
    State(state): State<AppState>,
    auth: AgentAuth,
    Path(host_id): Path<Uuid>,
    Json(req): Json<SystemInfoRequest>,
) -> Result<Json<JsonValue>, ApiError> {
    auth.ensure_host(host_id)?;
    let updated = hosts::apply_system_info(&state.pool, host_id, &req).await?;
    if !updated {
        return Err(ApiError::NotFound("host"));
    }
    Ok(Json(json!({ "updated": true })))
}

/// Filters for the operator host listing.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct HostFilter {
    status: Option<String>,
    os_type: Option<String>,
}

/// `GET /api/v1/agents`: operator host listing.
pub(crate) async fn list(
    State(state): State<AppState>,
    _auth: OperatorAuth,
    Query(filter): Query<HostFilter>,
) -> Result<Json<Vec<HostView>>, ApiError> {
    let status: Option<HostStatus> = parse_label(filter.status, "status")?;
    let os_type: Option<OsFamily> = parse_label(filter.os_type, "os_type")?;
    let hosts = hosts::list(&state.pool, status, os_type).await?;
    Ok(Json(hosts.into_iter().map(HostView::from).collect()))
}

/// `GET /api/v1/agents/{id}`: host detail.
pub(crate) async fn detail(
    State(state): State<AppState>,
    _auth: OperatorAuth,
    Path(host_id): Path<Uuid>,
) -> Result<Json<HostView>, ApiError> {
    let host = hosts::get(&state.pool, host_id)
        .await?
        .ok_or(ApiError::NotFound("host"))?;
    Ok(Json(host.into()))
}

/// `DELETE /api/v1/agents/{id}`: drop a host and everything it owns.
pub(crate) async fn remove(
    State(state): State<AppState>,
    auth: OperatorAuth,
    Path(host_id): Path<Uuid>,
) -> Result<Json<JsonValue>, ApiError> {
    auth.ensure_admin()?;
    // Credentials die before the row cascade takes them.
    let mut conn = state.pool.acquire().await?;
    refresh::revoke_all_for_host(&mut conn, host_id).await?;
    drop(conn);

    let deleted = hosts::delete(&state.pool, host_id).await?;
    if !deleted {
        return Err(ApiError::NotFound("host"));
    }
    log::info!("host {} deleted by operator {}", host_id, auth.operator_id);
    Ok(Json(json!({ "deleted": true })))
}

/// `POST /api/v1/agents/{id}/scan`: enqueue a scan for one host.
pub(crate) async fn trigger_scan(
    State(state): State<AppState>,
    auth: OperatorAuth,
    Path(host_id): Path<Uuid>,
) -> Result<Json<JsonValue>, ApiError> {
    auth.ensure_write()?;
    if hosts::get(&state.pool, host_id).await?.is_none() {
        return Err(ApiError::NotFound("host"));
    }
    let cmd = commands::push_one(
        &state.pool,
        host_id,
        CommandType::ScanUpdates,
        json!({}),
        CommandSource::Manual,
    )
    .await?;
    Ok(Json(json!({ "command_id": cmd.id })))
}

/// `POST /api/v1/agents/scan`: enqueue a scan for every known host.
pub(crate) async fn trigger_scan_all(
    State(state): State<AppState>,
    auth: OperatorAuth,
) -> Result<Json<JsonValue>, ApiError> {
    auth.ensure_write()?;
    let fleet = hosts::list(&state.pool, None, None).await?;
    let mut enqueued = 0;
    for host in &fleet {
        commands::push_one(
            &state.pool,
            host.id,
            CommandType::ScanUpdates,
            json!({}),
            CommandSource::Manual,
        )
        .await?;
        enqueued += 1;
    }
    Ok(Json(json!({ "enqueued": enqueued })))
}

/// `POST /api/v1/agents/{id}/heartbeat`: rapid-poll window toggle.
pub(crate) async fn set_heartbeat(
    State(state): State<AppState>,
    auth: OperatorAuth,
    Path(host_id): Path<Uuid>,
    Json(req): Json<HeartbeatRequest>,
) -> Result<Json<JsonValue>, ApiError> {
    auth.ensure_write()?;
    let updated = hosts::set_heartbeat(
        &state.pool,
        host_id,
        req.enabled,
        Duration::minutes(i64::from(req.duration_minutes)),
    )
    .await?;
    if !updated {
        return Err(ApiError::NotFound("host"));
    }
    Ok(Json(json!({ "enabled": req.enabled })))
}

/// `GET /api/v1/agents/{id}/history`: install history for a host.
pub(crate) async fn history(
    State(state): State<AppState>,
    _auth: OperatorAuth,
    Path(host_id): Path<Uuid>,
) -> Result<Json<JsonValue>, ApiError> {
    let rows = events::history(&state.pool, host_id, 200).await?;
    let items: Vec<JsonValue> = rows
        .into_iter()
        .map(|r| {
            json!({
                "id": r.id,
                "package_type": r.package_type,
                "package_name": r.package_name,
                "from_version": r.from_version,
                "to_version": r.to_version,
                "status": r.status,
                "applied_at": r.applied_at,
            })
        })
        .collect();
    Ok(Json(json!({ "items": items })))
}

fn parse_label<T: std::str::FromStr>(
    value: Option<String>,
    field: &'static str,
) -> Result<Option<T>, ApiError> {
    match value {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ApiError::validation("bad_filter", format!("unknown {} filter", field))),
    }
}

/// Read a string parameter out of a command's parameter map.
pub(super) fn param_str(params: &JsonValue, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

/// Read the package type out of a command's parameter map.
pub(super) fn param_package_type(params: &JsonValue) -> Option<crate::proto::PackageType> {
    param_str(params, "package_type").and_then(|s| s.parse().ok())
}

/// Read the target package names out of a command's parameter map.
///
/// Accepts both the single `package_name` form and the `packages` list.
pub(super) fn param_package_names(params: &JsonValue) -> Vec<String> {
    if let Some(name) = param_str(params, "package_name") {
        return vec![name];
    }
    params
        .get("packages")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_package_names_single() {
        let params = json!({"package_type": "apt", "package_name": "curl"});
        assert_eq!(param_package_names(&params), vec!["curl".to_string()]);
    }

    #[test]
    fn test_param_package_names_list() {
        let params = json!({"packages": ["curl", "libcurl4"]});
        assert_eq!(
            param_package_names(&params),
            vec!["curl".to_string(), "libcurl4".to_string()]
        );
    }

    #[test]
    fn test_param_package_names_empty() {
        assert!(param_package_names(&json!({})).is_empty());
    }

    #[test]
    fn test_param_package_type() {
        let params = json!({"package_type": "docker_image"});
        assert_eq!(
            param_package_type(&params),
            Some(crate::proto::PackageType::DockerImage)
        );
        assert_eq!(param_package_type(&json!({"package_type": "rpm"})), None);
    }
}
