//! Operator update-inventory endpoints.

use super::error::ApiError;
use super::extract::OperatorAuth;
use super::AppState;
use crate::proto::{
    BulkApproveRequest, BulkApproveResponse, CommandSource, CommandType,
    ConfirmDependenciesRequest, PackageStateView, PackageStatus, PackageType, Page, Severity,
};
use crate::store::{commands, events};
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

/// Page-size ceiling; larger requests are clamped, not refused.
const MAX_PAGE_SIZE: u32 = 100;

impl From<events::PackageState> for PackageStateView {
    fn from(s: events::PackageState) -> Self {
        Self {
            id: s.id,
            host_id: s.host_id,
            package_type: s.package_type,
            package_name: s.package_name,
            current_version: s.current_version,
            available_version: s.available_version,
            severity: s.severity,
            source: s.source,
            status: s.status,
            metadata: s.metadata,
            last_discovered_at: s.last_discovered_at,
            last_updated_at: s.last_updated_at,
        }
    }
}

/// Filters and pagination for the inventory listing.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct UpdateFilter {
    agent: Option<Uuid>,
    package_type: Option<String>,
    severity: Option<String>,
    status: Option<String>,
    page: Option<u32>,
    page_size: Option<u32>,
}

/// `GET /api/v1/updates`: filtered, paginated inventory.
pub(crate) async fn list(
    State(state): State<AppState>,
    _auth: OperatorAuth,
    Query(q): Query<UpdateFilter>,
) -> Result<Json<Page<PackageStateView>>, ApiError> {
    let filter = events::StateFilter {
        host_id: q.agent,
        package_type: parse_label::<PackageType>(q.package_type)?,
        severity: parse_label::<Severity>(q.severity)?,
        status: parse_label::<PackageStatus>(q.status)?,
    };
    let page = q.page.unwrap_or(1).max(1);
    let page_size = q.page_size.unwrap_or(50).clamp(1, MAX_PAGE_SIZE);
    let offset = i64::from(page - 1) * i64::from(page_size);

    let (states, total) =
        events::list_states(&state.pool, &filter, i64::from(page_size), offset).await?;

    Ok(Json(Page {
        items: states.into_iter().map(PackageStateView::from).collect(),
        total,
        page,
        page_size,
    }))
}

/// `POST /api/v1/updates/{id}/approve`: pending → approved, enqueue dry-run.
pub(crate) async fn approve(
    State(state): State<AppState>,
    auth: OperatorAuth,
    Path(id): Path<Uuid>,
) -> Result<Json<JsonValue>, ApiError> {
    auth.ensure_write()?;
    let cmd = approve_one(&state, id).await?;
    Ok(Json(json!({ "status": "approved", "command_id": cmd })))
}

async fn approve_one(state: &AppState, id: Uuid) -> Result<Uuid, ApiError> {
    let pkg = events::transition(
        &state.pool,
        id,
        &[PackageStatus::Pending],
        PackageStatus::Approved,
    )
    .await?;

    let cmd = commands::push_one(
        &state.pool,
        pkg.host_id,
        CommandType::DryRunUpdate,
        json!({
            "package_id": pkg.id,
            "package_type": pkg.package_type,
            "package_name": pkg.package_name,
        }),
        CommandSource::System,
    )
    .await?;
    Ok(cmd.id)
}

/// `POST /api/v1/updates/approve`: bulk approval.
///
/// Conflicting or missing rows are skipped, not fatal; approval of a
/// thousand-row selection should not stop at the first already-updated
/// package.
pub(crate) async fn bulk_approve(
    State(state): State<AppState>,
    auth: OperatorAuth,
    Json(req): Json<BulkApproveRequest>,
) -> Result<Json<BulkApproveResponse>, ApiError> {
    auth.ensure_write()?;

    let mut approved = 0;
    let mut skipped = 0;
    for id in req.ids {
        match approve_one(&state, id).await {
            Ok(_) => approved += 1,
            Err(ApiError::NotFound(_)) | Err(ApiError::Conflict(_)) => skipped += 1,
            Err(e) => return Err(e),
        }
    }
    Ok(Json(BulkApproveResponse { approved, skipped }))
}

/// `POST /api/v1/updates/{id}/reject`: → ignored.
pub(crate) async fn reject(
    State(state): State<AppState>,
    auth: OperatorAuth,
    Path(id): Path<Uuid>,
) -> Result<Json<JsonValue>, ApiError> {
    auth.ensure_write()?;
    let pkg = events::reject(&state.pool, id).await?;
    Ok(Json(json!({ "status": pkg.status })))
}

/// `POST /api/v1/updates/{id}/install`: approved → installing, enqueue.
pub(crate) async fn install(
    State(state): State<AppState>,
    auth: OperatorAuth,
    Path(id): Path<Uuid>,
) -> Result<Json<JsonValue>, ApiError> {
    auth.ensure_write()?;
    let pkg = events::transition(
        &state.pool,
        id,
        &[PackageStatus::Approved],
        PackageStatus::Installing,
    )
    .await?;

    let cmd = commands::push_one(
        &state.pool,
        pkg.host_id,
        CommandType::InstallUpdates,
        json!({
            "package_id": pkg.id,
            "package_type": pkg.package_type,
            "package_name": pkg.package_name,
        }),
        CommandSource::System,
    )
    .await?;
    Ok(Json(json!({ "status": "installing", "command_id": cmd.id })))
}

/// `POST /api/v1/updates/{id}/confirm-dependencies`:
/// pending_dependencies → approved, enqueue the confirmed install.
pub(crate) async fn confirm_dependencies(
    State(state): State<AppState>,
    auth: OperatorAuth,
    Path(id): Path<Uuid>,
    Json(req): Json<ConfirmDependenciesRequest>,
) -> Result<Json<JsonValue>, ApiError> {
    auth.ensure_write()?;
    let pkg = events::transition(
        &state.pool,
        id,
        &[PackageStatus::PendingDependencies],
        PackageStatus::Approved,
    )
    .await?;

    // Operator may trim the list; default to what the dry-run surfaced.
    let dependencies = match req.dependencies {
        Some(deps) => deps,
        None => pkg
            .metadata
            .get("dependencies")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default(),
    };

    let cmd = commands::push_one(
        &state.pool,
        pkg.host_id,
        CommandType::ConfirmDependencies,
        json!({
            "package_id": pkg.id,
            "package_type": pkg.package_type,
            "package_name": pkg.package_name,
            "dependencies": dependencies,
        }),
        CommandSource::System,
    )
    .await?;
    Ok(Json(json!({ "status": "approved", "command_id": cmd.id })))
}

fn parse_label<T: std::str::FromStr>(value: Option<String>) -> Result<Option<T>, ApiError> {
    match value {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ApiError::validation("bad_filter", format!("unknown filter '{}'", raw))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_label() {
        assert_eq!(
            parse_label::<Severity>(Some("critical".to_string())).unwrap(),
            Some(Severity::Critical)
        );
        assert_eq!(parse_label::<Severity>(None).unwrap(), None);
        assert!(parse_label::<Severity>(Some("urgent".to_string())).is_err());
    }
}
