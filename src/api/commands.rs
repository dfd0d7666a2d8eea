//! Operator command-queue endpoints.

use super::error::ApiError;
use super::extract::OperatorAuth;
use super::AppState;
use crate::proto::{ArchiveFailedRequest, CommandView};
use crate::store::commands;
use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Duration;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

impl From<commands::Command> for CommandView {
    fn from(c: commands::Command) -> Self {
        Self {
            id: c.id,
            host_id: c.host_id,
            command_type: c.command_type,
            params: c.params,
            status: c.status,
            source: c.source,
            result: c.result,
            retry_parent_id: c.retry_parent_id,
            created_at: c.created_at,
            sent_at: c.sent_at,
            completed_at: c.completed_at,
        }
    }
}

/// Optional host scoping for command listings.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct CommandFilter {
    agent: Option<Uuid>,
    limit: Option<i64>,
}

/// `GET /api/v1/commands/active`: what still needs attention.
pub(crate) async fn active(
    State(state): State<AppState>,
    _auth: OperatorAuth,
    Query(q): Query<CommandFilter>,
) -> Result<Json<Vec<CommandView>>, ApiError> {
    let rows = commands::active(&state.pool, q.agent).await?;
    Ok(Json(rows.into_iter().map(CommandView::from).collect()))
}

/// `GET /api/v1/commands/recent`: latest commands regardless of status.
pub(crate) async fn recent(
    State(state): State<AppState>,
    _auth: OperatorAuth,
    Query(q): Query<CommandFilter>,
) -> Result<Json<Vec<CommandView>>, ApiError> {
    let limit = q.limit.unwrap_or(50).clamp(1, 500);
    let rows = commands::recent(&state.pool, q.agent, limit).await?;
    Ok(Json(rows.into_iter().map(CommandView::from).collect()))
}

/// `GET /api/v1/commands/{id}`: one command with its retry lineage.
pub(crate) async fn detail(
    State(state): State<AppState>,
    _auth: OperatorAuth,
    Path(id): Path<Uuid>,
) -> Result<Json<JsonValue>, ApiError> {
    let chain = commands::lineage(&state.pool, id).await?;
    if chain.is_empty() {
        return Err(ApiError::NotFound("command"));
    }
    let command = CommandView::from(chain[0].clone());
    let lineage: Vec<CommandView> = chain.into_iter().skip(1).map(CommandView::from).collect();
    Ok(Json(json!({
        "command": command,
        "retry_depth": lineage.len(),
        "lineage": lineage,
    })))
}

/// `POST /api/v1/commands/{id}/retry`: spawn a retry child.
pub(crate) async fn retry(
    State(state): State<AppState>,
    auth: OperatorAuth,
    Path(id): Path<Uuid>,
) -> Result<Json<CommandView>, ApiError> {
    auth.ensure_write()?;
    let child = commands::retry(&state.pool, id).await?;
    Ok(Json(child.into()))
}

/// `POST /api/v1/commands/{id}/cancel`: cancel before execution.
pub(crate) async fn cancel(
    State(state): State<AppState>,
    auth: OperatorAuth,
    Path(id): Path<Uuid>,
) -> Result<Json<CommandView>, ApiError> {
    auth.ensure_write()?;
    let cmd = commands::cancel(&state.pool, id).await?;
    Ok(Json(cmd.into()))
}

/// `DELETE /api/v1/commands/failed`: archival sweep.
pub(crate) async fn archive_failed(
    State(state): State<AppState>,
    auth: OperatorAuth,
    Query(req): Query<ArchiveFailedRequest>,
) -> Result<Json<JsonValue>, ApiError> {
    auth.ensure_admin()?;
    let archived = commands::archive_failed(
        &state.pool,
        Duration::days(i64::from(req.older_than_days)),
        req.scope,
    )
    .await?;
    log::info!(
        "operator {} archived {} failed commands",
        auth.operator_id,
        archived
    );
    Ok(Json(json!({ "archived": archived })))
}
