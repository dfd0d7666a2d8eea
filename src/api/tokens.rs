//! Enrollment-token administration. Admin-only.

use super::error::ApiError;
use super::extract::OperatorAuth;
use super::AppState;
use crate::enrollment::{self, MintParams};
use crate::proto::{MintTokenRequest, MintTokenResponse, TokenView};
use axum::extract::{Path, State};
use axum::Json;
use chrono::Duration;
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

/// Characters of the secret shown in listings.
const SECRET_PREFIX_LEN: usize = 8;

fn view(token: &enrollment::EnrollmentToken) -> TokenView {
    TokenView {
        id: token.id,
        secret_prefix: token.secret.chars().take(SECRET_PREFIX_LEN).collect(),
        label: token.label.clone(),
        status: token.status,
        max_seats: token.max_seats,
        seats_used: token.seats_used,
        created_by: token.created_by.clone(),
        created_at: token.created_at,
        expires_at: token.expires_at,
    }
}

/// `POST /api/v1/admin/registration-tokens`: mint.
pub(crate) async fn mint(
    State(state): State<AppState>,
    auth: OperatorAuth,
    Json(req): Json<MintTokenRequest>,
) -> Result<Json<MintTokenResponse>, ApiError> {
    auth.ensure_admin()?;

    let ttl = req
        .ttl_hours
        .map(|h| Duration::hours(i64::from(h)))
        .unwrap_or(state.settings.enrollment_ttl);
    let params = MintParams {
        label: req.label,
        ttl,
        max_seats: req.max_seats.unwrap_or(1) as i32,
        created_by: auth.operator_id.to_string(),
        metadata: serde_json::to_value(&req.metadata).unwrap_or_else(|_| json!({})),
    };

    let token = enrollment::mint(
        &state.pool,
        params,
        state.settings.token_cap,
        state.settings.seat_cap,
    )
    .await?;

    Ok(Json(MintTokenResponse {
        token: token.secret.clone(),
        view: view(&token),
    }))
}

/// `GET /api/v1/admin/registration-tokens`: list (secrets redacted).
pub(crate) async fn list(
    State(state): State<AppState>,
    auth: OperatorAuth,
) -> Result<Json<Vec<TokenView>>, ApiError> {
    auth.ensure_admin()?;
    let tokens = enrollment::list(&state.pool).await?;
    Ok(Json(tokens.iter().map(view).collect()))
}

/// `POST /api/v1/admin/registration-tokens/{id}/revoke`: terminal revoke.
pub(crate) async fn revoke(
    State(state): State<AppState>,
    auth: OperatorAuth,
    Path(id): Path<Uuid>,
) -> Result<Json<JsonValue>, ApiError> {
    auth.ensure_admin()?;
    let revoked = enrollment::revoke(&state.pool, id).await?;
    if !revoked {
        return Err(ApiError::NotFound("token"));
    }
    log::info!("enrollment token {} revoked by {}", id, auth.operator_id);
    Ok(Json(json!({ "revoked": true })))
}

/// `DELETE /api/v1/admin/registration-tokens/{id}`: remove outright.
pub(crate) async fn remove(
    State(state): State<AppState>,
    auth: OperatorAuth,
    Path(id): Path<Uuid>,
) -> Result<Json<JsonValue>, ApiError> {
    auth.ensure_admin()?;
    let deleted = enrollment::delete(&state.pool, id).await?;
    if !deleted {
        return Err(ApiError::NotFound("token"));
    }
    Ok(Json(json!({ "deleted": true })))
}
