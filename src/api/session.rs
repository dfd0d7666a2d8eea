//! Operator login.

use super::error::ApiError;
use super::AppState;
use crate::auth::password;
use crate::proto::{LoginRequest, LoginResponse};
use crate::store::operators;
use axum::extract::State;
use axum::Json;

/// `POST /api/v1/auth/login`: verify credentials, issue an operator
/// access credential. Failures are undifferentiated.
pub(crate) async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let operator = operators::find_by_username(&state.pool, &req.username)
        .await?
        .ok_or_else(|| {
            log::debug!("login attempt for unknown operator '{}'", req.username);
            ApiError::Auth
        })?;

    if !password::verify(&req.password, &operator.password_hash) {
        log::debug!("bad password for operator '{}'", req.username);
        return Err(ApiError::Auth);
    }

    operators::touch_login(&state.pool, operator.id).await?;
    let token = state.signer.sign_operator(operator.id, operator.role)?;

    Ok(Json(LoginResponse {
        token,
        role: operator.role,
        expires_in: crate::auth::ACCESS_TOKEN_TTL.num_seconds() as u64,
    }))
}
