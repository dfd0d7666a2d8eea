//! Bearer-credential extractors.

use super::error::ApiError;
use super::AppState;
use crate::auth::Claims;
use crate::proto::OperatorRole;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

/// Pull the bearer token out of the Authorization header.
fn bearer(parts: &Parts) -> Result<&str, ApiError> {
    parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Auth)
}

/// A validated host-agent credential.
#[derive(Clone, Debug)]
pub(crate) struct AgentAuth {
    pub(crate) host_id: Uuid,
}

impl AgentAuth {
    /// Agents may only act on their own host resource.
    pub(crate) fn ensure_host(&self, host_id: Uuid) -> Result<(), ApiError> {
        if self.host_id == host_id {
            Ok(())
        } else {
            log::warn!(
                "agent credential for {} used against host {}",
                self.host_id,
                host_id
            );
            Err(ApiError::Auth)
        }
    }
}

impl FromRequestParts<AppState> for AgentAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let claims: Claims = state.signer.verify(bearer(parts)?)?;
        if !claims.is_agent() {
            log::debug!("non-agent credential on agent endpoint");
            return Err(ApiError::Auth);
        }
        Ok(AgentAuth {
            host_id: claims.sub,
        })
    }
}

/// A validated operator credential.
#[derive(Clone, Debug)]
pub(crate) struct OperatorAuth {
    pub(crate) operator_id: Uuid,
    pub(crate) role: OperatorRole,
}

impl OperatorAuth {
    /// Mutating endpoints are closed to readonly operators.
    pub(crate) fn ensure_write(&self) -> Result<(), ApiError> {
        match self.role {
            OperatorRole::Admin | OperatorRole::User => Ok(()),
            OperatorRole::Readonly => Err(ApiError::Auth),
        }
    }

    /// Token administration and host deletion are admin-only.
    pub(crate) fn ensure_admin(&self) -> Result<(), ApiError> {
        match self.role {
            OperatorRole::Admin => Ok(()),
            _ => Err(ApiError::Auth),
        }
    }
}

impl FromRequestParts<AppState> for OperatorAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let claims: Claims = state.signer.verify(bearer(parts)?)?;
        let role = match claims.operator_role() {
            Some(role) => role,
            None => {
                log::debug!("non-operator credential on operator endpoint");
                return Err(ApiError::Auth);
            }
        };
        Ok(OperatorAuth {
            operator_id: claims.sub,
            role,
        })
    }
}
