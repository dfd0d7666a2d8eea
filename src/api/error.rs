//! API error taxonomy.
//!
//! Every credential failure collapses to a single opaque 401 so callers
//! cannot enumerate tokens or hosts; the distinguishing detail goes to the
//! internal log at the point of failure. Other classes carry a
//! machine-readable code and a human message.

use crate::auth::CredentialError;
use crate::enrollment::{refresh::RenewError, ConsumeError, MintError};
use crate::proto::ErrorBody;
use crate::store::commands::QueueError;
use crate::store::events::TransitionError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use prometheus::IntCounterVec;

lazy_static::lazy_static! {
    static ref API_ERRORS: IntCounterVec = register_int_counter_vec!(
        "redflag_api_errors_total",
        "Total number of error responses, by class.",
        &["class"]
    ).unwrap();
}

/// Failure surfaced to an HTTP caller.
#[derive(Debug, thiserror::Error)]
pub(crate) enum ApiError {
    /// Invalid/expired credential, revoked enrollment, seats exhausted.
    #[error("unauthorized")]
    Auth,
    /// Missing field, unknown label, bad state transition input.
    #[error("{message}")]
    Validation {
        code: &'static str,
        message: String,
    },
    /// Unknown host, command, or package.
    #[error("{0} not found")]
    NotFound(&'static str),
    /// Concurrent state transition refused.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Configured limits tripped.
    #[error("rate limited")]
    RateLimited,
    /// Database unreachable or similar transient fault.
    #[error("service unavailable")]
    Unavailable,
    /// Anything else.
    #[error("internal error")]
    Internal(anyhow::Error),
}

impl ApiError {
    /// Validation failure with a machine-readable code.
    pub(crate) fn validation(code: &'static str, message: impl Into<String>) -> Self {
        ApiError::Validation {
            code,
            message: message.into(),
        }
    }

    fn class(&self) -> &'static str {
        match self {
            ApiError::Auth => "auth",
            ApiError::Validation { .. } => "validation",
            ApiError::NotFound(_) => "not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::RateLimited => "rate_limited",
            ApiError::Unavailable => "unavailable",
            ApiError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        API_ERRORS.with_label_values(&[self.class()]).inc();
        match self {
            // Opaque on purpose.
            ApiError::Auth => (
                StatusCode::UNAUTHORIZED,
                Json(ErrorBody {
                    code: "unauthorized".to_string(),
                    message: "unauthorized".to_string(),
                }),
            )
                .into_response(),
            ApiError::Validation { code, message } => (
                StatusCode::BAD_REQUEST,
                Json(ErrorBody {
                    code: code.to_string(),
                    message,
                }),
            )
                .into_response(),
            ApiError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                Json(ErrorBody {
                    code: "not_found".to_string(),
                    message: format!("{} not found", what),
                }),
            )
                .into_response(),
            ApiError::Conflict(message) => (
                StatusCode::CONFLICT,
                Json(ErrorBody {
                    code: "conflict".to_string(),
                    message,
                }),
            )
                .into_response(),
            ApiError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                Json(ErrorBody {
                    code: "rate_limited".to_string(),
                    message: "rate limited".to_string(),
                }),
            )
                .into_response(),
            ApiError::Unavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorBody {
                    code: "unavailable".to_string(),
                    message: "service temporarily unavailable".to_string(),
                }),
            )
                .into_response(),
            ApiError::Internal(err) => {
                log::error!("internal error: {:#}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorBody {
                        code: "internal".to_string(),
                        message: "internal error".to_string(),
                    }),
                )
                    .into_response()
            }
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<sqlx::Error>() {
            Some(sqlx::Error::PoolTimedOut) | Some(sqlx::Error::Io(_)) => ApiError::Unavailable,
            _ => ApiError::Internal(err),
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => ApiError::Unavailable,
            other => ApiError::Internal(other.into()),
        }
    }
}

impl From<CredentialError> for ApiError {
    fn from(err: CredentialError) -> Self {
        log::debug!("credential rejected: {}", err);
        ApiError::Auth
    }
}

impl From<ConsumeError> for ApiError {
    fn from(err: ConsumeError) -> Self {
        match err {
            ConsumeError::Database(e) => e.into(),
            // Already logged with its reason at the consume site.
            _ => ApiError::Auth,
        }
    }
}

impl From<RenewError> for ApiError {
    fn from(err: RenewError) -> Self {
        match err {
            RenewError::Database(e) => e.into(),
            RenewError::Rejected => ApiError::Auth,
        }
    }
}

impl From<MintError> for ApiError {
    fn from(err: MintError) -> Self {
        match err {
            MintError::Other(e) => e.into(),
            MintError::TokenCapReached(_) => ApiError::RateLimited,
            e @ MintError::SeatCapExceeded { .. } => {
                ApiError::validation("seat_cap", e.to_string())
            }
            e @ MintError::ZeroSeats => ApiError::validation("zero_seats", e.to_string()),
        }
    }
}

impl From<TransitionError> for ApiError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::NotFound => ApiError::NotFound("package"),
            TransitionError::Conflict { current } => {
                ApiError::Conflict(format!("package is '{}'", current))
            }
            TransitionError::Other(e) => e.into(),
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::NotFound => ApiError::NotFound("command"),
            QueueError::Conflict { current } => {
                ApiError::Conflict(format!("command is '{}'", current))
            }
            QueueError::Other(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_body_is_opaque() {
        let resp = ApiError::Auth.into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_transition_conflict_maps_to_409() {
        let err: ApiError = TransitionError::Conflict {
            current: crate::proto::PackageStatus::Updated,
        }
        .into();
        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_consume_errors_collapse_to_401() {
        for err in [
            ConsumeError::UnknownToken,
            ConsumeError::Expired,
            ConsumeError::Revoked,
            ConsumeError::SeatsExhausted,
        ] {
            let api: ApiError = err.into();
            assert_eq!(api.into_response().status(), StatusCode::UNAUTHORIZED);
        }
    }
}
