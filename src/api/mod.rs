//! HTTP surface of the coordinator.
//!
//! Agents and operators share the `/api/v1` prefix; agents authenticate
//! with host credentials, operators with login-issued ones. Registration,
//! renewal, login, health, and metrics are the only unauthenticated
//! routes.

mod agents;
mod commands;
mod error;
mod extract;
mod session;
mod tokens;
mod updates;

pub(crate) use error::ApiError;

use crate::auth::TokenSigner;
use crate::config::Settings;
use axum::routing::{delete, get, post};
use axum::Router;
use sqlx::postgres::PgPool;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Shared state for all handlers.
#[derive(Clone, Debug)]
pub(crate) struct AppState {
    pub(crate) pool: PgPool,
    pub(crate) settings: Arc<Settings>,
    pub(crate) signer: TokenSigner,
}

impl AppState {
    /// Assemble shared state from validated settings.
    pub(crate) fn new(pool: PgPool, settings: Settings) -> Self {
        let signer = TokenSigner::new(&settings.signing_secret);
        Self {
            pool,
            settings: Arc::new(settings),
            signer,
        }
    }
}

/// Build the full router.
pub(crate) fn router(state: AppState) -> Router {
    let api = Router::new()
        // Operator session.
        .route("/auth/login", post(session::login))
        // Agent-facing dispatcher.
        .route("/agents/register", post(agents::register))
        .route("/agents/{id}/renew", post(agents::renew))
        .route(
            "/agents/{id}/commands",
            get(agents::check_in_get).post(agents::check_in),
        )
        .route(
            "/agents/{id}/commands/{cmd_id}/running",
            post(agents::command_running),
        )
        .route("/agents/{id}/updates", post(agents::report_updates))
        .route("/agents/{id}/logs", post(agents::report_log))
        .route("/agents/{id}/dependencies", post(agents::report_dependencies))
        .route("/agents/{id}/system-info", post(agents::report_system_info))
        // Operator host management.
        .route("/agents", get(agents::list))
        .route("/agents/scan", post(agents::trigger_scan_all))
        .route(
            "/agents/{id}",
            get(agents::detail).delete(agents::remove),
        )
        .route("/agents/{id}/scan", post(agents::trigger_scan))
        .route("/agents/{id}/heartbeat", post(agents::set_heartbeat))
        .route("/agents/{id}/history", get(agents::history))
        // Update inventory.
        .route("/updates", get(updates::list))
        .route("/updates/approve", post(updates::bulk_approve))
        .route("/updates/{id}/approve", post(updates::approve))
        .route("/updates/{id}/reject", post(updates::reject))
        .route("/updates/{id}/install", post(updates::install))
        .route(
            "/updates/{id}/confirm-dependencies",
            post(updates::confirm_dependencies),
        )
        // Command queue.
        .route("/commands/active", get(commands::active))
        .route("/commands/recent", get(commands::recent))
        .route("/commands/failed", delete(commands::archive_failed))
        .route("/commands/{id}", get(commands::detail))
        .route("/commands/{id}/retry", post(commands::retry))
        .route("/commands/{id}/cancel", post(commands::cancel))
        // Token administration.
        .route(
            "/admin/registration-tokens",
            get(tokens::list).post(tokens::mint),
        )
        .route("/admin/registration-tokens/{id}", delete(tokens::remove))
        .route("/admin/registration-tokens/{id}/revoke", post(tokens::revoke));

    Router::new()
        .nest("/api/v1", api)
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_text))
        // The web UI is served from its own origin.
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Liveness probe.
async fn healthz() -> &'static str {
    "ok"
}

/// Prometheus text exposition.
async fn metrics_text() -> Result<String, ApiError> {
    crate::metrics::render().map_err(ApiError::Internal)
}
