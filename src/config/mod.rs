//! Configuration parsing and validation.
//!
//! This module contains the following logical entities:
//!  * Fragments: TOML configuration entries.
//!  * Inputs: configuration fragment merged with environment overrides,
//!    but not yet validated.
//!  * Settings: validated settings for the coordinator.

/// TOML structures.
mod fragments;

/// Configuration inputs.
pub(crate) mod inputs;

use anyhow::{Context, Result};
use chrono::Duration;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Default location of the coordinator config file.
pub(crate) static DEFAULT_CONFIG_PATH: &str = "/etc/redflag/config.toml";

/// Runtime configuration for the coordinator.
///
/// It holds validated coordinator settings.
#[derive(Clone, Debug)]
pub(crate) struct Settings {
    /// Address the HTTP server binds to.
    pub(crate) bind_addr: SocketAddr,
    /// Postgres connection URL.
    pub(crate) database_url: String,
    /// Process-wide HMAC secret for access-credential signing.
    pub(crate) signing_secret: String,
    /// Bootstrap admin account, ensured at startup when configured.
    pub(crate) bootstrap_admin: Option<(String, String)>,
    /// Default enrollment-token lifetime.
    pub(crate) enrollment_ttl: Duration,
    /// Cap on simultaneously active enrollment tokens.
    pub(crate) token_cap: u32,
    /// Cap on seats per enrollment token.
    pub(crate) seat_cap: u32,
    /// Nominal agent check-in interval, in seconds.
    pub(crate) check_in_interval_secs: u64,
    /// Rapid interval while a heartbeat window is active, in seconds.
    pub(crate) heartbeat_interval_secs: u64,
    /// Silence window after which a host is marked offline.
    pub(crate) offline_threshold: Duration,
    /// Update-event retention window.
    pub(crate) event_retention: Duration,
    /// Display time zone for operator-facing timestamps.
    pub(crate) timezone: String,
    /// Latest released agent version, advertised to operators.
    pub(crate) latest_agent_version: String,
}

impl Settings {
    /// Assemble runtime settings from the default config location.
    pub(crate) fn assemble() -> Result<Self> {
        Self::assemble_from(Some(&PathBuf::from(DEFAULT_CONFIG_PATH)))
    }

    /// Assemble runtime settings from an explicit config path.
    pub(crate) fn assemble_from(path: Option<&Path>) -> Result<Self> {
        let cfg = inputs::ConfigInput::read_config(path.map(Path::new))?;
        Self::validate(cfg)
    }

    /// Validate config and return valid coordinator settings.
    fn validate(cfg: inputs::ConfigInput) -> Result<Self> {
        let bind_addr: SocketAddr = format!("{}:{}", cfg.server.host, cfg.server.port)
            .parse()
            .with_context(|| {
                format!("invalid bind address '{}:{}'", cfg.server.host, cfg.server.port)
            })?;

        let database_url = match cfg.database.url {
            Some(url) => url,
            None => format!(
                "postgres://{}:{}@{}:{}/{}",
                cfg.database.user,
                cfg.database.password,
                cfg.database.host,
                cfg.database.port,
                cfg.database.name
            ),
        };

        let signing_secret = cfg
            .auth
            .signing_secret
            .filter(|s| !s.is_empty())
            .context("missing signing secret (auth.signing_secret or REDFLAG_SIGNING_SECRET)")?;
        if signing_secret.len() < 32 {
            anyhow::bail!("signing secret too short, need at least 32 bytes");
        }

        let bootstrap_admin = match (cfg.auth.admin_username, cfg.auth.admin_password) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => Some((user, pass)),
            _ => None,
        };

        if cfg.enrollment.seat_cap == 0 {
            anyhow::bail!("enrollment seat cap must be at least 1");
        }
        if cfg.fleet.check_in_interval_secs == 0 {
            anyhow::bail!("check-in interval must be non-zero");
        }

        Ok(Self {
            bind_addr,
            database_url,
            signing_secret,
            bootstrap_admin,
            enrollment_ttl: Duration::hours(i64::from(cfg.enrollment.ttl_hours)),
            token_cap: cfg.enrollment.token_cap,
            seat_cap: cfg.enrollment.seat_cap,
            check_in_interval_secs: cfg.fleet.check_in_interval_secs,
            heartbeat_interval_secs: cfg.fleet.heartbeat_interval_secs,
            offline_threshold: Duration::minutes(i64::from(
                cfg.fleet.offline_threshold_minutes,
            )),
            event_retention: Duration::days(i64::from(cfg.fleet.event_retention_days)),
            timezone: cfg.fleet.timezone,
            latest_agent_version: cfg.fleet.latest_agent_version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_input() -> inputs::ConfigInput {
        std::env::remove_var("REDFLAG_SIGNING_SECRET");
        let mut input = inputs::ConfigInput::merge_env(Default::default());
        input.auth.signing_secret = Some("0123456789abcdef0123456789abcdef".to_string());
        input
    }

    #[test]
    fn test_validate_minimal() {
        let settings = Settings::validate(minimal_input()).unwrap();
        assert_eq!(settings.bind_addr.port(), 8080);
        assert_eq!(settings.check_in_interval_secs, 300);
        assert_eq!(settings.offline_threshold, Duration::minutes(15));
        assert!(settings.database_url.starts_with("postgres://"));
    }

    #[test]
    fn test_missing_signing_secret() {
        let mut input = minimal_input();
        input.auth.signing_secret = None;
        assert!(Settings::validate(input).is_err());
    }

    #[test]
    fn test_short_signing_secret() {
        let mut input = minimal_input();
        input.auth.signing_secret = Some("short".to_string());
        assert!(Settings::validate(input).is_err());
    }

    #[test]
    fn test_database_url_override() {
        let mut input = minimal_input();
        input.database.url = Some("postgres://u:p@example:5433/db".to_string());
        let settings = Settings::validate(input).unwrap();
        assert_eq!(settings.database_url, "postgres://u:p@example:5433/db");
    }
}
