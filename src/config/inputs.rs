//! Merged configuration inputs (file fragment + environment overrides).

use crate::config::fragments;
use anyhow::{Context, Result};
use fn_error_context::context;
use log::trace;
use std::path::Path;

/// Default nominal check-in interval (in seconds).
pub(crate) const DEFAULT_CHECK_IN_INTERVAL_SECS: u64 = 300; // 5 minutes.

/// Default rapid interval while a heartbeat window is active (in seconds).
pub(crate) const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 5;

/// Default enrollment-token lifetime (in hours).
pub(crate) const DEFAULT_ENROLLMENT_TTL_HOURS: u32 = 24;

/// Default offline threshold (in minutes).
pub(crate) const DEFAULT_OFFLINE_THRESHOLD_MINUTES: u32 = 15;

/// Default update-event retention (in days).
pub(crate) const DEFAULT_EVENT_RETENTION_DAYS: u32 = 90;

/// Runtime configuration holding environmental inputs.
#[derive(Debug)]
pub(crate) struct ConfigInput {
    pub(crate) server: ServerInput,
    pub(crate) database: DatabaseInput,
    pub(crate) auth: AuthInput,
    pub(crate) enrollment: EnrollmentInput,
    pub(crate) fleet: FleetInput,
}

impl ConfigInput {
    /// Read the optional config file and merge environment overrides.
    #[context("failed to read and merge configuration inputs")]
    pub(crate) fn read_config(path: Option<&Path>) -> Result<Self> {
        let fragment = match path {
            Some(fpath) if fpath.exists() => {
                trace!("reading config file '{}'", fpath.display());
                let content = std::fs::read_to_string(fpath)
                    .with_context(|| format!("failed to read file '{}'", fpath.display()))?;
                toml::from_str(&content).context("failed to parse TOML")?
            }
            Some(fpath) => {
                trace!("config file '{}' not present, using defaults", fpath.display());
                fragments::ConfigFragment::default()
            }
            None => fragments::ConfigFragment::default(),
        };

        Ok(Self::merge_env(fragment))
    }

    /// Overlay environment variables on top of a parsed fragment.
    pub(crate) fn merge_env(fragment: fragments::ConfigFragment) -> Self {
        let server = fragment.server.unwrap_or(fragments::ServerFragment {
            host: None,
            port: None,
        });
        let database = fragment.database.unwrap_or(fragments::DatabaseFragment {
            url: None,
            host: None,
            port: None,
            name: None,
            user: None,
            password: None,
        });
        let auth = fragment.auth.unwrap_or(fragments::AuthFragment {
            signing_secret: None,
            admin_username: None,
            admin_password: None,
        });
        let enrollment = fragment.enrollment.unwrap_or(fragments::EnrollmentFragment {
            ttl_hours: None,
            token_cap: None,
            seat_cap: None,
        });
        let fleet = fragment.fleet.unwrap_or(fragments::FleetFragment {
            check_in_interval_secs: None,
            heartbeat_interval_secs: None,
            offline_threshold_minutes: None,
            event_retention_days: None,
            timezone: None,
            latest_agent_version: None,
        });

        Self {
            server: ServerInput {
                host: env_str("REDFLAG_BIND_HOST")
                    .or(server.host)
                    .unwrap_or_else(|| "0.0.0.0".to_string()),
                port: env_parse("REDFLAG_BIND_PORT")
                    .or(server.port)
                    .unwrap_or(8080),
            },
            database: DatabaseInput {
                url: env_str("REDFLAG_DATABASE_URL").or(database.url),
                host: env_str("REDFLAG_DB_HOST")
                    .or(database.host)
                    .unwrap_or_else(|| "localhost".to_string()),
                port: env_parse("REDFLAG_DB_PORT").or(database.port).unwrap_or(5432),
                name: env_str("REDFLAG_DB_NAME")
                    .or(database.name)
                    .unwrap_or_else(|| "redflag".to_string()),
                user: env_str("REDFLAG_DB_USER")
                    .or(database.user)
                    .unwrap_or_else(|| "redflag".to_string()),
                password: env_str("REDFLAG_DB_PASSWORD")
                    .or(database.password)
                    .unwrap_or_default(),
            },
            auth: AuthInput {
                signing_secret: env_str("REDFLAG_SIGNING_SECRET").or(auth.signing_secret),
                admin_username: env_str("REDFLAG_ADMIN_USERNAME").or(auth.admin_username),
                admin_password: env_str("REDFLAG_ADMIN_PASSWORD").or(auth.admin_password),
            },
            enrollment: EnrollmentInput {
                ttl_hours: env_parse("REDFLAG_ENROLLMENT_TTL_HOURS")
                    .or(enrollment.ttl_hours)
                    .unwrap_or(DEFAULT_ENROLLMENT_TTL_HOURS),
                token_cap: env_parse("REDFLAG_TOKEN_CAP")
                    .or(enrollment.token_cap)
                    .unwrap_or(100),
                seat_cap: env_parse("REDFLAG_SEAT_CAP")
                    .or(enrollment.seat_cap)
                    .unwrap_or(50),
            },
            fleet: FleetInput {
                // Legacy variable name, kept for existing deployments.
                check_in_interval_secs: env_parse("REDFLAG_CHECK_IN_INTERVAL")
                    .or(fleet.check_in_interval_secs)
                    .unwrap_or(DEFAULT_CHECK_IN_INTERVAL_SECS),
                heartbeat_interval_secs: env_parse("REDFLAG_HEARTBEAT_INTERVAL_SECS")
                    .or(fleet.heartbeat_interval_secs)
                    .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_SECS),
                offline_threshold_minutes: env_parse("REDFLAG_OFFLINE_THRESHOLD_MINUTES")
                    .or(fleet.offline_threshold_minutes)
                    .unwrap_or(DEFAULT_OFFLINE_THRESHOLD_MINUTES),
                event_retention_days: env_parse("REDFLAG_EVENT_RETENTION_DAYS")
                    .or(fleet.event_retention_days)
                    .unwrap_or(DEFAULT_EVENT_RETENTION_DAYS),
                timezone: env_str("REDFLAG_TIMEZONE")
                    .or(fleet.timezone)
                    .unwrap_or_else(|| "UTC".to_string()),
                latest_agent_version: env_str("REDFLAG_LATEST_AGENT_VERSION")
                    .or(fleet.latest_agent_version)
                    .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()),
            },
        }
    }
}

/// Config input for the HTTP server.
#[derive(Debug)]
pub(crate) struct ServerInput {
    pub(crate) host: String,
    pub(crate) port: u16,
}

/// Config input for the Postgres connection.
#[derive(Debug)]
pub(crate) struct DatabaseInput {
    pub(crate) url: Option<String>,
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) name: String,
    pub(crate) user: String,
    pub(crate) password: String,
}

/// Config input for credential issuance.
#[derive(Debug)]
pub(crate) struct AuthInput {
    pub(crate) signing_secret: Option<String>,
    pub(crate) admin_username: Option<String>,
    pub(crate) admin_password: Option<String>,
}

/// Config input for enrollment-token policy.
#[derive(Debug)]
pub(crate) struct EnrollmentInput {
    pub(crate) ttl_hours: u32,
    pub(crate) token_cap: u32,
    pub(crate) seat_cap: u32,
}

/// Config input for fleet polling and liveness.
#[derive(Debug)]
pub(crate) struct FleetInput {
    pub(crate) check_in_interval_secs: u64,
    pub(crate) heartbeat_interval_secs: u64,
    pub(crate) offline_threshold_minutes: u32,
    pub(crate) event_retention_days: u32,
    pub(crate) timezone: String,
    pub(crate) latest_agent_version: String,
}

fn env_str(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_str(key).and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_from_empty_fragment() {
        let input = ConfigInput::merge_env(fragments::ConfigFragment::default());
        assert_eq!(input.server.port, 8080);
        assert_eq!(input.database.port, 5432);
        assert_eq!(
            input.fleet.check_in_interval_secs,
            DEFAULT_CHECK_IN_INTERVAL_SECS
        );
        assert_eq!(input.enrollment.ttl_hours, DEFAULT_ENROLLMENT_TTL_HOURS);
        assert!(input.auth.signing_secret.is_none());
    }
}
