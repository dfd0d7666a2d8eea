//! TOML configuration fragments.

use serde::{Deserialize, Serialize};

/// Top-level configuration stanza.
#[derive(Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub(crate) struct ConfigFragment {
    /// HTTP server configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) server: Option<ServerFragment>,
    /// Database connection configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) database: Option<DatabaseFragment>,
    /// Credential issuance configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) auth: Option<AuthFragment>,
    /// Enrollment-token policy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) enrollment: Option<EnrollmentFragment>,
    /// Fleet polling and liveness configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) fleet: Option<FleetFragment>,
}

/// Config fragment for the HTTP server.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq)]
pub(crate) struct ServerFragment {
    /// Bind host (default: 0.0.0.0).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) host: Option<String>,
    /// Bind port (default: 8080).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) port: Option<u16>,
}

/// Config fragment for the Postgres connection.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq)]
pub(crate) struct DatabaseFragment {
    /// Full connection URL; overrides the component fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) password: Option<String>,
}

/// Config fragment for credential issuance.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq)]
pub(crate) struct AuthFragment {
    /// HMAC secret for access-credential signing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) signing_secret: Option<String>,
    /// Bootstrap admin username, created at startup if missing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) admin_username: Option<String>,
    /// Bootstrap admin password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) admin_password: Option<String>,
}

/// Config fragment for enrollment-token policy.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq)]
pub(crate) struct EnrollmentFragment {
    /// Default token lifetime, in hours.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) ttl_hours: Option<u32>,
    /// Cap on simultaneously active tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) token_cap: Option<u32>,
    /// Cap on seats per token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) seat_cap: Option<u32>,
}

/// Config fragment for fleet polling and liveness.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq)]
pub(crate) struct FleetFragment {
    /// Nominal agent check-in interval, in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) check_in_interval_secs: Option<u64>,
    /// Rapid interval while a heartbeat window is active, in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) heartbeat_interval_secs: Option<u64>,
    /// Minutes without a check-in before a host is marked offline.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) offline_threshold_minutes: Option<u32>,
    /// Days of update-event retention.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) event_retention_days: Option<u32>,
    /// Display time zone for operator-facing timestamps.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) timezone: Option<String>,
    /// Latest released agent version, advertised to operators.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) latest_agent_version: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_dist_config_sample() {
        let content = std::fs::read_to_string("tests/fixtures/00-config-sample.toml").unwrap();
        let cfg: ConfigFragment = toml::from_str(&content).unwrap();

        let expected = ConfigFragment {
            server: Some(ServerFragment {
                host: Some("127.0.0.1".to_string()),
                port: Some(8443),
            }),
            database: Some(DatabaseFragment {
                url: None,
                host: Some("db.internal".to_string()),
                port: Some(5432),
                name: Some("redflag".to_string()),
                user: Some("redflag".to_string()),
                password: Some("hunter2".to_string()),
            }),
            auth: Some(AuthFragment {
                signing_secret: Some("0123456789abcdef0123456789abcdef".to_string()),
                admin_username: Some("admin".to_string()),
                admin_password: None,
            }),
            enrollment: Some(EnrollmentFragment {
                ttl_hours: Some(48),
                token_cap: Some(64),
                seat_cap: Some(16),
            }),
            fleet: Some(FleetFragment {
                check_in_interval_secs: Some(120),
                heartbeat_interval_secs: None,
                offline_threshold_minutes: Some(10),
                event_retention_days: Some(30),
                timezone: Some("Europe/Berlin".to_string()),
                latest_agent_version: None,
            }),
        };

        assert_eq!(cfg, expected);
    }

    #[test]
    fn empty_fragment() {
        let cfg: ConfigFragment = toml::from_str("").unwrap();
        assert_eq!(cfg, ConfigFragment::default());
    }
}
