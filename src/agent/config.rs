//! Persisted agent configuration.
//!
//! One JSON file at an OS-appropriate path, written at registration and
//! owner-readable only: it carries the refresh secret.

use anyhow::{Context, Result};
use cfg_if::cfg_if;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;
use uuid::Uuid;

/// Default config location on Unix hosts.
#[cfg(unix)]
static DEFAULT_CONFIG_PATH: &str = "/etc/redflag/agent.json";

/// Agent configuration at rest.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub(crate) struct AgentConfig {
    pub(crate) server_url: Url,
    pub(crate) agent_id: Uuid,
    /// Last known access credential.
    pub(crate) token: String,
    /// Long-lived refresh secret.
    pub(crate) refresh_token: String,
    /// Nominal poll interval, in seconds.
    pub(crate) check_in_interval: u64,
}

/// Resolve the default config path for this OS.
pub(crate) fn default_path() -> PathBuf {
    cfg_if! {
        if #[cfg(unix)] {
            PathBuf::from(DEFAULT_CONFIG_PATH)
        } else {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("redflag")
                .join("agent.json")
        }
    }
}

impl AgentConfig {
    /// Load the config file.
    pub(crate) fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read agent config '{}'", path.display()))?;
        serde_json::from_str(&content).context("failed to parse agent config")
    }

    /// Persist the config with owner-only permissions.
    pub(crate) fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create '{}'", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("failed to write agent config '{}'", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .context("failed to restrict agent config permissions")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AgentConfig {
        AgentConfig {
            server_url: Url::parse("http://coordinator.internal:8080").unwrap(),
            agent_id: Uuid::nil(),
            token: "access".to_string(),
            refresh_token: "refresh".to_string(),
            check_in_interval: 300,
        }
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.json");
        sample().save(&path).unwrap();
        let loaded = AgentConfig::load(&path).unwrap();
        assert_eq!(loaded, sample());
    }

    #[cfg(unix)]
    #[test]
    fn test_save_restricts_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.json");
        sample().save(&path).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_load_missing_fails() {
        assert!(AgentConfig::load(Path::new("/nonexistent/agent.json")).is_err());
    }

    #[test]
    fn test_wire_field_names() {
        let json = serde_json::to_value(sample()).unwrap();
        for key in [
            "server_url",
            "agent_id",
            "token",
            "refresh_token",
            "check_in_interval",
        ] {
            assert!(json.get(key).is_some(), "missing key {}", key);
        }
    }
}
