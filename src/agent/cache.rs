//! Local agent cache.
//!
//! Backs the offline CLI modes (`--status`, `--list-updates`, `--export`)
//! so operators can inspect a host without the coordinator being
//! reachable. Losing the cache costs nothing but a rescan.

use crate::proto::DiscoveryItem;
use anyhow::{Context, Result};
use cfg_if::cfg_if;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default cache location on Unix hosts.
#[cfg(unix)]
static DEFAULT_CACHE_PATH: &str = "/var/lib/redflag/cache.json";

/// Cached agent state.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub(crate) struct AgentCache {
    #[serde(default)]
    pub(crate) last_scan_results: Vec<DiscoveryItem>,
    pub(crate) last_check_in: Option<DateTime<Utc>>,
    pub(crate) last_scan_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub(crate) agent_status: String,
}

/// Resolve the default cache path for this OS.
pub(crate) fn default_path() -> PathBuf {
    cfg_if! {
        if #[cfg(unix)] {
            PathBuf::from(DEFAULT_CACHE_PATH)
        } else {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("redflag")
                .join("cache.json")
        }
    }
}

impl AgentCache {
    /// Load the cache, falling back to an empty one.
    pub(crate) fn load_or_default(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                log::warn!("corrupt agent cache, starting fresh: {}", e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Persist the cache.
    pub(crate) fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create '{}'", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("failed to write agent cache '{}'", path.display()))?;
        Ok(())
    }

    /// Record a finished scan.
    pub(crate) fn record_scan(&mut self, results: Vec<DiscoveryItem>) {
        self.last_scan_results = results;
        self.last_scan_time = Some(Utc::now());
    }

    /// Record a successful check-in.
    pub(crate) fn record_check_in(&mut self) {
        self.last_check_in = Some(Utc::now());
        self.agent_status = "online".to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{PackageType, Severity};

    #[test]
    fn test_missing_cache_is_default() {
        let cache = AgentCache::load_or_default(Path::new("/nonexistent/cache.json"));
        assert!(cache.last_scan_results.is_empty());
        assert!(cache.last_check_in.is_none());
    }

    #[test]
    fn test_corrupt_cache_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, "{not json").unwrap();
        let cache = AgentCache::load_or_default(&path);
        assert!(cache.last_scan_results.is_empty());
    }

    #[test]
    fn test_roundtrip_with_scan() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let mut cache = AgentCache::default();
        cache.record_scan(vec![DiscoveryItem {
            package_type: PackageType::Apt,
            package_name: "curl".to_string(),
            current_version: "7.88".to_string(),
            available_version: "7.88.1".to_string(),
            severity: Severity::Important,
            source: "stable-security".to_string(),
            metadata: Default::default(),
        }]);
        cache.record_check_in();
        cache.save(&path).unwrap();

        let loaded = AgentCache::load_or_default(&path);
        assert_eq!(loaded.last_scan_results.len(), 1);
        assert_eq!(loaded.last_scan_results[0].package_name, "curl");
        assert!(loaded.last_scan_time.is_some());
        assert_eq!(loaded.agent_status, "online");
    }
}
