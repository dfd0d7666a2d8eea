//! Interface to `apt-get` / `apt list`.

use super::{run_command, DryRunReport, RunOutput};
use crate::proto::{DiscoveryItem, PackageType, Severity};
use anyhow::{bail, Result};

/// Debian/Ubuntu package manager.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Apt;

impl Apt {
    pub(crate) async fn is_available(&self) -> bool {
        super::probe("apt-get", &["--version"]).await || super::probe("apt", &["list", "-qq"]).await
    }

    /// Refresh indices and list upgradable packages.
    pub(crate) async fn scan(&self) -> Result<Vec<DiscoveryItem>> {
        let refresh = run_command("apt-get", &["update", "-qq"]).await?;
        if !refresh.success() {
            log::warn!("apt-get update failed: {}", refresh.stderr.trim());
        }

        let listing = run_command("apt", &["list", "--upgradable", "-qq"]).await?;
        if !listing.success() {
            bail!("apt list failed:\n{}", listing.stderr);
        }
        Ok(parse_upgradable(&listing.stdout))
    }

    /// `apt-get install --dry-run`, dependencies parsed from `Inst` lines.
    pub(crate) async fn dry_run(&self, name: &str) -> Result<DryRunReport> {
        let out = run_command("apt-get", &["install", "--dry-run", name]).await?;
        if !out.success() {
            bail!("apt-get dry-run failed:\n{}", out.stderr);
        }
        Ok(DryRunReport {
            dependencies: parse_dry_run_dependencies(&out.stdout, name),
            output: out.stdout,
        })
    }

    pub(crate) async fn install(&self, name: &str) -> Result<RunOutput> {
        run_command("apt-get", &["install", "-y", name]).await
    }

    pub(crate) async fn install_multiple(&self, names: &[String]) -> Result<RunOutput> {
        let mut args = vec!["install", "-y"];
        args.extend(names.iter().map(|n| n.as_str()));
        run_command("apt-get", &args).await
    }

    pub(crate) async fn upgrade(&self) -> Result<RunOutput> {
        run_command("apt-get", &["upgrade", "-y"]).await
    }

    /// Downgrade-install a pinned version.
    pub(crate) async fn rollback(&self, name: &str, version: &str) -> Result<RunOutput> {
        let pin = format!("{}={}", name, version);
        run_command("apt-get", &["install", "-y", "--allow-downgrades", &pin]).await
    }
}

/// Parse `apt list --upgradable` output.
///
/// Line shape: `curl/stable-security 7.88.1-1 amd64 [upgradable from: 7.88.0-1]`.
fn parse_upgradable(stdout: &str) -> Vec<DiscoveryItem> {
    let mut items = Vec::new();
    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("Listing") {
            continue;
        }

        let mut fields = line.split_whitespace();
        let (name, source) = match fields.next().and_then(|f| f.split_once('/')) {
            Some(pair) => pair,
            None => continue,
        };
        let available = match fields.next() {
            Some(v) => v,
            None => continue,
        };
        let current = line
            .split_once("[upgradable from: ")
            .map(|(_, rest)| rest.trim_end_matches(']').to_string())
            .unwrap_or_default();

        items.push(DiscoveryItem {
            package_type: PackageType::Apt,
            package_name: name.to_string(),
            current_version: current,
            available_version: available.to_string(),
            severity: severity_for_source(source),
            source: source.to_string(),
            metadata: Default::default(),
        });
    }
    items
}

/// Security pockets outrank ordinary archive updates.
fn severity_for_source(source: &str) -> Severity {
    if source.contains("security") {
        Severity::Important
    } else {
        Severity::Moderate
    }
}

/// Dependencies are the `Inst` lines other than the target itself.
fn parse_dry_run_dependencies(stdout: &str, target: &str) -> Vec<String> {
    stdout
        .lines()
        .filter_map(|line| line.strip_prefix("Inst "))
        .filter_map(|rest| rest.split_whitespace().next())
        .filter(|name| *name != target)
        .map(|name| name.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    static UPGRADABLE: &str = "\
Listing... Done
curl/stable-security 7.88.1-1 amd64 [upgradable from: 7.88.0-1]
vim/stable 2:9.0.1378-2 amd64 [upgradable from: 2:9.0.1000-1]
";

    #[test]
    fn test_parse_upgradable() {
        let items = parse_upgradable(UPGRADABLE);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].package_name, "curl");
        assert_eq!(items[0].available_version, "7.88.1-1");
        assert_eq!(items[0].current_version, "7.88.0-1");
        assert_eq!(items[0].severity, Severity::Important);
        assert_eq!(items[1].package_name, "vim");
        assert_eq!(items[1].severity, Severity::Moderate);
    }

    #[test]
    fn test_parse_upgradable_empty() {
        assert!(parse_upgradable("Listing... Done\n").is_empty());
        assert!(parse_upgradable("").is_empty());
    }

    #[test]
    fn test_parse_dry_run_dependencies() {
        let out = "\
NOTE: This is only a simulation!
Inst libcurl4 (7.88.1-1 Debian:12/stable [amd64])
Inst curl (7.88.1-1 Debian:12/stable [amd64])
Conf libcurl4 (7.88.1-1 Debian:12/stable [amd64])
Conf curl (7.88.1-1 Debian:12/stable [amd64])
";
        let deps = parse_dry_run_dependencies(out, "curl");
        assert_eq!(deps, vec!["libcurl4".to_string()]);
    }
}
