//! Interface to `dnf`.

use super::{run_command, DryRunReport, RunOutput};
use crate::proto::{DiscoveryItem, PackageType, Severity};
use anyhow::{bail, Result};
use std::collections::HashMap;

/// Exit code dnf uses for "updates are available".
const CHECK_UPDATE_AVAILABLE: i32 = 100;

/// Fedora/RHEL package manager.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Dnf;

impl Dnf {
    pub(crate) async fn is_available(&self) -> bool {
        super::probe("dnf", &["--version"]).await
    }

    /// `dnf check-update` plus a security classification pass.
    pub(crate) async fn scan(&self) -> Result<Vec<DiscoveryItem>> {
        let out = run_command("dnf", &["check-update", "-q", "--refresh"]).await?;
        // 0 = nothing pending, 100 = updates listed on stdout.
        match out.exit_code {
            Some(0) => return Ok(Vec::new()),
            Some(CHECK_UPDATE_AVAILABLE) => {}
            _ => bail!("dnf check-update failed:\n{}", out.stderr),
        }

        let mut items = parse_check_update(&out.stdout);

        // Best effort: mark security updates. A failure here downgrades
        // classification, not the scan.
        match run_command("dnf", &["updateinfo", "list", "--security", "-q"]).await {
            Ok(sec) if sec.success() => {
                let security = parse_security_names(&sec.stdout);
                for item in &mut items {
                    if let Some(sev) = security.get(&item.package_name) {
                        item.severity = *sev;
                    }
                }
            }
            Ok(sec) => log::debug!("dnf updateinfo unavailable: {}", sec.stderr.trim()),
            Err(e) => log::debug!("dnf updateinfo skipped: {}", e),
        }

        Ok(items)
    }

    /// `dnf install --assumeno`, dependencies parsed from the transaction
    /// summary table.
    pub(crate) async fn dry_run(&self, name: &str) -> Result<DryRunReport> {
        let out = run_command("dnf", &["install", "--assumeno", name]).await?;
        // --assumeno answers "no" at the prompt, so a resolvable
        // transaction still exits non-zero; resolution failures write to
        // stderr instead.
        if out.stdout.trim().is_empty() && !out.stderr.trim().is_empty() {
            bail!("dnf dependency resolution failed:\n{}", out.stderr);
        }
        Ok(DryRunReport {
            dependencies: parse_transaction_dependencies(&out.stdout, name),
            output: out.stdout,
        })
    }

    pub(crate) async fn install(&self, name: &str) -> Result<RunOutput> {
        run_command("dnf", &["install", "-y", name]).await
    }

    pub(crate) async fn install_multiple(&self, names: &[String]) -> Result<RunOutput> {
        let mut args = vec!["install", "-y"];
        args.extend(names.iter().map(|n| n.as_str()));
        run_command("dnf", &args).await
    }

    pub(crate) async fn upgrade(&self) -> Result<RunOutput> {
        run_command("dnf", &["upgrade", "-y"]).await
    }

    pub(crate) async fn rollback(&self, name: &str, version: &str) -> Result<RunOutput> {
        let pin = format!("{}-{}", name, version);
        run_command("dnf", &["downgrade", "-y", &pin]).await
    }
}

/// Parse `dnf check-update` output.
///
/// Line shape: `curl.x86_64   8.2.1-1.fc38   updates`.
fn parse_check_update(stdout: &str) -> Vec<DiscoveryItem> {
    let mut items = Vec::new();
    for line in stdout.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 3 {
            // Obsoleting-package continuation lines and blanks.
            continue;
        }
        let name = fields[0].rsplit_once('.').map(|(n, _arch)| n).unwrap_or(fields[0]);
        items.push(DiscoveryItem {
            package_type: PackageType::Dnf,
            package_name: name.to_string(),
            current_version: String::new(),
            available_version: fields[1].to_string(),
            severity: Severity::Moderate,
            source: fields[2].to_string(),
            metadata: Default::default(),
        });
    }
    items
}

/// Parse `dnf updateinfo list --security` into name → severity.
///
/// Line shape: `FEDORA-2023-1 Important/Sec. curl-8.2.1-1.fc38.x86_64`.
fn parse_security_names(stdout: &str) -> HashMap<String, Severity> {
    let mut out = HashMap::new();
    for line in stdout.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 {
            continue;
        }
        let severity = match fields[1].split('/').next().unwrap_or_default() {
            "Critical" => Severity::Critical,
            "Important" => Severity::Important,
            "Moderate" => Severity::Moderate,
            "Low" => Severity::Low,
            _ => continue,
        };
        if let Some(name) = nvra_name(fields[2]) {
            out.insert(name, severity);
        }
    }
    out
}

/// Strip version-release-arch from an NVRA string.
///
/// Version and release are the last two dash-separated segments.
fn nvra_name(nvra: &str) -> Option<String> {
    let (rest, _release_arch) = nvra.rsplit_once('-')?;
    let (name, _version) = rest.rsplit_once('-')?;
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Dependencies from the `Installing dependencies:` section of a dnf
/// transaction summary.
fn parse_transaction_dependencies(stdout: &str, target: &str) -> Vec<String> {
    let mut deps = Vec::new();
    let mut in_deps = false;
    for line in stdout.lines() {
        if line.starts_with("Installing dependencies:") || line.starts_with("Upgrading:") {
            in_deps = true;
            continue;
        }
        if in_deps {
            if !line.starts_with(' ') {
                in_deps = false;
                continue;
            }
            if let Some(name) = line.split_whitespace().next() {
                if name != target {
                    deps.push(name.to_string());
                }
            }
        }
    }
    deps.dedup();
    deps
}

#[cfg(test)]
mod tests {
    use super::*;

    static CHECK_UPDATE: &str = "\
curl.x86_64    8.2.1-1.fc38    updates
libcurl.x86_64    8.2.1-1.fc38    updates
";

    #[test]
    fn test_parse_check_update() {
        let items = parse_check_update(CHECK_UPDATE);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].package_name, "curl");
        assert_eq!(items[0].available_version, "8.2.1-1.fc38");
        assert_eq!(items[0].source, "updates");
    }

    #[test]
    fn test_parse_security_names() {
        let out = "\
FEDORA-2023-abc  Important/Sec.  curl-8.2.1-1.fc38.x86_64
FEDORA-2023-def  Critical/Sec.   openssl-3.0.9-2.fc38.x86_64
";
        let map = parse_security_names(out);
        assert_eq!(map.get("curl"), Some(&Severity::Important));
        assert_eq!(map.get("openssl"), Some(&Severity::Critical));
    }

    #[test]
    fn test_nvra_name() {
        assert_eq!(nvra_name("curl-8.2.1-1.fc38.x86_64"), Some("curl".to_string()));
        assert_eq!(
            nvra_name("java-17-openjdk-17.0.8-1.fc38.x86_64"),
            Some("java-17-openjdk".to_string())
        );
        assert_eq!(nvra_name("noversion"), None);
    }

    #[test]
    fn test_parse_transaction_dependencies() {
        let out = "\
Dependencies resolved.
================================================================================
 Package          Architecture  Version           Repository      Size
================================================================================
Installing:
 curl             x86_64        8.2.1-1.fc38      updates         300 k
Installing dependencies:
 libcurl          x86_64        8.2.1-1.fc38      updates         280 k
 libssh           x86_64        0.10.5-1.fc38     updates         210 k
Transaction Summary
================================================================================
";
        let deps = parse_transaction_dependencies(out, "curl");
        assert_eq!(deps, vec!["libcurl".to_string(), "libssh".to_string()]);
    }
}
