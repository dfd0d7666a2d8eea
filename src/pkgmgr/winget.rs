//! Interface to `winget`.

use super::{run_command, DryRunReport, RunOutput};
use crate::proto::{DiscoveryItem, PackageType, Severity};
use anyhow::{bail, Result};

/// Windows package manager (winget CLI).
#[derive(Clone, Copy, Debug)]
pub(crate) struct Winget;

impl Winget {
    pub(crate) async fn is_available(&self) -> bool {
        cfg!(target_os = "windows") && super::probe("winget", &["--version"]).await
    }

    pub(crate) async fn scan(&self) -> Result<Vec<DiscoveryItem>> {
        let out = run_command(
            "winget",
            &[
                "upgrade",
                "--include-unknown",
                "--accept-source-agreements",
                "--disable-interactivity",
            ],
        )
        .await?;
        if !out.success() {
            bail!("winget upgrade listing failed:\n{}", out.stderr);
        }
        Ok(parse_upgrade_table(&out.stdout))
    }

    /// winget has no dependency-resolving dry-run; report the empty list
    /// rather than fabricating one.
    pub(crate) async fn dry_run(&self, name: &str) -> Result<DryRunReport> {
        let out = run_command(
            "winget",
            &["list", "--exact", "--id", name, "--accept-source-agreements"],
        )
        .await?;
        Ok(DryRunReport {
            dependencies: Vec::new(),
            output: out.stdout,
        })
    }

    pub(crate) async fn install(&self, name: &str) -> Result<RunOutput> {
        run_command(
            "winget",
            &[
                "upgrade",
                "--exact",
                "--id",
                name,
                "--silent",
                "--accept-source-agreements",
                "--accept-package-agreements",
                "--disable-interactivity",
            ],
        )
        .await
    }

    pub(crate) async fn install_multiple(&self, names: &[String]) -> Result<RunOutput> {
        // winget upgrades one id per invocation.
        let mut combined = RunOutput::default();
        for name in names {
            let out = self.install(name).await?;
            combined.stdout.push_str(&out.stdout);
            combined.stderr.push_str(&out.stderr);
            combined.exit_code = out.exit_code;
            if !out.success() {
                break;
            }
        }
        Ok(combined)
    }

    pub(crate) async fn upgrade(&self) -> Result<RunOutput> {
        run_command(
            "winget",
            &[
                "upgrade",
                "--all",
                "--silent",
                "--accept-source-agreements",
                "--accept-package-agreements",
                "--disable-interactivity",
            ],
        )
        .await
    }

    /// winget installs track latest; no downgrade surface to drive.
    pub(crate) async fn rollback(&self, name: &str, _version: &str) -> Result<RunOutput> {
        bail!("winget cannot roll back '{}': downgrades are unsupported", name)
    }
}

/// Parse the fixed-width `winget upgrade` table.
///
/// Columns: Name  Id  Version  Available  Source. Name may contain
/// spaces, so rows are split from the right.
fn parse_upgrade_table(stdout: &str) -> Vec<DiscoveryItem> {
    let mut items = Vec::new();
    let mut seen_header = false;
    for line in stdout.lines() {
        let trimmed = line.trim_end();
        if trimmed.starts_with('-') && trimmed.chars().all(|c| c == '-') {
            seen_header = true;
            continue;
        }
        if !seen_header || trimmed.is_empty() {
            continue;
        }

        let fields: Vec<&str> = trimmed.split_whitespace().collect();
        // Also drops footers like "2 upgrades available.".
        if fields.len() < 5 {
            continue;
        }
        let source = fields[fields.len() - 1];
        let available = fields[fields.len() - 2];
        let current = fields[fields.len() - 3];
        let id = fields[fields.len() - 4];

        items.push(DiscoveryItem {
            package_type: PackageType::Winget,
            package_name: id.to_string(),
            current_version: current.to_string(),
            available_version: available.to_string(),
            severity: Severity::Moderate,
            source: source.to_string(),
            metadata: maplit::hashmap! {
                "display_name".to_string() =>
                    serde_json::Value::String(fields[..fields.len() - 4].join(" ")),
            },
        });
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;

    static UPGRADE_TABLE: &str = "\
Name               Id                Version   Available  Source
------------------------------------------------------------------
Mozilla Firefox    Mozilla.Firefox   118.0     119.0.1    winget
7-Zip              7zip.7zip         22.01     23.01      winget
2 upgrades available.
";

    #[test]
    fn test_parse_upgrade_table() {
        let items = parse_upgrade_table(UPGRADE_TABLE);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].package_name, "Mozilla.Firefox");
        assert_eq!(items[0].current_version, "118.0");
        assert_eq!(items[0].available_version, "119.0.1");
        assert_eq!(
            items[0].metadata.get("display_name").and_then(|v| v.as_str()),
            Some("Mozilla Firefox")
        );
        assert_eq!(items[1].package_name, "7zip.7zip");
    }

    #[test]
    fn test_parse_upgrade_table_empty() {
        assert!(parse_upgrade_table("No installed package found.\n").is_empty());
    }
}
