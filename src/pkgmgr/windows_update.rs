//! Interface to Windows Update via PowerShell's COM automation API.
//!
//! The agent drives `Microsoft.Update.Session` (UpdateSearcher /
//! UpdateDownloader / UpdateInstaller) through fixed PowerShell templates.
//! The API models no inter-update dependencies, so dry-runs report an
//! empty dependency list rather than fabricated text.

use super::{run_command, DryRunReport, RunOutput};
use crate::proto::{DiscoveryItem, PackageType, Severity};
use anyhow::{bail, Result};
use serde::Deserialize;

/// Search + JSON projection for pending updates.
static SEARCH_SCRIPT: &str = r#"
$session = New-Object -ComObject Microsoft.Update.Session
$searcher = $session.CreateUpdateSearcher()
$result = $searcher.Search("IsInstalled=0 and IsHidden=0")
$updates = @($result.Updates | ForEach-Object {
    [PSCustomObject]@{
        title = $_.Title
        kb = @($_.KBArticleIDs) -join ","
        severity = "$($_.MsrcSeverity)"
    }
})
ConvertTo-Json -InputObject $updates -Compress
"#;

/// Download and install one update matched by title substring.
static INSTALL_TEMPLATE: &str = r#"
$session = New-Object -ComObject Microsoft.Update.Session
$searcher = $session.CreateUpdateSearcher()
$result = $searcher.Search("IsInstalled=0 and IsHidden=0")
$target = New-Object -ComObject Microsoft.Update.UpdateColl
$result.Updates | Where-Object { $_.Title -like "*__TARGET__*" } | ForEach-Object { [void]$target.Add($_) }
if ($target.Count -eq 0) { Write-Error "update not found"; exit 1 }
$downloader = $session.CreateUpdateDownloader(); $downloader.Updates = $target; [void]$downloader.Download()
$installer = $session.CreateUpdateInstaller(); $installer.Updates = $target
$outcome = $installer.Install()
if ($outcome.ResultCode -ne 2) { exit 1 }
"#;

/// One update entry as projected by the search script.
#[derive(Debug, Deserialize)]
struct SearchEntry {
    title: String,
    #[serde(default)]
    kb: String,
    #[serde(default)]
    severity: String,
}

/// Windows Update driver.
#[derive(Clone, Copy, Debug)]
pub(crate) struct WindowsUpdate;

impl WindowsUpdate {
    pub(crate) async fn is_available(&self) -> bool {
        cfg!(target_os = "windows")
            && super::probe("powershell", &["-NoProfile", "-Command", "exit 0"]).await
    }

    pub(crate) async fn scan(&self) -> Result<Vec<DiscoveryItem>> {
        let out = powershell(SEARCH_SCRIPT).await?;
        if !out.success() {
            bail!("Windows Update search failed:\n{}", out.stderr);
        }
        parse_search_json(&out.stdout)
    }

    /// The search result is the whole truth; no dependency model exists.
    pub(crate) async fn dry_run(&self, name: &str) -> Result<DryRunReport> {
        let out = powershell(SEARCH_SCRIPT).await?;
        if !out.success() {
            bail!("Windows Update search failed:\n{}", out.stderr);
        }
        let pending = parse_search_json(&out.stdout)?;
        let found = pending.iter().any(|u| u.package_name == name);
        Ok(DryRunReport {
            dependencies: Vec::new(),
            output: if found {
                format!("update '{}' is pending installation", name)
            } else {
                format!("update '{}' is not in the pending set", name)
            },
        })
    }

    pub(crate) async fn install(&self, name: &str) -> Result<RunOutput> {
        let script = INSTALL_TEMPLATE.replace("__TARGET__", &sanitize_title(name));
        powershell(&script).await
    }

    pub(crate) async fn install_multiple(&self, names: &[String]) -> Result<RunOutput> {
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
        // An empty match pattern selects every pending update.
        let script = INSTALL_TEMPLATE.replace("__TARGET__", "");
        powershell(&script).await
    }

    /// Installed Windows updates are not uninstallable through this API.
    pub(crate) async fn rollback(&self, name: &str, _version: &str) -> Result<RunOutput> {
        bail!(
            "Windows Update cannot roll back '{}': uninstall is not exposed",
            name
        )
    }
}

async fn powershell(script: &str) -> Result<RunOutput> {
    run_command(
        "powershell",
        &["-NoProfile", "-NonInteractive", "-Command", script],
    )
    .await
}

/// Strip quoting characters before substitution into the match template.
fn sanitize_title(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '"' | '\'' | '`' | '$' | '{' | '}' | ';'))
        .collect()
}

/// Parse the search script's JSON (object for one entry, array otherwise).
fn parse_search_json(stdout: &str) -> Result<Vec<DiscoveryItem>> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let entries: Vec<SearchEntry> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed)?
    } else {
        vec![serde_json::from_str(trimmed)?]
    };

    Ok(entries
        .into_iter()
        .map(|e| DiscoveryItem {
            package_type: PackageType::WindowsUpdate,
            package_name: e.title,
            current_version: String::new(),
            available_version: if e.kb.is_empty() {
                String::new()
            } else {
                format!("KB{}", e.kb)
            },
            severity: parse_msrc_severity(&e.severity),
            source: "windows_update".to_string(),
            metadata: Default::default(),
        })
        .collect())
}

fn parse_msrc_severity(msrc: &str) -> Severity {
    match msrc {
        "Critical" => Severity::Critical,
        "Important" => Severity::Important,
        "Moderate" => Severity::Moderate,
        "Low" => Severity::Low,
        _ => Severity::Moderate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_search_json_array() {
        let json = r#"[{"title":"2024-01 Cumulative Update","kb":"5034123","severity":"Critical"},
                       {"title":"Defender definitions","kb":"","severity":""}]"#;
        let items = parse_search_json(json).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].available_version, "KB5034123");
        assert_eq!(items[0].severity, Severity::Critical);
        assert_eq!(items[1].available_version, "");
        assert_eq!(items[1].severity, Severity::Moderate);
    }

    #[test]
    fn test_parse_search_json_single_object() {
        let json = r#"{"title":"Servicing Stack Update","kb":"5031234","severity":"Important"}"#;
        let items = parse_search_json(json).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].severity, Severity::Important);
    }

    #[test]
    fn test_parse_search_json_empty() {
        assert!(parse_search_json("").unwrap().is_empty());
        assert!(parse_search_json("[]").unwrap().is_empty());
    }

    #[test]
    fn test_sanitize_title() {
        assert_eq!(
            sanitize_title(r#"2024-01 "Update"; $(evil)"#),
            "2024-01 Update (evil)".to_string()
        );
    }
}
