//! Logic for the `agent` subcommand.

use crate::agent::{actor::PollActor, cache, cache::AgentCache, client, config, config::AgentConfig};
use crate::agent::{sysinfo, AgentRuntime};
use crate::pkgmgr::PackageManager;
use crate::proto::{DiscoveryItem, RegisterRequest};
use actix::Actor;
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::cell::RefCell;
use std::path::PathBuf;
use url::Url;

/// Export formats for `--export`.
#[derive(Clone, Copy, Debug, ValueEnum)]
pub(crate) enum ExportFormat {
    Json,
    Csv,
}

/// Agent options.
#[derive(Debug, Parser)]
pub(crate) struct Cmd {
    /// Enroll this host with the coordinator, then exit.
    #[arg(long)]
    register: bool,

    /// Coordinator base URL (with --register).
    #[arg(long)]
    server: Option<Url>,

    /// Enrollment token secret (with --register).
    #[arg(long)]
    token: Option<String>,

    /// Run a local scan and print the results, without the coordinator.
    #[arg(long)]
    scan: bool,

    /// Print cached agent status, then exit.
    #[arg(long)]
    status: bool,

    /// Print the last scan results, then exit.
    #[arg(long)]
    list_updates: bool,

    /// Export the last scan results in the given format.
    #[arg(long, value_enum)]
    export: Option<ExportFormat>,

    /// Agent config file location.
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cmd {
    /// Agent subcommand entry-point.
    pub(crate) fn run(self) -> Result<()> {
        let config_path = self.config.clone().unwrap_or_else(config::default_path);
        let cache_path = cache::default_path();

        if self.register {
            return self.run_register(&config_path);
        }
        if self.scan {
            return run_local_scan(&cache_path);
        }
        if self.status {
            return print_status(&config_path, &cache_path);
        }
        if self.list_updates || self.export.is_some() {
            return print_updates(&cache_path, self.export);
        }

        run_loop(&config_path, &cache_path)
    }

    /// One-shot enrollment: consume a seat, persist the credentials.
    fn run_register(&self, config_path: &PathBuf) -> Result<()> {
        let server = self
            .server
            .clone()
            .context("--register requires --server <url>")?;
        let token = self
            .token
            .clone()
            .context("--register requires --token <enrollment-secret>")?;
        if config_path.exists() {
            anyhow::bail!(
                "agent already registered ('{}' exists); delete it to re-enroll",
                config_path.display()
            );
        }

        let runtime = tokio::runtime::Runtime::new()?;
        let response = runtime.block_on(async {
            let request = RegisterRequest {
                token,
                hostname: sysinfo::hostname(),
                os_type: sysinfo::os_family(),
                os_version: sysinfo::os_version(),
                architecture: std::env::consts::ARCH.to_string(),
                agent_version: clap::crate_version!().to_string(),
            };
            client::register(&server, &request).await
        })?;

        let config = AgentConfig {
            server_url: server,
            agent_id: response.agent_id,
            token: response.access_token,
            refresh_token: response.refresh_token,
            check_in_interval: response.check_in_interval,
        };
        config.save(config_path)?;

        println!("registered as agent {}", response.agent_id);
        println!("config written to {}", config_path.display());
        Ok(())
    }
}

/// Long-running poll loop.
fn run_loop(config_path: &PathBuf, cache_path: &PathBuf) -> Result<()> {
    #[cfg(unix)]
    if users::get_effective_uid() != 0 {
        log::warn!("not running as root; package operations will likely fail");
    }

    let config = AgentConfig::load(config_path)
        .context("no agent configuration; run with --register first")?;
    log::info!(
        "starting update agent ({} {}) as {}",
        clap::crate_name!(),
        clap::crate_version!(),
        config.agent_id
    );

    let client = client::ClientBuilder::new(
        config.server_url.clone(),
        config.agent_id,
        config.token.clone(),
    )
    .build()?;
    let runtime = AgentRuntime {
        client,
        refresh_token: config.refresh_token.clone(),
        nominal_interval: config.check_in_interval.max(1),
        cache_path: cache_path.clone(),
        last_sysinfo: RefCell::new(None),
    };

    let sys = actix::System::new();
    sys.block_on(async {
        let _addr = PollActor::new(runtime).start();
    });
    sys.run().context("agent failed")?;
    Ok(())
}

/// Local-only scan: no coordinator involved.
fn run_local_scan(cache_path: &PathBuf) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    let results = runtime.block_on(async {
        let mut discovered = Vec::new();
        for manager in PackageManager::all() {
            if !manager.is_available().await {
                continue;
            }
            let package_type = manager.package_type();
            match manager.scan().await {
                Ok(items) => discovered.extend(items),
                Err(e) => log::error!("{} scan failed: {:#}", package_type, e),
            }
        }
        discovered
    });

    print_table(&results);

    let mut cache = AgentCache::load_or_default(cache_path);
    cache.record_scan(results);
    cache.save(cache_path)?;
    Ok(())
}

/// Print cached agent status.
fn print_status(config_path: &PathBuf, cache_path: &PathBuf) -> Result<()> {
    let cache = AgentCache::load_or_default(cache_path);
    match AgentConfig::load(config_path) {
        Ok(config) => {
            println!("agent id:       {}", config.agent_id);
            println!("coordinator:    {}", config.server_url);
            println!("poll interval:  {}s", config.check_in_interval);
        }
        Err(_) => println!("agent id:       (unregistered)"),
    }
    println!(
        "status:         {}",
        if cache.agent_status.is_empty() {
            "unknown"
        } else {
            &cache.agent_status
        }
    );
    match cache.last_check_in {
        Some(at) => println!("last check-in:  {}", at),
        None => println!("last check-in:  never"),
    }
    match cache.last_scan_time {
        Some(at) => println!("last scan:      {}", at),
        None => println!("last scan:      never"),
    }
    println!("pending:        {}", cache.last_scan_results.len());
    Ok(())
}

/// Print (or export) the last scan results.
fn print_updates(cache_path: &PathBuf, export: Option<ExportFormat>) -> Result<()> {
    let cache = AgentCache::load_or_default(cache_path);
    match export {
        Some(ExportFormat::Json) => {
            println!("{}", serde_json::to_string_pretty(&cache.last_scan_results)?);
        }
        Some(ExportFormat::Csv) => print!("{}", to_csv(&cache.last_scan_results)),
        None => print_table(&cache.last_scan_results),
    }
    Ok(())
}

fn print_table(items: &[DiscoveryItem]) {
    if items.is_empty() {
        println!("no pending updates");
        return;
    }
    println!(
        "{:<15} {:<40} {:<20} {:<20} {:<10}",
        "TYPE", "PACKAGE", "CURRENT", "AVAILABLE", "SEVERITY"
    );
    for item in items {
        println!(
            "{:<15} {:<40} {:<20} {:<20} {:<10}",
            item.package_type,
            item.package_name,
            item.current_version,
            item.available_version,
            item.severity
        );
    }
}

fn to_csv(items: &[DiscoveryItem]) -> String {
    let mut out =
        String::from("package_type,package_name,current_version,available_version,severity,source\n");
    for item in items {
        out.push_str(&format!(
            "{},{},{},{},{},{}\n",
            item.package_type,
            csv_field(&item.package_name),
            csv_field(&item.current_version),
            csv_field(&item.available_version),
            item.severity,
            csv_field(&item.source)
        ));
    }
    out
}

/// Quote a CSV field when it contains separators.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{PackageType, Severity};

    fn item() -> DiscoveryItem {
        DiscoveryItem {
            package_type: PackageType::Apt,
            package_name: "curl".to_string(),
            current_version: "7.88".to_string(),
            available_version: "7.88.1".to_string(),
            severity: Severity::Important,
            source: "stable,security".to_string(),
            metadata: Default::default(),
        }
    }

    #[test]
    fn test_to_csv_quotes_separators() {
        let csv = to_csv(&[item()]);
        let mut lines = csv.lines();
        assert_eq!(
            lines.next().unwrap(),
            "package_type,package_name,current_version,available_version,severity,source"
        );
        assert_eq!(
            lines.next().unwrap(),
            "apt,curl,7.88,7.88.1,important,\"stable,security\""
        );
    }

    #[test]
    fn test_csv_field_escaping() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }
}
