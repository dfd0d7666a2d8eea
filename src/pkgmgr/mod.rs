//! Package-manager abstraction.
//!
//! One variant per ecosystem the agent can drive. Every concrete manager
//! wraps its CLI (or OS API) behind the same capability surface: detect,
//! scan, dry-run, install, upgrade. Invocations pass through the
//! privileged-command allowlist before anything is spawned.

mod apt;
mod dnf;
mod docker;
pub(crate) mod privilege;
mod windows_update;
mod winget;

use crate::proto::{DiscoveryItem, PackageType};
use anyhow::Result;

pub(crate) use apt::Apt;
pub(crate) use dnf::Dnf;
pub(crate) use docker::Docker;
pub(crate) use windows_update::WindowsUpdate;
pub(crate) use winget::Winget;

/// Output of a finished package-manager process.
#[derive(Clone, Debug, Default)]
pub(crate) struct RunOutput {
    pub(crate) stdout: String,
    pub(crate) stderr: String,
    pub(crate) exit_code: Option<i32>,
}

/// Outcome of a dry-run: the extra packages the install would pull in.
#[derive(Clone, Debug, Default)]
pub(crate) struct DryRunReport {
    pub(crate) dependencies: Vec<String>,
    pub(crate) output: String,
}

/// A concrete package manager.
#[derive(Debug)]
pub(crate) enum PackageManager {
    Apt(Apt),
    Dnf(Dnf),
    Docker(Docker),
    WindowsUpdate(WindowsUpdate),
    Winget(Winget),
}

impl PackageManager {
    /// Every manager this build knows about, detection not yet applied.
    pub(crate) fn all() -> Vec<PackageManager> {
        vec![
            PackageManager::Apt(Apt),
            PackageManager::Dnf(Dnf),
            PackageManager::Docker(Docker),
            PackageManager::WindowsUpdate(WindowsUpdate),
            PackageManager::Winget(Winget),
        ]
    }

    /// Resolve the manager for a package type.
    pub(crate) fn for_type(package_type: PackageType) -> PackageManager {
        match package_type {
            PackageType::Apt => PackageManager::Apt(Apt),
            PackageType::Dnf => PackageManager::Dnf(Dnf),
            PackageType::DockerImage => PackageManager::Docker(Docker),
            PackageType::WindowsUpdate => PackageManager::WindowsUpdate(WindowsUpdate),
            PackageType::Winget => PackageManager::Winget(Winget),
        }
    }

    /// Ecosystem this manager covers.
    pub(crate) fn package_type(&self) -> PackageType {
        match self {
            PackageManager::Apt(_) => PackageType::Apt,
            PackageManager::Dnf(_) => PackageType::Dnf,
            PackageManager::Docker(_) => PackageType::DockerImage,
            PackageManager::WindowsUpdate(_) => PackageType::WindowsUpdate,
            PackageManager::Winget(_) => PackageType::Winget,
        }
    }

    /// Whether the underlying tooling exists on this host.
    pub(crate) async fn is_available(&self) -> bool {
        match self {
            PackageManager::Apt(m) => m.is_available().await,
            PackageManager::Dnf(m) => m.is_available().await,
            PackageManager::Docker(m) => m.is_available().await,
            PackageManager::WindowsUpdate(m) => m.is_available().await,
            PackageManager::Winget(m) => m.is_available().await,
        }
    }

    /// Discover pending updates.
    pub(crate) async fn scan(&self) -> Result<Vec<DiscoveryItem>> {
        match self {
            PackageManager::Apt(m) => m.scan().await,
            PackageManager::Dnf(m) => m.scan().await,
            PackageManager::Docker(m) => m.scan().await,
            PackageManager::WindowsUpdate(m) => m.scan().await,
            PackageManager::Winget(m) => m.scan().await,
        }
    }

    /// Resolve what an install would additionally pull in.
    pub(crate) async fn dry_run(&self, name: &str) -> Result<DryRunReport> {
        match self {
            PackageManager::Apt(m) => m.dry_run(name).await,
            PackageManager::Dnf(m) => m.dry_run(name).await,
            PackageManager::Docker(m) => m.dry_run(name).await,
            PackageManager::WindowsUpdate(m) => m.dry_run(name).await,
            PackageManager::Winget(m) => m.dry_run(name).await,
        }
    }

    /// Install (update) a single package.
    pub(crate) async fn install(&self, name: &str) -> Result<RunOutput> {
        match self {
            PackageManager::Apt(m) => m.install(name).await,
            PackageManager::Dnf(m) => m.install(name).await,
            PackageManager::Docker(m) => m.install(name).await,
            PackageManager::WindowsUpdate(m) => m.install(name).await,
            PackageManager::Winget(m) => m.install(name).await,
        }
    }

    /// Install a set of packages in one transaction where the backend
    /// supports it.
    pub(crate) async fn install_multiple(&self, names: &[String]) -> Result<RunOutput> {
        match self {
            PackageManager::Apt(m) => m.install_multiple(names).await,
            PackageManager::Dnf(m) => m.install_multiple(names).await,
            PackageManager::Docker(m) => m.install_multiple(names).await,
            PackageManager::WindowsUpdate(m) => m.install_multiple(names).await,
            PackageManager::Winget(m) => m.install_multiple(names).await,
        }
    }

    /// Upgrade everything pending.
    pub(crate) async fn upgrade(&self) -> Result<RunOutput> {
        match self {
            PackageManager::Apt(m) => m.upgrade().await,
            PackageManager::Dnf(m) => m.upgrade().await,
            PackageManager::Docker(m) => m.upgrade().await,
            PackageManager::WindowsUpdate(m) => m.upgrade().await,
            PackageManager::Winget(m) => m.upgrade().await,
        }
    }

    /// Best-effort downgrade to a previously recorded version.
    pub(crate) async fn rollback(&self, name: &str, version: &str) -> Result<RunOutput> {
        match self {
            PackageManager::Apt(m) => m.rollback(name, version).await,
            PackageManager::Dnf(m) => m.rollback(name, version).await,
            PackageManager::Docker(m) => m.rollback(name, version).await,
            PackageManager::WindowsUpdate(m) => m.rollback(name, version).await,
            PackageManager::Winget(m) => m.rollback(name, version).await,
        }
    }
}

/// Run an allowlisted command and capture its output.
///
/// A non-zero exit is not an error at this level: callers decide whether
/// the output constitutes failure (some scanners use exit codes as data).
pub(crate) async fn run_command(program: &str, args: &[&str]) -> Result<RunOutput> {
    privilege::ensure_allowed(program, args)?;

    log::debug!("running {} {}", program, args.join(" "));
    let output = tokio::process::Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| anyhow::anyhow!("failed to run {}: {}", program, e))?;

    Ok(RunOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code(),
    })
}

impl RunOutput {
    /// Whether the process exited zero.
    pub(crate) fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Probe for a binary by running it with a harmless argument.
pub(crate) async fn probe(program: &str, args: &[&str]) -> bool {
    match run_command(program, args).await {
        Ok(out) => out.success(),
        Err(_) => false,
    }
}
