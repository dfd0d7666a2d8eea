//! Command handlers.
//!
//! Handlers run strictly one at a time: the poll loop blocks on each
//! command, and a running install is never raced by another. Every
//! handler reports its own outcome; the scan handler reports through the
//! batch endpoint (which settles the command server-side), everything
//! else through the log endpoint.

use super::cache::AgentCache;
use super::AgentRuntime;
use crate::pkgmgr::{PackageManager, RunOutput};
use crate::proto::{
    CommandEnvelope, CommandType, PackageType, ReportDependenciesRequest, ReportLogRequest,
};
use serde_json::Value as JsonValue;
use std::rc::Rc;
use std::time::Instant;
use uuid::Uuid;

/// Outcome of one handler, ready to report.
struct HandlerOutcome {
    action: &'static str,
    success: bool,
    output: RunOutput,
}

impl HandlerOutcome {
    fn failure(action: &'static str, message: String) -> Self {
        Self {
            action,
            success: false,
            output: RunOutput {
                stdout: String::new(),
                stderr: message,
                exit_code: None,
            },
        }
    }
}

/// Execute one command and report its outcome.
pub(crate) async fn execute(runtime: Rc<AgentRuntime>, envelope: CommandEnvelope) {
    // Best effort: flag execution start so cancellation stops applying.
    if let Err(e) = runtime.client.command_running(envelope.id).await {
        log::debug!("could not flag command {} running: {}", envelope.id, e);
    }

    let command_type = match envelope.command_type.parse::<CommandType>() {
        Ok(t) => t,
        Err(_) => {
            log::warn!(
                "ignoring unknown command type '{}' ({})",
                envelope.command_type,
                envelope.id
            );
            report(
                &runtime,
                envelope.id,
                HandlerOutcome::failure(
                    "dispatch",
                    format!("unknown command type '{}'", envelope.command_type),
                ),
                0,
            )
            .await;
            return;
        }
    };

    log::info!("executing command {} ({})", envelope.id, command_type);
    let started = Instant::now();

    let outcome = match command_type {
        // The scan handler settles its command through the batch
        // endpoint instead of a log report.
        CommandType::ScanUpdates => {
            handle_scan(&runtime, envelope.id).await;
            return;
        }
        CommandType::CollectSpecs => handle_collect_specs(&runtime).await,
        CommandType::DryRunUpdate => handle_dry_run(&runtime, &envelope.params).await,
        CommandType::InstallUpdates => handle_install(&envelope.params).await,
        CommandType::ConfirmDependencies => handle_confirm(&envelope.params).await,
        CommandType::RollbackUpdate => handle_rollback(&envelope.params).await,
        CommandType::UpdateAgent => HandlerOutcome::failure(
            "update_agent",
            "agent self-update is delegated to the platform package manager".to_string(),
        ),
    };

    let elapsed_ms = started.elapsed().as_millis() as i64;
    report(&runtime, envelope.id, outcome, elapsed_ms).await;
}

/// Post a log report for a finished handler.
async fn report(runtime: &AgentRuntime, command_id: Uuid, outcome: HandlerOutcome, elapsed_ms: i64) {
    let req = ReportLogRequest {
        command_id,
        action: outcome.action.to_string(),
        success: outcome.success,
        stdout: outcome.output.stdout,
        stderr: outcome.output.stderr,
        exit_code: outcome.output.exit_code,
        duration_ms: Some(elapsed_ms),
    };
    if let Err(e) = runtime.client.report_log(&req).await {
        log::error!("failed to report command {} outcome: {}", command_id, e);
    }
}

/// Scan every available package manager; per-manager failure is logged
/// but does not abort the scan.
async fn handle_scan(runtime: &AgentRuntime, command_id: Uuid) {
    let mut discovered = Vec::new();
    for manager in PackageManager::all() {
        if !manager.is_available().await {
            continue;
        }
        let package_type = manager.package_type();
        match manager.scan().await {
            Ok(items) => {
                log::info!("{}: {} updates pending", package_type, items.len());
                discovered.extend(items);
            }
            Err(e) => log::error!("{} scan failed: {:#}", package_type, e),
        }
    }

    let mut cache = AgentCache::load_or_default(&runtime.cache_path);
    cache.record_scan(discovered.clone());
    if let Err(e) = cache.save(&runtime.cache_path) {
        log::warn!("failed to persist scan cache: {:#}", e);
    }

    match runtime
        .client
        .report_updates(Some(command_id), discovered)
        .await
    {
        Ok(receipt) => log::info!(
            "scan batch {} accepted ({} processed)",
            receipt.batch_id,
            receipt.processed
        ),
        Err(e) => log::error!("failed to report scan batch: {}", e),
    }
}

/// Push the full inventory on request.
async fn handle_collect_specs(runtime: &AgentRuntime) -> HandlerOutcome {
    let info = super::sysinfo::full_inventory().await;
    match runtime.client.report_system_info(&info).await {
        Ok(_) => HandlerOutcome {
            action: "collect_specs",
            success: true,
            output: RunOutput::default(),
        },
        Err(e) => HandlerOutcome::failure("collect_specs", e.to_string()),
    }
}

/// Dry-run an install and surface the dependency list.
async fn handle_dry_run(runtime: &AgentRuntime, params: &JsonValue) -> HandlerOutcome {
    let (package_type, name) = match target_of(params) {
        Some(t) => t,
        None => return HandlerOutcome::failure("dry_run", "missing package target".to_string()),
    };
    let package_id = match param_uuid(params, "package_id") {
        Some(id) => id,
        None => return HandlerOutcome::failure("dry_run", "missing package_id".to_string()),
    };

    let manager = PackageManager::for_type(package_type);
    match manager.dry_run(&name).await {
        Ok(res) => {
            let dep_report = ReportDependenciesRequest {
                package_id,
                dependencies: res.dependencies,
                dry_run_output: res.output.clone(),
            };
            if let Err(e) = runtime.client.report_dependencies(&dep_report).await {
                return HandlerOutcome::failure(
                    "dry_run",
                    format!("dry-run succeeded but reporting failed: {}", e),
                );
            }
            HandlerOutcome {
                action: "dry_run",
                success: true,
                output: RunOutput {
                    stdout: res.output,
                    stderr: String::new(),
                    exit_code: Some(0),
                },
            }
        }
        Err(e) => HandlerOutcome::failure("dry_run", format!("{:#}", e)),
    }
}

/// Install one package, several, or upgrade everything pending.
async fn handle_install(params: &JsonValue) -> HandlerOutcome {
    let names = param_names(params);
    match param_package_type(params) {
        Some(package_type) => {
            let manager = PackageManager::for_type(package_type);
            let run = match names.len() {
                0 => manager.upgrade().await,
                1 => manager.install(&names[0]).await,
                _ => manager.install_multiple(&names).await,
            };
            outcome_of("install", run)
        }
        // No target ecosystem: upgrade whatever is present.
        None => {
            let mut combined = RunOutput::default();
            let mut success = true;
            for manager in PackageManager::all() {
                if !manager.is_available().await {
                    continue;
                }
                match manager.upgrade().await {
                    Ok(out) => {
                        success &= out.success();
                        combined.stdout.push_str(&out.stdout);
                        combined.stderr.push_str(&out.stderr);
                        combined.exit_code = out.exit_code;
                    }
                    Err(e) => {
                        success = false;
                        combined.stderr.push_str(&format!("{:#}\n", e));
                    }
                }
            }
            HandlerOutcome {
                action: "install",
                success,
                output: combined,
            }
        }
    }
}

/// Install the main package plus its confirmed dependencies.
async fn handle_confirm(params: &JsonValue) -> HandlerOutcome {
    let (package_type, name) = match target_of(params) {
        Some(t) => t,
        None => {
            return HandlerOutcome::failure("confirm_install", "missing package target".to_string())
        }
    };
    let mut names = vec![name];
    names.extend(param_list(params, "dependencies"));

    let manager = PackageManager::for_type(package_type);
    let run = manager.install_multiple(&names).await;
    outcome_of("confirm_install", run)
}

/// Best-effort downgrade to a recorded version.
async fn handle_rollback(params: &JsonValue) -> HandlerOutcome {
    let (package_type, name) = match target_of(params) {
        Some(t) => t,
        None => return HandlerOutcome::failure("rollback", "missing package target".to_string()),
    };
    let version = match param_str(params, "version") {
        Some(v) => v,
        None => return HandlerOutcome::failure("rollback", "missing target version".to_string()),
    };

    let manager = PackageManager::for_type(package_type);
    let run = manager.rollback(&name, &version).await;
    outcome_of("rollback", run)
}

fn outcome_of(action: &'static str, run: anyhow::Result<RunOutput>) -> HandlerOutcome {
    match run {
        Ok(output) => HandlerOutcome {
            action,
            success: output.success(),
            output,
        },
        Err(e) => HandlerOutcome::failure(action, format!("{:#}", e)),
    }
}

fn param_str(params: &JsonValue, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

fn param_uuid(params: &JsonValue, key: &str) -> Option<Uuid> {
    param_str(params, key).and_then(|s| s.parse().ok())
}

fn param_package_type(params: &JsonValue) -> Option<PackageType> {
    param_str(params, "package_type").and_then(|s| s.parse().ok())
}

fn param_list(params: &JsonValue, key: &str) -> Vec<String> {
    params
        .get(key)
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

fn param_names(params: &JsonValue) -> Vec<String> {
    if let Some(name) = param_str(params, "package_name") {
        return vec![name];
    }
    param_list(params, "packages")
}

fn target_of(params: &JsonValue) -> Option<(PackageType, String)> {
    Some((param_package_type(params)?, param_str(params, "package_name")?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_target_of() {
        let params = json!({"package_type": "apt", "package_name": "curl"});
        assert_eq!(
            target_of(&params),
            Some((PackageType::Apt, "curl".to_string()))
        );
        assert_eq!(target_of(&json!({"package_name": "curl"})), None);
    }

    #[test]
    fn test_param_names_fallback() {
        assert_eq!(
            param_names(&json!({"package_name": "a", "packages": ["b"]})),
            vec!["a".to_string()]
        );
        assert_eq!(
            param_names(&json!({"packages": ["b", "c"]})),
            vec!["b".to_string(), "c".to_string()]
        );
        assert!(param_names(&json!({})).is_empty());
    }

    #[test]
    fn test_param_uuid() {
        let id = Uuid::new_v4();
        let params = json!({ "package_id": id.to_string() });
        assert_eq!(param_uuid(&params, "package_id"), Some(id));
        assert_eq!(param_uuid(&json!({"package_id": "nope"}), "package_id"), None);
    }
}
