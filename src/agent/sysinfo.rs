//! Host inventory and light metrics, via the sysinfo crate.

use crate::proto::{CheckInRequest, OsFamily, SystemInfoRequest};
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::time::Duration;
use sysinfo::{Disks, System};

/// CPU usage needs two samples; this is the spacing between them.
const CPU_SAMPLE_GAP: Duration = Duration::from_millis(250);

/// OS family of this build.
pub(crate) fn os_family() -> OsFamily {
    if cfg!(target_os = "windows") {
        OsFamily::Windows
    } else if cfg!(target_os = "macos") {
        OsFamily::Macos
    } else {
        OsFamily::Linux
    }
}

/// Hostname as reported by the OS.
pub(crate) fn hostname() -> String {
    System::host_name().unwrap_or_else(|| "unknown".to_string())
}

/// OS version string, e.g. `Debian GNU/Linux 12`.
pub(crate) fn os_version() -> String {
    System::long_os_version().unwrap_or_default()
}

/// Light metrics for a check-in: CPU%, memory%, disk%, uptime.
pub(crate) async fn light_metrics() -> CheckInRequest {
    let mut sys = System::new();
    sys.refresh_cpu_usage();
    tokio::time::sleep(CPU_SAMPLE_GAP).await;
    sys.refresh_cpu_usage();
    sys.refresh_memory();

    let memory_percent = if sys.total_memory() > 0 {
        (sys.used_memory() as f64 / sys.total_memory() as f64) * 100.0
    } else {
        0.0
    };

    CheckInRequest {
        cpu_percent: Some(f64::from(sys.global_cpu_usage())),
        memory_percent: Some(memory_percent),
        disk_percent: Some(root_disk_percent()),
        uptime_secs: Some(System::uptime()),
        agent_version: Some(env!("CARGO_PKG_VERSION").to_string()),
    }
}

/// Usage of the fullest mounted disk, in percent.
fn root_disk_percent() -> f64 {
    let disks = Disks::new_with_refreshed_list();
    disks
        .iter()
        .filter(|d| d.total_space() > 0)
        .map(|d| {
            let used = d.total_space().saturating_sub(d.available_space());
            (used as f64 / d.total_space() as f64) * 100.0
        })
        .fold(0.0, f64::max)
}

/// Full inventory for a system-info push.
pub(crate) async fn full_inventory() -> SystemInfoRequest {
    let mut sys = System::new_all();
    sys.refresh_all();

    let mut metadata: HashMap<String, JsonValue> = HashMap::new();
    metadata.insert(
        "kernel_version".to_string(),
        json!(System::kernel_version().unwrap_or_default()),
    );
    metadata.insert("os_name".to_string(), json!(System::name().unwrap_or_default()));
    metadata.insert(
        "cpu_model".to_string(),
        json!(sys.cpus().first().map(|c| c.brand().to_string()).unwrap_or_default()),
    );
    metadata.insert("cpu_cores".to_string(), json!(sys.cpus().len()));
    metadata.insert("memory_total_bytes".to_string(), json!(sys.total_memory()));

    let disks = Disks::new_with_refreshed_list();
    let disk_list: Vec<JsonValue> = disks
        .iter()
        .map(|d| {
            json!({
                "mount_point": d.mount_point().to_string_lossy(),
                "total_bytes": d.total_space(),
                "available_bytes": d.available_space(),
            })
        })
        .collect();
    metadata.insert("disks".to_string(), JsonValue::Array(disk_list));

    SystemInfoRequest {
        hostname: Some(hostname()),
        os_version: Some(os_version()),
        architecture: Some(std::env::consts::ARCH.to_string()),
        agent_version: Some(env!("CARGO_PKG_VERSION").to_string()),
        reboot_required: reboot_required(),
        reboot_reason: None,
        last_reboot_at: None,
        metadata,
    }
}

/// Whether the OS reports a pending reboot.
fn reboot_required() -> bool {
    #[cfg(target_os = "linux")]
    {
        std::path::Path::new("/var/run/reboot-required").exists()
    }
    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_os_family_matches_build() {
        #[cfg(target_os = "linux")]
        assert_eq!(os_family(), OsFamily::Linux);
        #[cfg(target_os = "windows")]
        assert_eq!(os_family(), OsFamily::Windows);
        #[cfg(target_os = "macos")]
        assert_eq!(os_family(), OsFamily::Macos);
    }

    #[test]
    fn test_light_metrics_ranges() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let metrics = runtime.block_on(light_metrics());
        let mem = metrics.memory_percent.unwrap();
        assert!((0.0..=100.0).contains(&mem));
        let disk = metrics.disk_percent.unwrap();
        assert!((0.0..=100.0).contains(&disk));
    }

    #[test]
    fn test_full_inventory_has_core_keys() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let info = runtime.block_on(full_inventory());
        assert!(info.hostname.is_some());
        assert!(info.metadata.contains_key("kernel_version"));
        assert!(info.metadata.contains_key("cpu_cores"));
        assert!(info.metadata.contains_key("disks"));
    }
}
