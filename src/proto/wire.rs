//! JSON request/response bodies for the HTTP surface.

use super::{
    CommandSource, CommandStatus, CommandType, HostStatus, OperatorRole, OsFamily, PackageStatus,
    PackageType, Severity, TokenStatus,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use uuid::Uuid;

/// Registration: host fingerprint plus enrollment secret.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RegisterRequest {
    /// Enrollment token secret, presented exactly once.
    pub token: String,
    pub hostname: String,
    pub os_type: OsFamily,
    #[serde(default)]
    pub os_version: String,
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub agent_version: String,
}

/// Registration outcome; the refresh secret is returned only here.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RegisterResponse {
    pub agent_id: Uuid,
    pub access_token: String,
    pub refresh_token: String,
    /// Nominal poll interval, in seconds.
    pub check_in_interval: u64,
}

/// Credential renewal request.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RenewRequest {
    pub refresh_token: String,
}

/// Credential renewal outcome.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RenewResponse {
    pub access_token: String,
    /// Access-credential lifetime, in seconds.
    pub expires_in: u64,
}

/// Light metrics attached to a check-in.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct CheckInRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_version: Option<String>,
}

/// One claimed command, as delivered to an agent.
///
/// The type travels as its wire label so an older agent can report an
/// unknown command as failed instead of choking on the whole response.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CommandEnvelope {
    pub id: Uuid,
    pub command_type: String,
    #[serde(default)]
    pub params: JsonValue,
    pub created_at: DateTime<Utc>,
}

/// Check-in response: claimed commands plus the effective poll interval.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CheckInResponse {
    pub commands: Vec<CommandEnvelope>,
    /// Effective poll interval in seconds; shrinks while a heartbeat
    /// window is active on the host.
    pub check_in_interval: u64,
}

/// One discovered (or outcome) item in a report batch.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DiscoveryItem {
    pub package_type: PackageType,
    pub package_name: String,
    #[serde(default)]
    pub current_version: String,
    #[serde(default)]
    pub available_version: String,
    #[serde(default = "default_severity")]
    pub severity: Severity,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub metadata: HashMap<String, JsonValue>,
}

fn default_severity() -> Severity {
    Severity::Moderate
}

/// Discovery batch reported by an agent.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ReportUpdatesRequest {
    /// Originating command, completed on successful ingest.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_id: Option<Uuid>,
    pub updates: Vec<DiscoveryItem>,
}

/// Receipt for an ingested batch.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct BatchReceipt {
    pub batch_id: Uuid,
    pub received: u32,
    pub processed: u32,
    pub failed: u32,
    pub status: String,
}

/// Command execution report.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ReportLogRequest {
    pub command_id: Uuid,
    /// Action label, e.g. `install` or `dry_run`.
    pub action: String,
    /// `true` transitions the command to completed, `false` to failed.
    pub success: bool,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
}

/// Dry-run outcome: extra packages the install would pull in.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ReportDependenciesRequest {
    pub package_id: Uuid,
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub dry_run_output: String,
}

/// Full host inventory push.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct SystemInfoRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_version: Option<String>,
    #[serde(default)]
    pub reboot_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reboot_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_reboot_at: Option<DateTime<Utc>>,
    /// Freeform inventory: kernel, CPU model, memory/disk totals, addresses.
    #[serde(default)]
    pub metadata: HashMap<String, JsonValue>,
}

/// Operator login request.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Operator login outcome.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub role: OperatorRole,
    pub expires_in: u64,
}

/// Host as rendered in operator listings.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct HostView {
    pub id: Uuid,
    pub hostname: String,
    pub os_type: OsFamily,
    pub os_version: String,
    pub architecture: String,
    pub agent_version: String,
    pub status: HostStatus,
    pub last_seen_at: DateTime<Utc>,
    pub update_available: bool,
    pub reboot_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_scan_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: JsonValue,
}

/// Package state as rendered in operator listings.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PackageStateView {
    pub id: Uuid,
    pub host_id: Uuid,
    pub package_type: PackageType,
    pub package_name: String,
    pub current_version: String,
    pub available_version: String,
    pub severity: Severity,
    pub source: String,
    pub status: PackageStatus,
    pub metadata: JsonValue,
    pub last_discovered_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated_at: Option<DateTime<Utc>>,
}

/// Command as rendered in operator listings.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CommandView {
    pub id: Uuid,
    pub host_id: Uuid,
    pub command_type: CommandType,
    pub params: JsonValue,
    pub status: CommandStatus,
    pub source: CommandSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_parent_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// One page of a filtered listing.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
}

/// Bulk approval request.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct BulkApproveRequest {
    pub ids: Vec<Uuid>,
}

/// Bulk approval outcome.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct BulkApproveResponse {
    pub approved: u32,
    pub skipped: u32,
}

/// Dependency confirmation; operators may trim the proposed list.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ConfirmDependenciesRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<Vec<String>>,
}

/// Heartbeat toggle: rapid polling until a deadline.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct HeartbeatRequest {
    pub enabled: bool,
    #[serde(default = "default_heartbeat_minutes")]
    pub duration_minutes: u32,
}

fn default_heartbeat_minutes() -> u32 {
    10
}

/// Enrollment-token mint request.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MintTokenRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_hours: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_seats: Option<u32>,
    #[serde(default)]
    pub metadata: HashMap<String, JsonValue>,
}

/// Enrollment token as rendered in listings (secret redacted to a prefix).
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TokenView {
    pub id: Uuid,
    pub secret_prefix: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub status: TokenStatus,
    pub max_seats: i32,
    pub seats_used: i32,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Mint outcome; the full secret appears only here.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MintTokenResponse {
    pub token: String,
    #[serde(flatten)]
    pub view: TokenView,
}

/// Scope selector for the failed-command archival sweep.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveScope {
    /// Only failures that already have a retry child.
    OnlyRetried,
    /// Every settled failure past the age bound.
    AllFailed,
}

/// Parameters of the failed-command archival sweep.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ArchiveFailedRequest {
    #[serde(default = "default_archive_days")]
    pub older_than_days: u32,
    #[serde(default = "default_archive_scope")]
    pub scope: ArchiveScope,
}

fn default_archive_days() -> u32 {
    7
}

fn default_archive_scope() -> ArchiveScope {
    ArchiveScope::OnlyRetried
}

/// Machine-readable error body for non-auth failures.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovery_item_defaults() {
        let item: DiscoveryItem = serde_json::from_str(
            r#"{"package_type": "apt", "package_name": "curl", "available_version": "7.88.1"}"#,
        )
        .unwrap();
        assert_eq!(item.severity, Severity::Moderate);
        assert_eq!(item.current_version, "");
        assert!(item.metadata.is_empty());
    }

    #[test]
    fn test_archive_request_defaults() {
        let req: ArchiveFailedRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req.older_than_days, 7);
        assert_eq!(req.scope, ArchiveScope::OnlyRetried);

        let req: ArchiveFailedRequest =
            serde_json::from_str(r#"{"older_than_days": 30, "scope": "all_failed"}"#).unwrap();
        assert_eq!(req.scope, ArchiveScope::AllFailed);
    }

    #[test]
    fn test_mint_response_flattens_view() {
        let resp = MintTokenResponse {
            token: "aa".repeat(32),
            view: TokenView {
                id: Uuid::nil(),
                secret_prefix: "aaaaaaaa".to_string(),
                label: Some("rack-12".to_string()),
                status: TokenStatus::Active,
                max_seats: 2,
                seats_used: 0,
                created_by: "admin".to_string(),
                created_at: Utc::now(),
                expires_at: Utc::now(),
            },
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert!(json.get("token").is_some());
        assert!(json.get("secret_prefix").is_some());
        assert!(json.get("view").is_none());
    }
}
