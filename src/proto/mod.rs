//! Shared protocol vocabulary.
//!
//! Both roles of the binary (coordinator and agent) speak the same JSON
//! protocol; this module holds the tagged enums and the request/response
//! bodies for every endpoint. Enums serialize to their wire strings and
//! `Display`/`FromStr` match the wire form exactly, so values can travel
//! through JSON, SQL text columns, and CLI output without translation
//! tables.

mod wire;

pub use wire::*;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error for unrecognized wire labels.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unknown {kind} label '{value}'")]
pub struct UnknownLabel {
    /// Enum family the label failed to parse into.
    kind: &'static str,
    /// Rejected input.
    value: String,
}

impl UnknownLabel {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $( $(#[$vmeta:meta])* $variant:ident => $label:literal ),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $label)] $variant, )+
        }

        impl $name {
            /// All variants, in declaration order.
            pub const ALL: &'static [$name] = &[ $( $name::$variant, )+ ];

            /// Stable wire label.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $label, )+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownLabel;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $label => Ok($name::$variant), )+
                    other => Err(UnknownLabel::new(stringify!($name), other)),
                }
            }
        }
    };
}

wire_enum! {
    /// Operating-system family of a host.
    OsFamily {
        Linux => "linux",
        Windows => "windows",
        Macos => "macos",
    }
}

wire_enum! {
    /// Package ecosystems an agent can scan and act on.
    PackageType {
        Apt => "apt",
        Dnf => "dnf",
        DockerImage => "docker_image",
        WindowsUpdate => "windows_update",
        Winget => "winget",
    }
}

wire_enum! {
    /// Update severity, most severe first.
    Severity {
        Critical => "critical",
        Important => "important",
        Moderate => "moderate",
        Low => "low",
    }
}

wire_enum! {
    /// Liveness status of a host as seen by the coordinator.
    HostStatus {
        Online => "online",
        Offline => "offline",
        Error => "error",
    }
}

wire_enum! {
    /// Lifecycle of an enrollment token.
    TokenStatus {
        Active => "active",
        Used => "used",
        Expired => "expired",
        Revoked => "revoked",
    }
}

wire_enum! {
    /// Kind of an append-only update event.
    EventKind {
        Discovered => "discovered",
        Updated => "updated",
        Failed => "failed",
        Ignored => "ignored",
    }
}

wire_enum! {
    /// Approval/install state of a package on a host.
    PackageStatus {
        Pending => "pending",
        Approved => "approved",
        CheckingDependencies => "checking_dependencies",
        PendingDependencies => "pending_dependencies",
        Installing => "installing",
        Updated => "updated",
        Failed => "failed",
        Ignored => "ignored",
    }
}

impl PackageStatus {
    /// Whether re-discovery leaves this status untouched.
    ///
    /// `updated` and `ignored` are sticky: seeing the package again in a
    /// scan must not resurrect it into the pending queue.
    pub fn is_sticky(&self) -> bool {
        matches!(self, PackageStatus::Updated | PackageStatus::Ignored)
    }
}

wire_enum! {
    /// Work items addressed to a single host.
    CommandType {
        ScanUpdates => "scan_updates",
        CollectSpecs => "collect_specs",
        DryRunUpdate => "dry_run_update",
        InstallUpdates => "install_updates",
        ConfirmDependencies => "confirm_dependencies",
        RollbackUpdate => "rollback_update",
        UpdateAgent => "update_agent",
    }
}

impl CommandType {
    /// Execution window before the coordinator declares a timeout.
    pub fn timeout(&self) -> chrono::Duration {
        match self {
            // Scans and spec collection are quick; installs may grind
            // through large transactions.
            CommandType::ScanUpdates | CommandType::CollectSpecs => chrono::Duration::minutes(5),
            _ => chrono::Duration::hours(1),
        }
    }
}

wire_enum! {
    /// Status of a queued command.
    CommandStatus {
        Pending => "pending",
        Sent => "sent",
        Running => "running",
        Completed => "completed",
        Failed => "failed",
        TimedOut => "timed_out",
        Cancelled => "cancelled",
        ArchivedFailed => "archived_failed",
    }
}

impl CommandStatus {
    /// Whether the command can still change state through agent reports.
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            CommandStatus::Pending | CommandStatus::Sent | CommandStatus::Running
        )
    }

    /// Cancellation is permitted before the agent starts executing.
    pub fn can_cancel(&self) -> bool {
        matches!(self, CommandStatus::Pending | CommandStatus::Sent)
    }

    /// Retry spawns a child row; only settled failures qualify.
    pub fn can_retry(&self) -> bool {
        matches!(
            self,
            CommandStatus::Failed | CommandStatus::TimedOut | CommandStatus::Cancelled
        )
    }
}

wire_enum! {
    /// Origin of a queued command.
    CommandSource {
        Manual => "manual",
        System => "system",
    }
}

wire_enum! {
    /// Outcome recorded in the package install history.
    HistoryStatus {
        Success => "success",
        Failed => "failed",
        Rollback => "rollback",
    }
}

wire_enum! {
    /// Operator account roles.
    OperatorRole {
        Admin => "admin",
        User => "user",
        Readonly => "readonly",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_roundtrip_all() {
        for kind in PackageType::ALL {
            assert_eq!(&PackageType::from_str(kind.as_str()).unwrap(), kind);
        }
        for status in CommandStatus::ALL {
            assert_eq!(&CommandStatus::from_str(status.as_str()).unwrap(), status);
        }
        for status in PackageStatus::ALL {
            assert_eq!(&PackageStatus::from_str(status.as_str()).unwrap(), status);
        }
    }

    #[test]
    fn test_serde_matches_display() {
        let json = serde_json::to_string(&PackageType::DockerImage).unwrap();
        assert_eq!(json, r#""docker_image""#);
        assert_eq!(PackageType::DockerImage.to_string(), "docker_image");

        let parsed: CommandType = serde_json::from_str(r#""dry_run_update""#).unwrap();
        assert_eq!(parsed, CommandType::DryRunUpdate);
    }

    #[test]
    fn test_unknown_label() {
        let err = PackageType::from_str("rpm").unwrap_err();
        assert_eq!(err.to_string(), "unknown PackageType label 'rpm'");
    }

    #[test]
    fn test_command_status_predicates() {
        assert!(CommandStatus::Pending.can_cancel());
        assert!(CommandStatus::Sent.can_cancel());
        assert!(!CommandStatus::Running.can_cancel());
        assert!(CommandStatus::Failed.can_retry());
        assert!(CommandStatus::TimedOut.can_retry());
        assert!(CommandStatus::Cancelled.can_retry());
        assert!(!CommandStatus::Completed.can_retry());
        assert!(CommandStatus::ArchivedFailed.is_terminal());
        assert!(!CommandStatus::Running.is_terminal());
    }

    #[test]
    fn test_sticky_statuses() {
        assert!(PackageStatus::Updated.is_sticky());
        assert!(PackageStatus::Ignored.is_sticky());
        assert!(!PackageStatus::Pending.is_sticky());
        assert!(!PackageStatus::Failed.is_sticky());
    }

    #[test]
    fn test_command_timeouts() {
        assert_eq!(
            CommandType::ScanUpdates.timeout(),
            chrono::Duration::minutes(5)
        );
        assert_eq!(
            CommandType::InstallUpdates.timeout(),
            chrono::Duration::hours(1)
        );
    }
}
