//! Agent runtime: the long-lived per-host process.
//!
//! A single poll actor drives everything: jittered check-ins, command
//! execution, credential renewal, and the local cache that backs the
//! offline CLI modes.

pub(crate) mod actor;
pub(crate) mod cache;
pub(crate) mod client;
pub(crate) mod config;
pub(crate) mod handlers;
pub(crate) mod sysinfo;

use client::Client;
use std::cell::RefCell;
use std::path::PathBuf;
use std::time::Instant;

/// Seconds between full system-info pushes.
pub(crate) const SYSINFO_PUSH_SECS: u64 = 60 * 60;

/// Shared runtime handles for the poll loop and command handlers.
#[derive(Debug)]
pub(crate) struct AgentRuntime {
    /// Coordinator HTTP client.
    pub(crate) client: Client,
    /// Refresh secret for 401 recovery.
    pub(crate) refresh_token: String,
    /// Nominal poll interval from local config; the coordinator may
    /// shrink it per response.
    pub(crate) nominal_interval: u64,
    /// Local cache location.
    pub(crate) cache_path: PathBuf,
    /// Last successful system-info push.
    pub(crate) last_sysinfo: RefCell<Option<Instant>>,
}
