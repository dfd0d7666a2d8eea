//! Fleet update-management control plane.

#![deny(missing_debug_implementations)]

#[macro_use]
extern crate prometheus;

/// Agent runtime.
mod agent;
/// HTTP surface of the coordinator.
mod api;
/// Access credentials and operator passwords.
mod auth;
mod cli;
/// Coordinator configuration.
mod config;
/// Database pool and migrations.
mod db;
/// Enrollment and refresh credentials.
mod enrollment;
/// Metrics exposition.
mod metrics;
/// Package-manager abstraction.
mod pkgmgr;
/// Shared wire protocol.
mod proto;
/// Persistent state.
mod store;
/// Periodic maintenance sweeps.
mod tasks;

use clap::Parser;

/// Process entry: everything interesting happens in `run`, which hands
/// back the exit code.
fn main() {
    let exit_code = run();
    std::process::exit(exit_code);
}

/// Parse flags, wire up the logger, and hand control to the selected
/// subcommand. A failure gets its whole cause chain logged before the
/// nonzero exit.
fn run() -> i32 {
    let cli_opts = cli::CliOptions::parse();

    // Logger verbosity comes from the -v flags; RUST_LOG still wins for
    // other crates.
    env_logger::Builder::from_default_env()
        .format_timestamp(None)
        .format_module_path(false)
        .filter(Some(clap::crate_name!()), cli_opts.loglevel())
        .init();

    match cli_opts.run() {
        Ok(_) => libc::EXIT_SUCCESS,
        Err(e) => {
            log_error_chain(&e);
            libc::EXIT_FAILURE
        }
    }
}

/// Log a failure and each underlying cause, one line per level.
fn log_error_chain(err_chain: &anyhow::Error) {
    let mut chain_iter = err_chain.chain();
    let top_err = match chain_iter.next() {
        Some(e) => e.to_string(),
        None => "(unspecified failure)".to_string(),
    };
    log::error!("critical error: {}", top_err);
    for err in chain_iter {
        log::error!(" -> {}", err);
    }
}
