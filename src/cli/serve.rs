//! Logic for the `serve` subcommand.

use crate::api::{self, AppState};
use crate::config::{self, Settings};
use crate::store::operators;
use crate::{db, tasks};
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Coordinator service options.
#[derive(Debug, Parser)]
pub(crate) struct Cmd {
    /// Path to the coordinator config file.
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

impl Cmd {
    /// Serve subcommand entry-point.
    pub(crate) fn run(self) -> Result<()> {
        log::info!(
            "starting coordinator ({} {})",
            clap::crate_name!(),
            clap::crate_version!()
        );

        let settings = Settings::assemble_from(Some(&self.config))?;
        let runtime = tokio::runtime::Runtime::new().context("failed to start runtime")?;
        runtime.block_on(serve(settings))
    }
}

/// Run the HTTP service plus maintenance loops until a stop signal.
async fn serve(settings: Settings) -> Result<()> {
    let pool = db::connect(&settings.database_url).await?;
    db::migrate(&pool).await?;

    if let Some((username, password)) = &settings.bootstrap_admin {
        operators::ensure_admin(&pool, username, password).await?;
    }

    let bind_addr = settings.bind_addr;
    let state = AppState::new(pool.clone(), settings);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = tasks::spawn_all(pool, state.settings.clone(), shutdown_rx);

    let app = api::router(state);
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", bind_addr))?;
    log::info!("coordinator listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(stop_signal())
        .await
        .context("server error")?;

    log::info!("stopping maintenance loops");
    let _ = shutdown_tx.send(true);
    let _ = tokio::time::timeout(
        Duration::from_secs(5),
        futures::future::join_all(workers),
    )
    .await;

    log::info!("coordinator stopped");
    Ok(())
}

/// Resolve on SIGTERM or ctrl-c.
async fn stop_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    log::info!("stop signal received");
}
