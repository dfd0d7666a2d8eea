//! Periodic maintenance sweeps.
//!
//! Cooperative timers inside the coordinator process, not separate
//! services. Each loop runs its sweep, logs the result, and exits when
//! the shutdown signal flips. Durability lives in the database, so a
//! missed tick costs nothing.

use crate::config::Settings;
use crate::enrollment::{self, refresh};
use crate::store::{commands, events, hosts};
use sqlx::postgres::PgPool;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Offline reaper period.
const REAPER_PERIOD: Duration = Duration::from_secs(60);

/// Command timeout sweep period.
const TIMEOUT_PERIOD: Duration = Duration::from_secs(60);

/// Enrollment-token expiry sweep period.
const TOKEN_EXPIRY_PERIOD: Duration = Duration::from_secs(15 * 60);

/// Refresh-credential GC period.
const REFRESH_GC_PERIOD: Duration = Duration::from_secs(60 * 60);

/// Event retention pruning period.
const RETENTION_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

/// Spawn every maintenance loop; handles end when `shutdown` flips.
pub(crate) fn spawn_all(
    pool: PgPool,
    settings: Arc<Settings>,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let offline_threshold = settings.offline_threshold;
    let retention = settings.event_retention;

    vec![
        spawn_loop("offline-reaper", REAPER_PERIOD, shutdown.clone(), {
            let pool = pool.clone();
            move || {
                let pool = pool.clone();
                async move {
                    match hosts::offline_sweep(&pool, offline_threshold).await {
                        Ok(0) => {}
                        Ok(n) => log::info!("offline reaper: {} hosts marked offline", n),
                        Err(e) => log::error!("offline reaper failed: {:#}", e),
                    }
                }
            }
        }),
        spawn_loop("command-timeouts", TIMEOUT_PERIOD, shutdown.clone(), {
            let pool = pool.clone();
            move || {
                let pool = pool.clone();
                async move {
                    match commands::timeout_sweep(&pool).await {
                        Ok(0) => {}
                        Ok(n) => log::info!("timeout sweep: {} commands timed out", n),
                        Err(e) => log::error!("timeout sweep failed: {:#}", e),
                    }
                }
            }
        }),
        spawn_loop("token-expiry", TOKEN_EXPIRY_PERIOD, shutdown.clone(), {
            let pool = pool.clone();
            move || {
                let pool = pool.clone();
                async move {
                    match enrollment::expire_sweep(&pool).await {
                        Ok(0) => {}
                        Ok(n) => log::info!("token sweep: {} enrollment tokens expired", n),
                        Err(e) => log::error!("token sweep failed: {:#}", e),
                    }
                }
            }
        }),
        spawn_loop("refresh-gc", REFRESH_GC_PERIOD, shutdown.clone(), {
            let pool = pool.clone();
            move || {
                let pool = pool.clone();
                async move {
                    match refresh::gc(&pool).await {
                        Ok(0) => {}
                        Ok(n) => log::info!("refresh GC: {} credentials removed", n),
                        Err(e) => log::error!("refresh GC failed: {:#}", e),
                    }
                }
            }
        }),
        spawn_loop("event-retention", RETENTION_PERIOD, shutdown, {
            let pool = pool.clone();
            move || {
                let pool = pool.clone();
                async move {
                    match events::prune_events_older_than(&pool, retention).await {
                        Ok(0) => {}
                        Ok(n) => log::info!("retention: {} events pruned", n),
                        Err(e) => log::error!("retention pruning failed: {:#}", e),
                    }
                }
            }
        }),
    ]
}

/// Run a sweep on a fixed period until shutdown.
fn spawn_loop<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut sweep: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The immediate first tick would race startup migrations.
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        log::trace!("{} loop started (period {:?})", name, period);
        loop {
            tokio::select! {
                _ = ticker.tick() => sweep().await,
                _ = shutdown.changed() => {
                    log::trace!("{} loop stopping", name);
                    break;
                }
            }
        }
    })
}
