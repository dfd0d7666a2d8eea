//! Poll actor.
//!
//! The agent is one actor driven by a single `PollTick` message. Each
//! tick checks in (renewing the access credential once on a 401),
//! executes any claimed commands strictly in order, and re-schedules
//! itself with a jittered delay.

use super::cache::AgentCache;
use super::client::AgentClientError;
use super::{handlers, sysinfo, AgentRuntime, SYSINFO_PUSH_SECS};
use actix::prelude::*;
use rand::Rng;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Upper bound (exclusive) of poll jitter, in milliseconds.
const JITTER_CEIL_MS: u64 = 30_000;

/// The agent poll actor.
pub(crate) struct PollActor {
    runtime: Rc<AgentRuntime>,
}

impl std::fmt::Debug for PollActor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollActor").finish_non_exhaustive()
    }
}

impl PollActor {
    pub(crate) fn new(runtime: AgentRuntime) -> Self {
        Self {
            runtime: Rc::new(runtime),
        }
    }

    /// Schedule the next tick after `interval` seconds plus jitter.
    fn tick_later(ctx: &mut Context<Self>, interval_secs: u64) {
        let delay = add_jitter(Duration::from_secs(interval_secs));
        log::trace!("next poll in {:?}", delay);
        ctx.notify_later(PollTick {}, delay);
    }
}

impl Actor for PollActor {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        log::trace!("poll actor started");
        // Kick-start the loop.
        ctx.notify(PollTick {});
    }
}

pub(crate) struct PollTick {}

impl Message for PollTick {
    type Result = ();
}

impl Handler<PollTick> for PollActor {
    type Result = ResponseActFuture<Self, ()>;

    fn handle(&mut self, _msg: PollTick, _ctx: &mut Self::Context) -> Self::Result {
        let runtime = Rc::clone(&self.runtime);
        let fut = async move { run_poll(runtime).await }
            .into_actor(self)
            .map(|next_interval, _actor, ctx| {
                Self::tick_later(ctx, next_interval);
            });
        Box::pin(fut)
    }
}

/// One poll cycle. Returns the interval to sleep before the next one.
async fn run_poll(runtime: Rc<AgentRuntime>) -> u64 {
    maybe_push_sysinfo(&runtime).await;

    let metrics = sysinfo::light_metrics().await;
    let response = match runtime.client.check_in(&metrics).await {
        Ok(resp) => resp,
        Err(AgentClientError::Unauthorized) => {
            // Expired access credential: renew once, retry once. No
            // re-registration path from here.
            log::info!("access credential rejected, renewing");
            match runtime.client.renew(&runtime.refresh_token).await {
                Ok(()) => match runtime.client.check_in(&metrics).await {
                    Ok(resp) => resp,
                    Err(e) => {
                        log::error!("check-in failed after renewal: {}", e);
                        return runtime.nominal_interval;
                    }
                },
                Err(e) => {
                    log::error!("credential renewal failed: {}", e);
                    return runtime.nominal_interval;
                }
            }
        }
        Err(e) if e.is_transient() => {
            log::warn!("check-in failed (transient): {}", e);
            return runtime.nominal_interval;
        }
        Err(e) => {
            log::error!("check-in failed: {}", e);
            return runtime.nominal_interval;
        }
    };

    let mut cache = AgentCache::load_or_default(&runtime.cache_path);
    cache.record_check_in();
    if let Err(e) = cache.save(&runtime.cache_path) {
        log::warn!("failed to persist agent cache: {:#}", e);
    }

    if !response.commands.is_empty() {
        log::info!("received {} commands", response.commands.len());
    }
    // One command at a time; a long install simply delays the next poll.
    for envelope in response.commands {
        handlers::execute(Rc::clone(&runtime), envelope).await;
    }

    if response.check_in_interval > 0 {
        response.check_in_interval
    } else {
        runtime.nominal_interval
    }
}

/// Push the full inventory at most once per `SYSINFO_PUSH_SECS`.
async fn maybe_push_sysinfo(runtime: &AgentRuntime) {
    let due = runtime
        .last_sysinfo
        .borrow()
        .map(|at| at.elapsed() >= Duration::from_secs(SYSINFO_PUSH_SECS))
        .unwrap_or(true);
    if !due {
        return;
    }

    let info = sysinfo::full_inventory().await;
    match runtime.client.report_system_info(&info).await {
        Ok(_) => {
            *runtime.last_sysinfo.borrow_mut() = Some(Instant::now());
            log::debug!("system info pushed");
        }
        // 401 recovery happens on the check-in path right after.
        Err(e) => log::debug!("system-info push skipped: {}", e),
    }
}

/// Add uniform jitter in `[0s, 30s)` to a poll period.
///
/// Prevents a fleet restarted together from converging into a
/// phase-locked thundering herd.
fn add_jitter(period: Duration) -> Duration {
    let jitter_ms: u64 = rand::rng().random_range(0..JITTER_CEIL_MS);
    period.saturating_add(Duration::from_millis(jitter_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_add_jitter_bounds() {
        let period = Duration::from_secs(300);
        for _ in 0..256 {
            let jittered = add_jitter(period);
            assert!(jittered >= period);
            assert!(jittered < period + Duration::from_millis(JITTER_CEIL_MS));
        }
    }

    proptest! {
        #[test]
        fn prop_jitter_never_shrinks_period(secs in 0u64..86_400) {
            let period = Duration::from_secs(secs);
            let jittered = add_jitter(period);
            prop_assert!(jittered >= period);
            prop_assert!(jittered < period + Duration::from_millis(JITTER_CEIL_MS));
        }
    }
}
