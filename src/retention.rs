use std::sync::Arc;
use std::time::Duration;

use getset::Getters;
use lease_queue_shutdown_signal::ShutdownSignal;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::provider::QueueProvider;

const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_MAX_AGE: Duration = Duration::from_secs(3600);

/// Periodic removal of terminal jobs through [`QueueProvider::clean_old_jobs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct RetentionSweep {
    /// Time between two sweeps, the first one runs after a full interval
    interval: Duration,
    /// Terminal jobs not updated for this long are deleted
    max_age: Duration,
}

impl RetentionSweep {
    pub fn new(interval: Duration, max_age: Duration) -> Self {
        Self { interval, max_age }
    }
}

impl Default for RetentionSweep {
    /// Sweeps every minute and keeps terminal jobs for an hour.
    fn default() -> Self {
        Self::new(DEFAULT_SWEEP_INTERVAL, DEFAULT_MAX_AGE)
    }
}

/// Runs `sweep` against `provider` until `shutdown` resolves.
///
/// A failed sweep is logged and retried on the next tick. A zero interval
/// disables the sweep.
pub async fn sweep_until_shutdown<P: QueueProvider>(
    provider: Arc<P>,
    sweep: RetentionSweep,
    shutdown: ShutdownSignal,
) {
    if sweep.interval.is_zero() {
        warn!("Retention sweep disabled, interval must be greater than zero");
        return;
    }

    let mut ticker = interval_at(Instant::now() + sweep.interval, sweep.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(interval = ?sweep.interval, max_age = ?sweep.max_age, "Retention sweep started");

    loop {
        tokio::select! {
            _ = shutdown.clone() => break,
            _ = ticker.tick() => {
                match provider.clean_old_jobs(sweep.max_age).await {
                    Ok(removed) => debug!(removed, "Retention sweep finished"),
                    Err(e) => warn!(error = %e, "Retention sweep failed"),
                }
            }
        }
    }

    info!("Retention sweep stopped");
}

/// Spawns [`sweep_until_shutdown`] on the current tokio runtime.
pub fn spawn_retention_sweep<P: QueueProvider + 'static>(
    provider: Arc<P>,
    sweep: RetentionSweep,
    shutdown: ShutdownSignal,
) -> JoinHandle<()> {
    tokio::spawn(sweep_until_shutdown(provider, sweep, shutdown))
}
