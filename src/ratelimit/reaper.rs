//! Background eviction of idle limiter entries.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use super::registry::LimiterRegistry;
use crate::config::RateLimitingConfig;

/// Start time used when `now + interval` is not representable.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Periodically removes entries that have been idle longer than the
/// expiration window, bounding the registry's memory use.
#[derive(Debug, Clone)]
pub struct IdleReaper {
    registry: Arc<LimiterRegistry>,
    expiration: Duration,
    interval: Duration,
}

impl IdleReaper {
    /// Create a reaper over `registry`.
    pub fn new(registry: Arc<LimiterRegistry>, expiration: Duration, interval: Duration) -> Self {
        Self {
            registry,
            expiration,
            interval,
        }
    }

    /// Create a reaper using the configured expiration and cleanup interval.
    pub fn from_config(registry: Arc<LimiterRegistry>, config: &RateLimitingConfig) -> Self {
        Self::new(registry, config.expiration(), config.cleanup_interval())
    }

    /// Run a single scan, returning the number of entries removed.
    pub fn run_once(&self) -> usize {
        debug!("Performing rate limiter cleanup");

        let removed = self.registry.evict_idle_since(Instant::now(), self.expiration);
        if removed > 0 {
            info!(
                removed = removed,
                remaining = self.registry.len(),
                "Removed expired rate limiters"
            );
        }
        removed
    }

    /// Spawn the reaper on the current tokio runtime.
    ///
    /// The first scan happens one interval after spawning. A scan that
    /// panics is logged and the next tick proceeds normally. Dropping the
    /// returned handle stops the reaper as well.
    pub fn spawn(self) -> ReaperHandle {
        self.spawn_with(IdleReaper::run_once)
    }

    fn spawn_with<F>(self, scan: F) -> ReaperHandle
    where
        F: Fn(&IdleReaper) -> usize + Send + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        info!(
            interval_secs = self.interval.as_secs(),
            expiration_secs = self.expiration.as_secs(),
            "Starting idle reaper"
        );

        let task = tokio::spawn(async move {
            // interval_at rejects a zero period
            let period = self.interval.max(Duration::from_millis(1));
            let now = Instant::now();
            let start = now.checked_add(period).unwrap_or_else(|| now + FAR_FUTURE);
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| scan(&self))) {
                            error!(reason = panic_message(&*panic), "Rate limiter cleanup failed");
                        }
                    }
                    _ = &mut shutdown_rx => {
                        debug!("Idle reaper stopping");
                        break;
                    }
                }
            }
        });

        ReaperHandle { shutdown_tx, task }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown"
    }
}

/// Handle to a running [`IdleReaper`] task.
#[derive(Debug)]
pub struct ReaperHandle {
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    /// Stop the reaper and wait for its task to finish.
    pub async fn shutdown(self) {
        // The task may already have exited, in which case there is no receiver
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.task.await {
            error!(error = %e, "Idle reaper task failed");
        }
    }

    /// Whether the reaper task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
