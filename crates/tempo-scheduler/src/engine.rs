use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};

use tempo_core::clock::{Clock, SystemClock};
use tempo_core::config::ReleaseConfig;

use crate::executor::{Deliver, ScheduleExecutor};
use crate::store::ScheduleStore;

/// Background driver: polls for due schedules and releases them.
pub struct ReleaseEngine<S, D> {
    executor: ScheduleExecutor<S, D>,
    clock: Arc<dyn Clock>,
    config: ReleaseConfig,
}

impl<S: ScheduleStore, D: Deliver> ReleaseEngine<S, D> {
    pub fn new(executor: ScheduleExecutor<S, D>, config: ReleaseConfig) -> Self {
        Self::with_clock(executor, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        executor: ScheduleExecutor<S, D>,
        config: ReleaseConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            executor,
            clock,
            config,
        }
    }

    /// Main loop. Polls every `tick_secs` until `shutdown` broadcasts
    /// `true`. A failed tick is logged and the loop keeps going; the next
    /// tick retries anything still pending.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            tick_secs = self.config.tick_secs,
            batch_limit = self.config.batch_limit,
            "release engine started"
        );

        let period = std::time::Duration::from_secs(self.config.tick_secs.max(1));
        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let now = self.clock.now();
                    match self.executor.release_due(now, self.config.batch_limit) {
                        Ok(released) if released > 0 => {
                            info!(released, "released due schedules");
                        }
                        Ok(_) => {}
                        Err(e) => error!("release tick failed: {e}"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("release engine shutting down");
                        break;
                    }
                }
            }
        }
    }
}
