use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::coordinator::Coordinator;
use crate::status::StatusStore;

/// Periodically reports the worker status to the coordinator
pub struct HeartbeatManager {
    coordinator: Arc<dyn Coordinator>,
    status: StatusStore,
    warmup: Duration,
    interval: Duration,
}

impl HeartbeatManager {
    pub fn new(
        coordinator: Arc<dyn Coordinator>,
        status: StatusStore,
        warmup: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            coordinator,
            status,
            warmup,
            interval,
        }
    }

    /// Send one heartbeat; returns whether the coordinator acknowledged it
    pub async fn beat(&self) -> bool {
        // The lock is released before the network call
        let snapshot = self.status.touch();

        match self.coordinator.heartbeat(&snapshot).await {
            Ok(()) => {
                debug!("💓 Keep alive sent at {}", snapshot.update_time);
                true
            }
            Err(e) => {
                warn!("Keep alive failed: {:#}", e);
                false
            }
        }
    }

    /// Stay silent during the warm-up, then beat on a fixed period until cancelled
    pub async fn run(self, shutdown: CancellationToken) {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = time::sleep(self.warmup) => {}
        }

        info!(
            "💓 Heartbeat started, reporting every {}s",
            self.interval.as_secs()
        );
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Heartbeat stopped");
                    return;
                }
                _ = ticker.tick() => {
                    self.beat().await;
                }
            }
        }
    }
}
