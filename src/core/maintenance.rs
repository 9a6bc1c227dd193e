//! Background maintenance ticker
//!
//! Drives [`DistributedOrchestrator::run_maintenance`] on a fixed interval until
//! shutdown is requested. Each tick takes the same component guards as
//! foreground calls.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::core::orchestrator::DistributedOrchestrator;

pub struct MaintenanceScheduler {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<u64>,
}

impl MaintenanceScheduler {
    /// Spawn the ticker. The first tick fires after one full interval.
    pub fn start(orchestrator: Arc<DistributedOrchestrator>, interval: Duration) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut ticks = 0u64;

            info!(interval_ms = interval.as_millis() as u64, "🔧 Maintenance scheduler started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = orchestrator.run_maintenance().await;
                        ticks += 1;
                        debug!(
                            tick = ticks,
                            expired_locks = report.expired_locks.len(),
                            failed_nodes = report.failed_nodes.len(),
                            "Maintenance tick"
                        );
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!(ticks = ticks, "Maintenance scheduler stopped");
            ticks
        });

        Self { shutdown, handle }
    }

    /// Stop issuing ticks and wait for the task; returns the number of ticks run.
    pub async fn stop(self) -> u64 {
        let _ = self.shutdown.send(true);
        self.handle.await.unwrap_or(0)
    }
}
