use crate::sync::coordinator::SyncCoordinator;
use log::{error, info};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tokio_util::sync::CancellationToken;

/// Fires a sync cycle every `check_interval` until shut down
pub struct SyncScheduler {
    coordinator: Arc<SyncCoordinator>,
    check_interval: Duration,
    shutdown: CancellationToken,
}

impl SyncScheduler {
    pub fn new(coordinator: Arc<SyncCoordinator>, check_interval: Duration) -> Self {
        Self {
            coordinator,
            check_interval,
            shutdown: CancellationToken::new(),
        }
    }

    /// Start the scheduler in the background; the first cycle runs immediately
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        info!(
            "Starting sync scheduler with interval of {} seconds",
            self.check_interval.as_secs()
        );

        tokio::spawn(async move { self.run().await })
    }

    async fn run(&self) {
        let mut ticker = interval(self.check_interval);
        let mut in_flight: Vec<JoinHandle<()>> = Vec::new();

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    in_flight.retain(|handle| !handle.is_finished());

                    // One task per tick; the coordinator skips overlapping runs
                    let coordinator = self.coordinator.clone();
                    in_flight.push(tokio::spawn(async move {
                        coordinator.run_once().await;
                    }));
                }
            }
        }

        if !in_flight.is_empty() {
            info!("Waiting for in-flight sync cycle to finish");
        }
        for handle in in_flight {
            if let Err(e) = handle.await {
                error!("Sync cycle task failed: {}", e);
            }
        }

        info!("Sync scheduler stopped");
    }

    /// Stop scheduling new cycles; an in-flight cycle runs to completion
    pub fn shutdown(&self) {
        info!("Shutting down sync scheduler");
        self.shutdown.cancel();
    }
}
