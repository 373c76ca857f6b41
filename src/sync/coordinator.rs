use crate::sync::syncer::{SourceSyncer, SyncReport};
use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};

/// Clears the running flag when a cycle ends, however it ends
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drives every configured camera's syncer, one after another
pub struct SyncCoordinator {
    syncers: Vec<SourceSyncer>,
    running: AtomicBool,
}

impl SyncCoordinator {
    pub fn new(syncers: Vec<SourceSyncer>) -> Self {
        Self {
            syncers,
            running: AtomicBool::new(false),
        }
    }

    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.syncers.iter().map(SourceSyncer::name)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run one cycle over all sources sequentially.
    ///
    /// Returns `None` without doing anything if a previous cycle is still in
    /// progress.
    pub async fn run_once(&self) -> Option<Vec<SyncReport>> {
        if self.running.swap(true, Ordering::AcqRel) {
            warn!("Previous sync cycle still running, skipping this tick");
            return None;
        }
        let _guard = RunningGuard(&self.running);

        let mut reports = Vec::with_capacity(self.syncers.len());
        for syncer in &self.syncers {
            reports.push(syncer.sync().await);
        }

        let inserted: usize = reports.iter().map(|r| r.inserted).sum();
        let failed = reports.iter().filter(|r| r.is_failed()).count();
        info!(
            "Sync cycle finished: {} source(s), {} new plate(s), {} failed source(s)",
            reports.len(),
            inserted,
            failed
        );

        Some(reports)
    }
}
