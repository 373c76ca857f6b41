use crate::db::repositories::EventStore;
use crate::device_manager::DeviceClient;
use crate::error::Error;
use crate::utils::plate_parser::parse_plates;
use crate::utils::time_codec::TimeCodec;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::fmt;
use std::sync::Arc;

/// Where a source's sync cycle currently is, or where it stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStage {
    ResolvingWatermark,
    Fetching,
    Parsing,
    Persisting,
    Done,
    Failed,
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncStage::ResolvingWatermark => "resolving watermark",
            SyncStage::Fetching => "fetching",
            SyncStage::Parsing => "parsing",
            SyncStage::Persisting => "persisting",
            SyncStage::Done => "done",
            SyncStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Outcome of one sync cycle for one camera
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub source: String,
    pub stage: SyncStage,
    pub watermark: Option<DateTime<Utc>>,
    /// Plate elements the device returned, valid or not
    pub fetched: usize,
    pub inserted: usize,
    pub duplicates: usize,
    /// Elements dropped while parsing
    pub rejected: usize,
    pub failed_writes: usize,
    /// Cause of a `Failed` cycle
    pub error: Option<Error>,
}

impl SyncReport {
    fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            stage: SyncStage::ResolvingWatermark,
            watermark: None,
            fetched: 0,
            inserted: 0,
            duplicates: 0,
            rejected: 0,
            failed_writes: 0,
            error: None,
        }
    }

    fn failed(mut self, error: Error) -> Self {
        error!(
            "[{}] sync failed while {}: {}",
            self.source, self.stage, error
        );
        self.stage = SyncStage::Failed;
        self.error = Some(error);
        self
    }

    pub fn is_failed(&self) -> bool {
        self.stage == SyncStage::Failed
    }
}

/// Runs sync cycles for a single camera.
///
/// Holds no sync progress of its own: every cycle re-derives the watermark
/// from the store.
pub struct SourceSyncer {
    name: String,
    client: Arc<dyn DeviceClient>,
    store: Arc<dyn EventStore>,
    codec: TimeCodec,
    default_direction: String,
}

impl SourceSyncer {
    pub fn new(
        name: &str,
        client: Arc<dyn DeviceClient>,
        store: Arc<dyn EventStore>,
        codec: TimeCodec,
        default_direction: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            client,
            store,
            codec,
            default_direction: default_direction.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run one cycle: watermark, fetch, parse, then persist new events in
    /// device order. Never returns an error; failures end up in the report.
    pub async fn sync(&self) -> SyncReport {
        let mut report = SyncReport::new(&self.name);

        let watermark = self.store.resolve_watermark(&self.codec).await;
        report.watermark = Some(watermark);
        debug!(
            "[{}] watermark {} ({} local)",
            self.name,
            watermark,
            self.codec.to_device_local(watermark)
        );

        report.stage = SyncStage::Fetching;
        let body = match self.client.fetch_events_since(watermark).await {
            Ok(body) => body,
            Err(e) => return report.failed(e),
        };

        report.stage = SyncStage::Parsing;
        let parsed = match parse_plates(&body, &self.codec, &self.default_direction) {
            Ok(parsed) => parsed,
            Err(e) => return report.failed(e),
        };
        report.fetched = parsed.events.len() + parsed.rejected;
        report.rejected = parsed.rejected;

        report.stage = SyncStage::Persisting;
        for event in &parsed.events {
            match self.store.append_if_absent(event).await {
                Ok(true) => report.inserted += 1,
                Ok(false) => report.duplicates += 1,
                Err(e) => {
                    warn!(
                        "[{}] failed to store plate {} in {}: {}",
                        self.name,
                        event.picture_name,
                        self.store.table(),
                        e
                    );
                    report.failed_writes += 1;
                }
            }
        }

        report.stage = SyncStage::Done;
        info!(
            "[{}] synced {} new plate(s) ({} fetched, {} duplicate, {} rejected, {} failed writes)",
            self.name,
            report.inserted,
            report.fetched,
            report.duplicates,
            report.rejected,
            report.failed_writes
        );
        report
    }
}
