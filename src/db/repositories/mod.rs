use crate::db::models::DetectionEvent;
use crate::error::Error;
use crate::utils::time_codec::TimeCodec;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

pub mod plates;

pub use plates::PlatesRepository;

/// Persistence for one source's plate reads.
///
/// The watermark is always derived from what is stored; nothing here caches
/// sync progress.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Name of the backing table, used in logs
    fn table(&self) -> &str;

    /// Latest persisted capture time, `None` when the table is empty
    async fn latest_capture_time(&self) -> Result<Option<DateTime<Utc>>, Error>;

    async fn exists(&self, picture_name: &str) -> Result<bool, Error>;

    async fn insert(&self, event: &DetectionEvent) -> Result<(), Error>;

    /// Lower bound for the next device query.
    ///
    /// An empty table, or a store that cannot be read, yields the start of
    /// the current local day.
    async fn resolve_watermark(&self, codec: &TimeCodec) -> DateTime<Utc> {
        match self.latest_capture_time().await {
            Ok(Some(latest)) => latest,
            Ok(None) => codec.start_of_day(Utc::now()),
            Err(e) => {
                warn!(
                    "Failed to read watermark from {}, falling back to start of day: {}",
                    self.table(),
                    e
                );
                codec.start_of_day(Utc::now())
            }
        }
    }

    /// Insert `event` unless its picture name is already stored.
    ///
    /// Check and insert are separate statements; only safe with a single
    /// writer per table.
    async fn append_if_absent(&self, event: &DetectionEvent) -> Result<bool, Error> {
        if self.exists(&event.picture_name).await? {
            return Ok(false);
        }
        self.insert(event).await?;
        Ok(true)
    }
}
