use crate::error::Error;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub mod isapi_client;

pub use isapi_client::{IsapiClient, IsapiClientBuilder};

/// Source of raw plate-read payloads for one camera
#[async_trait]
pub trait DeviceClient: Send + Sync {
    /// Fetch the raw response body listing every plate read captured after `watermark`
    async fn fetch_events_since(&self, watermark: DateTime<Utc>) -> Result<String, Error>;
}
