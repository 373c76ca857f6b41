use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single license plate read, normalized from the device response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DetectionEvent {
    #[sqlx(rename = "CaptureTime")]
    pub capture_time: DateTime<Utc>,
    #[sqlx(rename = "PlateNumber")]
    pub plate_number: String,
    /// Device-assigned image name; the natural key used for deduplication
    #[sqlx(rename = "PicName")]
    pub picture_name: String,
    #[sqlx(rename = "Country")]
    pub country: String,
    #[sqlx(rename = "Direction")]
    pub direction: String,
}

/// A camera and the table its plate reads are written into
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CameraSource {
    pub name: String,
    /// Device base URL, e.g. `http://192.168.1.64`
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub table: String,
}
