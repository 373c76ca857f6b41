pub mod config;
pub mod db;
pub mod device_manager;
pub mod error;
pub mod sync;
pub mod utils;

// Re-export main components for easier use
pub use db::models::{CameraSource, DetectionEvent};
pub use error::Error;
pub use sync::{SourceSyncer, SyncCoordinator, SyncReport, SyncScheduler};
pub use utils::time_codec::TimeCodec;
