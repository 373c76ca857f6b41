pub mod coordinator;
pub mod scheduler;
pub mod syncer;

pub use coordinator::SyncCoordinator;
pub use scheduler::SyncScheduler;
pub use syncer::{SourceSyncer, SyncReport, SyncStage};
