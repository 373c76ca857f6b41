pub mod plate_models;

pub use plate_models::{CameraSource, DetectionEvent};
