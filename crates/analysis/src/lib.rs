//! Camera proximity, speed estimation and segment tracking.

pub mod directory;
pub mod geo;
pub mod proximity;
pub mod speed;
pub mod tracker;

pub use directory::{CameraDirectory, CameraDirectoryService, DirectoryError};
pub use geo::{distance_meters, haversine_m};
pub use proximity::{classify, Band, Classification, Hit};
pub use speed::{average_speed_kmh, instant_speed_kmh};
pub use tracker::{ChainPolicy, Phase, TrackerConfig, TrackerError, TrackerEvent, TrackerState};
