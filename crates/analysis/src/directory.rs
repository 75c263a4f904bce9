//! In-memory camera directory, loaded once per driving session.

use model::{Camera, CameraId, CameraRecord};
use serde_json::Value;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("camera directory unavailable: {0}")]
    Unavailable(String),
}

/// Remote list of active cameras (`GET /api/cameras`). Entries are handed over
/// raw so that one malformed camera does not sink the whole list.
#[async_trait::async_trait]
pub trait CameraDirectoryService: Send + Sync {
    async fn fetch_cameras(&self) -> anyhow::Result<Vec<Value>>;
}

/// Cameras sorted by id. Built in full before it is shared, read-only after.
#[derive(Debug, Clone, Default)]
pub struct CameraDirectory {
    cameras: Vec<Camera>,
}

impl CameraDirectory {
    pub fn empty() -> Self {
        Self::default()
    }

    pub async fn load(service: &dyn CameraDirectoryService) -> Result<Self, DirectoryError> {
        let raw = service
            .fetch_cameras()
            .await
            .map_err(|e| DirectoryError::Unavailable(format!("{e:#}")))?;
        let dir = Self::from_records(raw);
        info!("camera directory loaded: {} cameras", dir.len());
        Ok(dir)
    }

    /// Validates each entry, skipping the ones that do not parse.
    pub fn from_records(raw: Vec<Value>) -> Self {
        let mut cameras = Vec::with_capacity(raw.len());
        for (i, v) in raw.into_iter().enumerate() {
            let parsed = serde_json::from_value::<CameraRecord>(v)
                .map_err(|e| e.to_string())
                .and_then(|r| r.into_camera().map_err(|e| e.to_string()));
            match parsed {
                Ok(cam) => cameras.push(cam),
                Err(e) => warn!("skipping camera entry #{i}: {e}"),
            }
        }
        Self::from_cameras(cameras)
    }

    pub fn from_cameras(mut cameras: Vec<Camera>) -> Self {
        cameras.sort_by_key(|c| c.id);
        cameras.dedup_by(|later, first| {
            let dup = later.id == first.id;
            if dup {
                warn!("duplicate camera id {}, keeping '{}'", first.id, first.name);
            }
            dup
        });
        for cam in &mut cameras {
            // the detection ring is authoritative; the warning ring never sits inside it
            if cam.detection_radius_m > cam.warning_radius_m {
                warn!(
                    "camera {} detection radius {} m exceeds warning radius {} m, widening warning ring",
                    cam.id, cam.detection_radius_m, cam.warning_radius_m
                );
                cam.warning_radius_m = cam.detection_radius_m;
            }
        }
        Self { cameras }
    }

    pub fn cameras(&self) -> &[Camera] {
        &self.cameras
    }

    pub fn get(&self, id: CameraId) -> Option<&Camera> {
        self.cameras
            .binary_search_by_key(&id, |c| c.id)
            .ok()
            .map(|i| &self.cameras[i])
    }

    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }
}
